//! The foreign packet I/O engine seam.

use super::Result;
use crate::config::VethConfig;
use crate::mbuf::Packet;
use crate::veth::Ifnet;

/// A poll-mode packet I/O engine an interface can be registered with.
///
/// The engine owns its buffer pools, rings and polling threads. This crate
/// only registers interfaces with it and hands it chains to send.
pub trait Engine {
    /// Registration returned by [`register`](Engine::register).
    ///
    /// Passed by reference into every send and moved into
    /// [`deregister`](Engine::deregister), so it cannot be released twice.
    type Handle;

    /// Registers an interface with the engine.
    fn register(&self, ifp: &Ifnet, cfg: &VethConfig) -> Result<Self::Handle>;

    /// Drops a registration. The handle is never used again.
    fn deregister(&self, handle: Self::Handle);

    /// Sends a chain of `len` bytes.
    ///
    /// Ownership of `pkt` moves to the engine whether or not the send
    /// succeeds. Failures come back as [`Error::Engine`](crate::errors::Error::Engine).
    fn send(&self, handle: &Self::Handle, pkt: Packet, len: usize) -> Result<()>;
}
