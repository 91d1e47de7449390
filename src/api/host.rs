//! The host protocol stack seam.

use crate::addr::{In6AliasReq, InAliasReq, RouteReq};
use crate::errors::Errno;
use crate::mbuf::Packet;
use crate::veth::{IfCommand, IfIndex, Ifnet};

/// The network stack that consumes received chains and owns the address and
/// routing tables.
///
/// All calls are synchronous. Failures are reported as the stack's errno.
pub trait HostStack {
    /// Administrative channel used for address requests.
    ///
    /// Released when dropped, which scopes it to the request that opened it.
    type Channel;

    /// Attaches an ethernet interface and returns its index.
    fn if_attach(&self, ifp: &Ifnet) -> IfIndex;

    /// Removes an interface previously returned by [`if_attach`](HostStack::if_attach).
    fn if_detach(&self, index: IfIndex);

    /// Input path for a received chain.
    fn input(&self, index: IfIndex, pkt: Packet);

    /// Generic link-layer handler for commands the driver does not own.
    fn ether_ioctl(&self, ifp: &mut Ifnet, cmd: &IfCommand) -> Result<(), Errno>;

    /// Opens an administrative channel for `family` (`AF_INET`/`AF_INET6`).
    fn socreate(&self, family: libc::c_int) -> Result<Self::Channel, Errno>;

    /// `SIOCAIFADDR`
    fn add_ifaddr(&self, so: &Self::Channel, req: &InAliasReq) -> Result<(), Errno>;

    /// `SIOCAIFADDR_IN6`
    fn add_ifaddr6(&self, so: &Self::Channel, req: &In6AliasReq) -> Result<(), Errno>;

    /// Adds a route to the default FIB.
    fn rib_add(&self, req: &RouteReq) -> Result<(), Errno>;
}
