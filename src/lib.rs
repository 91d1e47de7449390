//! Zero-copy bridge between a poll-mode packet I/O engine and a host
//! network stack.
//!
//! [`mbuf`] wraps engine buffers into host segment chains without copying,
//! [`veth`] registers a virtual ethernet interface on both sides and
//! [`addr`] gives it its addresses and routes.

pub mod addr;
pub mod api;
pub mod config;
pub mod errors;
pub mod loopback;
pub mod mbuf;
pub mod veth;
