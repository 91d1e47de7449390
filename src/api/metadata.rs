//! Per-packet metadata exchanged with the foreign engine.

/// Hardware offload requested for an outgoing packet.
///
/// Neutral summary of the chain's checksum and segmentation bits; the
/// engine maps it onto its own descriptor format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxOffload {
    pub ip_csum: bool,
    pub tcp_csum: bool,
    pub udp_csum: bool,
    pub sctp_csum: bool,
    /// TSO segment size, 0 when segmentation is not offloaded.
    pub tso_seg_size: u16,
}
