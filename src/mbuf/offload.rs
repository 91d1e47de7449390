//! Offload metadata carried on the chain header.

use super::{CsumFlags, MbufFlags, Packet};
use crate::api::TxOffload;

impl Packet {
    /// Offload the engine should apply when sending this chain.
    pub fn tx_offload(&self) -> TxOffload {
        let flags = self.hdr().csum_flags;
        TxOffload {
            ip_csum: flags.contains(CsumFlags::IP),
            tcp_csum: flags.contains(CsumFlags::TCP),
            udp_csum: flags.contains(CsumFlags::UDP),
            sctp_csum: flags.contains(CsumFlags::SCTP),
            tso_seg_size: if flags.intersects(CsumFlags::TSO) {
                self.hdr().tso_segsz
            } else {
                0
            },
        }
    }

    /// Tags the chain with a VLAN TCI. Nothing is written into the frame.
    pub fn set_vlan_tag(&mut self, tci: u16) {
        let hdr = self.hdr_mut();
        hdr.ether_vtag = tci;
        hdr.flags |= MbufFlags::VLANTAG;
    }

    pub fn vlan_tag(&self) -> Option<u16> {
        let hdr = self.hdr();
        hdr.flags
            .contains(MbufFlags::VLANTAG)
            .then_some(hdr.ether_vtag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::{Bridge, MbufZone};
    use crate::loopback::SlabPool;

    fn packet() -> Packet {
        let pool = SlabPool::new(2, 128);
        let bridge = Bridge::new(MbufZone::new(4), pool.clone());
        bridge.allocate_writable(64).unwrap().into_packet()
    }

    #[test]
    fn test_ip_tcp_only() {
        let mut pkt = packet();
        pkt.hdr_mut().csum_flags = CsumFlags::IP | CsumFlags::TCP;
        pkt.hdr_mut().tso_segsz = 1448;
        assert_eq!(
            pkt.tx_offload(),
            TxOffload {
                ip_csum: true,
                tcp_csum: true,
                udp_csum: false,
                sctp_csum: false,
                tso_seg_size: 0,
            }
        );
    }

    #[test]
    fn test_tso_reports_segment_size() {
        let mut pkt = packet();
        pkt.hdr_mut().csum_flags = CsumFlags::IP6_TSO | CsumFlags::UDP | CsumFlags::SCTP;
        pkt.hdr_mut().tso_segsz = 1440;
        let off = pkt.tx_offload();
        assert!(!off.ip_csum && !off.tcp_csum);
        assert!(off.udp_csum && off.sctp_csum);
        assert_eq!(off.tso_seg_size, 1440);
    }

    #[test]
    fn test_rx_validity_bits_are_not_offload() {
        let mut pkt = packet();
        pkt.hdr_mut().csum_flags = CsumFlags::IP_CHECKED | CsumFlags::DATA_VALID;
        assert_eq!(pkt.tx_offload(), TxOffload::default());
    }

    #[test]
    fn test_vlan_tag() {
        let mut pkt = packet();
        assert_eq!(pkt.vlan_tag(), None);
        pkt.set_vlan_tag(0x2064);
        assert_eq!(pkt.vlan_tag(), Some(0x2064));
        assert!(pkt.hdr().flags.contains(MbufFlags::VLANTAG));
        assert_eq!(pkt.len(), 0);
    }
}
