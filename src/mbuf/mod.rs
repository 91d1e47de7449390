//! Zero-copy bridge between engine buffers and the host stack's segment
//! chains.
//!
//! A received packet arrives as one or more buffers owned by the foreign
//! engine. [`Bridge::wrap_header`] and [`Bridge::append_segment`] link them
//! into a [`Packet`] without copying: each [`Segment`] points straight into
//! the engine's memory and carries a disposal registration that hands the
//! buffer back to its [`Pool`] exactly once, when the chain is freed.

mod chain;
mod ext;
mod offload;
mod writable;
mod zone;

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;

use crate::api::{ExtHandle, Pool, Result};
use crate::errors::Error;
use crate::veth::IfIndex;
use ext::{ExtStorage, Storage};
pub use chain::Segments;
pub use writable::WritableBuffer;
pub use zone::MbufZone;
use zone::ZoneEntry;

/// Size of the clusters backing host-originated buffers.
pub const MCLBYTES: usize = 2048;

bitflags! {
    /// Checksum and segmentation state of a chain.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CsumFlags: u32 {
        const IP = 0x0000_0001;
        const IP_UDP = 0x0000_0002;
        const IP_TCP = 0x0000_0004;
        const IP_SCTP = 0x0000_0008;
        const IP_TSO = 0x0000_0010;
        const IP6_UDP = 0x0000_0200;
        const IP6_TCP = 0x0000_0400;
        const IP6_SCTP = 0x0000_0800;
        const IP6_TSO = 0x0000_1000;
        const L3_CALC = 0x0100_0000;
        const L3_VALID = 0x0200_0000;
        const L4_CALC = 0x0400_0000;
        const L4_VALID = 0x0800_0000;

        const TCP = Self::IP_TCP.bits();
        const UDP = Self::IP_UDP.bits();
        const SCTP = Self::IP_SCTP.bits();
        const TSO = Self::IP_TSO.bits() | Self::IP6_TSO.bits();
        const DELAY_DATA = Self::TCP.bits() | Self::UDP.bits();

        const IP_CHECKED = Self::L3_CALC.bits();
        const IP_VALID = Self::L3_VALID.bits();
        const DATA_VALID = Self::L4_VALID.bits();
        const PSEUDO_HDR = Self::L4_CALC.bits();
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MbufFlags: u32 {
        const VLANTAG = 0x0000_0080;
    }
}

/// Packet header, valid only on the head of a chain.
#[derive(Clone, Debug, Default)]
pub struct PktHdr {
    /// Aggregate length of the whole chain.
    pub len: usize,
    pub rcvif: Option<IfIndex>,
    pub csum_flags: CsumFlags,
    pub csum_data: u32,
    pub tso_segsz: u16,
    pub ether_vtag: u16,
    pub flags: MbufFlags,
}

/// One contiguous run of packet bytes.
pub struct Segment {
    storage: Storage,
    off: usize,
    len: usize,
    next: Option<Box<Segment>>,
    _entry: ZoneEntry,
}

impl Segment {
    fn new(entry: ZoneEntry, storage: Storage, len: usize) -> Box<Self> {
        Box::new(Segment {
            storage,
            off: 0,
            len,
            next: None,
            _entry: entry,
        })
    }

    /// The segment's bytes.
    pub fn data(&self) -> &[u8] {
        // External storage is valid for `size` bytes until disposal, which
        // cannot happen while `self` is borrowed. Clusters are owned.
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr().add(self.off), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn next(&self) -> Option<&Segment> {
        self.next.as_deref()
    }

    pub fn next_mut(&mut self) -> Option<&mut Segment> {
        self.next.as_deref_mut()
    }

    /// The engine buffer this segment was wrapped from, if any.
    pub fn ext_handle(&self) -> Option<ExtHandle> {
        match &self.storage {
            Storage::Ext(ext) => Some(ext.handle()),
            Storage::Cluster(_) => None,
        }
    }

    fn trailing_space(&self) -> usize {
        self.storage.size() - (self.off + self.len)
    }

    /// Unused tail of a cluster. Engine buffers are never written.
    fn spare_mut(&mut self) -> &mut [u8] {
        let start = self.off + self.len;
        match &mut self.storage {
            Storage::Cluster(buf) => &mut buf[start..],
            Storage::Ext(_) => &mut [],
        }
    }

    fn dispose(&mut self) {
        if let Storage::Ext(ext) = &mut self.storage {
            ext.dispose();
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // Unlink iteratively so long chains don't recurse.
        let mut next = self.next.take();
        while let Some(mut seg) = next {
            next = seg.next.take();
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.len)
            .field("ext", &self.ext_handle())
            .finish()
    }
}

/// A chain of segments representing one packet.
#[derive(Debug)]
pub struct Packet {
    head: Box<Segment>,
    hdr: PktHdr,
}

impl Packet {
    pub(crate) fn from_parts(head: Box<Segment>, hdr: PktHdr) -> Self {
        Packet { head, hdr }
    }

    pub fn hdr(&self) -> &PktHdr {
        &self.hdr
    }

    pub fn hdr_mut(&mut self) -> &mut PktHdr {
        &mut self.hdr
    }

    /// Aggregate length from the packet header.
    pub fn len(&self) -> usize {
        self.hdr.len
    }

    pub fn is_empty(&self) -> bool {
        self.hdr.len == 0
    }

    pub fn head(&self) -> &Segment {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut Segment {
        &mut self.head
    }

    /// Whether the segment lengths add up to the header's length.
    pub fn is_consistent(&self) -> bool {
        self.segments().map(<[u8]>::len).sum::<usize>() == self.hdr.len
    }

    /// Frees the chain, handing every engine buffer back to its pool.
    pub fn free(mut self) {
        let mut seg = Some(&mut *self.head);
        while let Some(s) = seg {
            s.dispose();
            seg = s.next.as_deref_mut();
        }
    }
}

/// Wraps engine buffers into chains and allocates host-originated ones.
#[derive(Clone)]
pub struct Bridge {
    zone: MbufZone,
    pool: Arc<dyn Pool>,
}

impl Bridge {
    pub fn new(zone: MbufZone, pool: Arc<dyn Pool>) -> Self {
        Bridge { zone, pool }
    }

    pub fn zone(&self) -> &MbufZone {
        &self.zone
    }

    fn entry(&self) -> Result<ZoneEntry> {
        self.zone.alloc().ok_or(Error::NoMemory)
    }

    /// Wraps the first buffer of a received packet.
    ///
    /// `len` is this buffer's length and `total` the length of the whole
    /// packet. With `rx_csum` set every checksum is marked as already
    /// verified. On [`Error::NoMemory`] nothing has been registered and the
    /// caller still owns `handle`.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads of `len` bytes and must stay valid,
    /// and unwritten by anyone else, until the pool's `release` is called
    /// with `handle`.
    pub unsafe fn wrap_header(
        &self,
        handle: ExtHandle,
        data: NonNull<u8>,
        len: usize,
        total: usize,
        rx_csum: bool,
    ) -> Result<Packet> {
        let entry = self.entry()?;
        let storage = Storage::Ext(ExtStorage::new(data, len, handle, self.pool.clone()));
        let mut hdr = PktHdr {
            len: total,
            ..Default::default()
        };
        if rx_csum {
            hdr.csum_flags = CsumFlags::IP_CHECKED
                | CsumFlags::IP_VALID
                | CsumFlags::DATA_VALID
                | CsumFlags::PSEUDO_HDR;
            hdr.csum_data = 0xffff;
        }
        Ok(Packet::from_parts(Segment::new(entry, storage, len), hdr))
    }

    /// Links one more engine buffer right after `prev`.
    ///
    /// Anything already following `prev` is kept after the new segment.
    /// Same failure contract as [`wrap_header`](Bridge::wrap_header).
    ///
    /// # Safety
    ///
    /// Same as [`wrap_header`](Bridge::wrap_header).
    pub unsafe fn append_segment<'a>(
        &self,
        prev: &'a mut Segment,
        handle: ExtHandle,
        data: NonNull<u8>,
        len: usize,
    ) -> Result<&'a mut Segment> {
        let entry = self.entry()?;
        let storage = Storage::Ext(ExtStorage::new(data, len, handle, self.pool.clone()));
        let mut seg = Segment::new(entry, storage, len);
        seg.next = prev.next.take();
        Ok(&mut **prev.next.insert(seg))
    }

    /// Reserves a chain of clusters able to hold `len` bytes.
    pub fn allocate_writable(&self, len: usize) -> Result<WritableBuffer> {
        // A chain needs one segment even when nothing will be written.
        let nsegs = len.max(1).div_ceil(MCLBYTES);
        let mut head: Option<Box<Segment>> = None;
        for _ in 0..nsegs {
            let entry = self.entry()?;
            let mut buf = Vec::new();
            buf.try_reserve_exact(MCLBYTES).map_err(|_| Error::NoMemory)?;
            buf.resize(MCLBYTES, 0);
            let mut seg = Segment::new(entry, Storage::Cluster(buf.into_boxed_slice()), 0);
            seg.next = head.take();
            head = Some(seg);
        }
        let head = head.ok_or(Error::NoMemory)?;
        Ok(WritableBuffer::new(head, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::SlabPool;

    fn bridge(limit: usize) -> (Bridge, Arc<SlabPool>) {
        let pool = SlabPool::new(16, 256);
        (Bridge::new(MbufZone::new(limit), pool.clone()), pool)
    }

    #[test]
    fn test_wrap_is_zero_copy() {
        let (bridge, pool) = bridge(8);
        let h = pool.alloc_filled(b"hello").unwrap();
        let pkt = unsafe { bridge.wrap_header(h, pool.buffer(h), 5, 5, false) }.unwrap();
        assert_eq!(pkt.head().data().as_ptr(), pool.buffer(h).as_ptr() as *const u8);
        assert_eq!(pkt.head().data(), b"hello");
        assert_eq!(pkt.head().ext_handle(), Some(h));
        assert!(pkt.hdr().csum_flags.is_empty());
        pkt.free();
        assert_eq!(pool.release_count(h), 1);
    }

    #[test]
    fn test_rx_csum_marks_valid() {
        let (bridge, pool) = bridge(8);
        let h = pool.alloc().unwrap();
        let pkt = unsafe { bridge.wrap_header(h, pool.buffer(h), 60, 60, true) }.unwrap();
        let flags = pkt.hdr().csum_flags;
        assert!(flags.contains(CsumFlags::IP_CHECKED | CsumFlags::IP_VALID));
        assert!(flags.contains(CsumFlags::DATA_VALID | CsumFlags::PSEUDO_HDR));
        assert_eq!(pkt.hdr().csum_data, 0xffff);
    }

    #[test]
    fn test_header_failure_leaves_buffer_with_caller() {
        let (bridge, pool) = bridge(0);
        let h = pool.alloc().unwrap();
        let err = unsafe { bridge.wrap_header(h, pool.buffer(h), 10, 10, false) };
        assert!(matches!(err, Err(Error::NoMemory)));
        assert_eq!(pool.release_count(h), 0);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn test_append_failure_keeps_chain() {
        let (bridge, pool) = bridge(1);
        let h0 = pool.alloc().unwrap();
        let h1 = pool.alloc().unwrap();
        let mut pkt = unsafe { bridge.wrap_header(h0, pool.buffer(h0), 10, 20, false) }.unwrap();
        let err = unsafe { bridge.append_segment(pkt.head_mut(), h1, pool.buffer(h1), 10) };
        assert!(matches!(err, Err(Error::NoMemory)));
        assert!(pkt.head().next().is_none());
        drop(pkt);
        assert_eq!(pool.release_count(h0), 1);
        assert_eq!(pool.release_count(h1), 0);
    }

    #[test]
    fn test_disposal_fires_once_per_segment() {
        let (bridge, pool) = bridge(8);
        let hs: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
        let mut pkt = unsafe { bridge.wrap_header(hs[0], pool.buffer(hs[0]), 8, 32, false) }.unwrap();
        let mut prev = pkt.head_mut();
        for &h in &hs[1..] {
            prev = unsafe { bridge.append_segment(prev, h, pool.buffer(h), 8) }.unwrap();
        }
        assert!(pkt.is_consistent());
        assert_eq!(bridge.zone().in_use(), 4);
        pkt.free();
        for h in hs {
            assert_eq!(pool.release_count(h), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(bridge.zone().in_use(), 0);
    }

    #[test]
    fn test_drop_disposes_like_free() {
        let (bridge, pool) = bridge(8);
        let h0 = pool.alloc().unwrap();
        let h1 = pool.alloc().unwrap();
        let mut pkt = unsafe { bridge.wrap_header(h0, pool.buffer(h0), 4, 8, false) }.unwrap();
        unsafe { bridge.append_segment(pkt.head_mut(), h1, pool.buffer(h1), 4) }.unwrap();
        drop(pkt);
        assert_eq!(pool.release_count(h0), 1);
        assert_eq!(pool.release_count(h1), 1);
    }

    #[test]
    fn test_append_after_head_keeps_tail() {
        let (bridge, pool) = bridge(8);
        let hs: Vec<_> = [b"a", b"c", b"b"]
            .iter()
            .map(|bytes| pool.alloc_filled(*bytes).unwrap())
            .collect();
        let mut pkt = unsafe { bridge.wrap_header(hs[0], pool.buffer(hs[0]), 1, 3, false) }.unwrap();
        unsafe { bridge.append_segment(pkt.head_mut(), hs[1], pool.buffer(hs[1]), 1) }.unwrap();
        unsafe { bridge.append_segment(pkt.head_mut(), hs[2], pool.buffer(hs[2]), 1) }.unwrap();
        let bytes: Vec<u8> = pkt.segments().flatten().copied().collect();
        assert_eq!(bytes, b"abc");
    }
}
