//! Buffers the host stack fills itself, for sending.

use super::{Packet, PktHdr, Segment};
use crate::api::{Result, unlikely};
use crate::errors::Error;

/// A chain of clusters reserved for `capacity` bytes, filled front to back.
#[derive(Debug)]
pub struct WritableBuffer {
    head: Box<Segment>,
    cap: usize,
    off: usize,
}

impl WritableBuffer {
    pub(crate) fn new(head: Box<Segment>, cap: usize) -> Self {
        WritableBuffer { head, cap, off: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Write cursor: bytes written so far.
    pub fn offset(&self) -> usize {
        self.off
    }

    /// Appends `data` at the write cursor, spilling into the next cluster
    /// when the current one is full.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let len = data.len();
        if unlikely(self.off + len > self.cap) {
            return Err(Error::Overflow {
                off: self.off,
                len,
                cap: self.cap,
            });
        }

        let mut progress = 0;
        let mut seg = Some(&mut *self.head);
        while let Some(s) = seg {
            if progress == len {
                break;
            }
            let spare = s.spare_mut();
            let n = spare.len().min(len - progress);
            spare[..n].copy_from_slice(&data[progress..progress + n]);
            s.len += n;
            progress += n;
            seg = s.next.as_deref_mut();
        }
        self.off += progress;
        Ok(progress)
    }

    /// Hands the written bytes over as a packet. Unused clusters are freed.
    pub fn into_packet(self) -> Packet {
        let WritableBuffer { mut head, off, .. } = self;
        let mut seg = Some(&mut *head);
        while let Some(s) = seg {
            if s.next.as_ref().is_some_and(|n| n.is_empty()) {
                s.next = None;
                break;
            }
            seg = s.next.as_deref_mut();
        }
        let hdr = PktHdr {
            len: off,
            ..Default::default()
        };
        Packet::from_parts(head, hdr)
    }
}
