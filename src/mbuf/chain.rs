//! Walking a chain and copying bytes out of it.

use std::iter::FusedIterator;

use super::{Packet, Segment};
use crate::api::{Result, unlikely};
use crate::errors::Error;

/// Cursor over a chain's segments, in order.
///
/// Consumed as it advances: walking the chain again takes a fresh call to
/// [`Packet::segments`].
#[derive(Debug)]
pub struct Segments<'a> {
    cur: Option<&'a Segment>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a [u8];

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let seg = self.cur.take()?;
        self.cur = seg.next();
        Some(seg.data())
    }
}

impl FusedIterator for Segments<'_> {}

impl Packet {
    /// Segments of the chain as byte slices.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            cur: Some(self.head()),
        }
    }

    /// Copies `out.len()` bytes starting at `off` out of the chain.
    pub fn read_range(&self, off: usize, out: &mut [u8]) -> Result<()> {
        let len = out.len();
        let total = self.len();
        let out_of_range = Error::OutOfRange { off, len, total };
        if unlikely(off.checked_add(len).is_none_or(|end| end > total)) {
            return Err(out_of_range);
        }

        let mut skip = off;
        let mut done = 0;
        for data in self.segments() {
            if done == len {
                break;
            }
            if skip >= data.len() {
                skip -= data.len();
                continue;
            }
            let n = (data.len() - skip).min(len - done);
            out[done..done + n].copy_from_slice(&data[skip..skip + n]);
            done += n;
            skip = 0;
        }

        // The header claimed more than the segments hold.
        if done < len {
            return Err(out_of_range);
        }
        Ok(())
    }
}
