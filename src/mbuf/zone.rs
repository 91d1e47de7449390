//! Bounded allocator for chain segment headers.

use std::sync::atomic::{AtomicUsize, Ordering};

use triomphe::Arc;

#[derive(Debug)]
struct RawZone {
    limit: usize,
    used: AtomicUsize,
}

impl RawZone {
    fn alloc(&self) -> bool {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            if used == self.limit {
                return false;
            }
            match self.used.compare_exchange_weak(
                used,
                used + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => used = actual,
            }
        }
    }

    fn dealloc(&self) {
        self.used.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A zone of segment headers with a fixed limit.
///
/// Every [`Segment`](super::Segment) holds one entry for as long as it
/// lives. When the zone is exhausted, header allocation fails with
/// [`Error::NoMemory`](crate::errors::Error::NoMemory) instead of growing.
#[derive(Debug, Clone)]
pub struct MbufZone {
    inner: Arc<RawZone>,
}

impl MbufZone {
    pub fn new(limit: usize) -> Self {
        MbufZone {
            inner: Arc::new(RawZone {
                limit,
                used: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn alloc(&self) -> Option<ZoneEntry> {
        self.inner.alloc().then(|| ZoneEntry {
            zone: self.inner.clone(),
        })
    }

    /// Headers currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }
}

/// One allocated header. Returned to its zone on drop.
#[derive(Debug)]
pub(crate) struct ZoneEntry {
    zone: Arc<RawZone>,
}

impl Drop for ZoneEntry {
    fn drop(&mut self) {
        self.zone.dealloc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_and_reuse() {
        let zone = MbufZone::new(2);
        let a = zone.alloc().unwrap();
        let _b = zone.alloc().unwrap();
        assert!(zone.alloc().is_none());
        assert_eq!(zone.in_use(), 2);
        drop(a);
        assert_eq!(zone.in_use(), 1);
        assert!(zone.alloc().is_some());
    }
}
