//! Names for buffers that belong to the foreign engine.

use std::fmt;

/// Token the engine uses to identify one of its packet buffers.
///
/// The bridge stores it next to the external storage of a segment and gives
/// it back through [`Pool::release`](super::Pool::release) when the segment
/// is disposed of. What the value means (a ring slot, an mbuf address) is up
/// to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExtHandle(pub(crate) usize);

impl From<usize> for ExtHandle {
    fn from(raw: usize) -> Self {
        ExtHandle(raw)
    }
}

impl From<ExtHandle> for usize {
    fn from(handle: ExtHandle) -> usize {
        handle.0
    }
}

impl fmt::Display for ExtHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ext#{:#x}", self.0)
    }
}
