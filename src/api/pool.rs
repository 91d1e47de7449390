//! The release seam into the foreign engine's buffer pool.

use super::buffer::ExtHandle;

/// A pool of externally owned packet buffers.
///
/// Each engine backend implements this to take its buffers back once a
/// wrapped chain is disposed of. `release` is called exactly once per
/// wrapped segment.
pub trait Pool: Send + Sync {
    /// Returns a buffer to the pool.
    fn release(&self, handle: ExtHandle);
}
