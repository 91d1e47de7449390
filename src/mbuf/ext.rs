//! External storage: memory the foreign engine lends to a segment.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::api::{ExtHandle, Pool};

/// Storage backing a segment's bytes.
pub(crate) enum Storage {
    /// Zero-copy view of an engine buffer.
    Ext(ExtStorage),
    /// Cluster allocated by the bridge for host-originated data.
    Cluster(Box<[u8]>),
}

impl Storage {
    pub(crate) fn as_ptr(&self) -> *const u8 {
        match self {
            Storage::Ext(ext) => ext.buf.as_ptr(),
            Storage::Cluster(buf) => buf.as_ptr(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            Storage::Ext(ext) => ext.size,
            Storage::Cluster(buf) => buf.len(),
        }
    }
}

/// An engine buffer plus its disposal registration.
///
/// The release hook is held in an `Option` and taken on the first
/// [`dispose`](ExtStorage::dispose), so it fires once no matter whether the
/// chain is freed explicitly or simply dropped.
pub(crate) struct ExtStorage {
    buf: NonNull<u8>,
    size: usize,
    handle: ExtHandle,
    free: Option<Arc<dyn Pool>>,
}

// The buffer is exclusively owned by the chain until disposal.
unsafe impl Send for ExtStorage {}

impl ExtStorage {
    pub(crate) fn new(buf: NonNull<u8>, size: usize, handle: ExtHandle, pool: Arc<dyn Pool>) -> Self {
        ExtStorage {
            buf,
            size,
            handle,
            free: Some(pool),
        }
    }

    pub(crate) fn handle(&self) -> ExtHandle {
        self.handle
    }

    pub(crate) fn dispose(&mut self) {
        if let Some(pool) = self.free.take() {
            pool.release(self.handle);
        }
    }
}

impl Drop for ExtStorage {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ExtStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtStorage")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("armed", &self.free.is_some())
            .finish()
    }
}
