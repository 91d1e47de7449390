//! Branch weighting for the bounds checks on the copy paths.
//!
//! `read_range` and `WritableBuffer::write` reject out-of-bounds requests
//! before touching any segment. Those rejections are error paths, so they
//! are kept off the hot layout.

#[cold]
#[inline(never)]
fn rejected() {}

/// Returns `rejects` unchanged, marking the `true` arm as the error path.
#[inline(always)]
pub fn unlikely(rejects: bool) -> bool {
    if rejects {
        rejected();
    }
    rejects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_passes_through() {
        assert!(unlikely(true));
        assert!(!unlikely(false));
    }
}
