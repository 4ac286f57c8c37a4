//! Generation-counter cancellation
//!
//! A [`CancellationToken`] hands out [`AbortHandle`]s. Each handle remembers
//! the generation it was issued in; any later [`CancellationToken::abort`] or
//! [`CancellationToken::next_handle`] moves the generation forward and so
//! invalidates every handle issued before. Checking a handle is a single
//! atomic load.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Owner side of the cancellation pair
///
/// Dropping the token aborts the outstanding handle.
#[derive(Debug, Default)]
pub struct CancellationToken {
    generation: Arc<AtomicU64>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the current handle and issue a new one
    pub fn next_handle(&self) -> AbortHandle {
        let seq = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        AbortHandle {
            generation: Arc::clone(&self.generation),
            seq,
        }
    }

    /// Invalidate every handle issued so far
    pub fn abort(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Deferred-work side of the cancellation pair
#[derive(Debug, Clone)]
pub struct AbortHandle {
    generation: Arc<AtomicU64>,
    seq: u64,
}

impl AbortHandle {
    /// Whether the issuing token was aborted or re-issued since
    pub fn is_aborted(&self) -> bool {
        self.generation.load(Ordering::Acquire) != self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_handle_is_live() {
        let token = CancellationToken::new();
        let handle = token.next_handle();
        assert!(!handle.is_aborted());
    }

    #[test]
    fn test_abort_is_idempotent() {
        let token = CancellationToken::new();
        let handle = token.next_handle();
        token.abort();
        assert!(handle.is_aborted());
        token.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn test_next_handle_supersedes_previous() {
        let token = CancellationToken::new();
        let first = token.next_handle();
        let second = token.next_handle();
        assert!(first.is_aborted());
        assert!(!second.is_aborted());
        assert!(!second.clone().is_aborted());
    }

    #[test]
    fn test_drop_aborts() {
        let token = CancellationToken::new();
        let handle = token.next_handle();
        drop(token);
        assert!(handle.is_aborted());
    }

    #[test]
    fn test_handle_checked_from_other_thread() {
        let token = CancellationToken::new();
        let handle = token.next_handle();
        token.abort();
        let aborted = std::thread::spawn(move || handle.is_aborted())
            .join()
            .unwrap();
        assert!(aborted);
    }
}
