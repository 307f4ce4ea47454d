//! Cooperative cancellation token
//!
//! Shared between a task's owner on the UI thread and the background unit.
//! The unit polls [`CancelToken::is_aborted`] and returns early; nothing is
//! ever preempted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct TokenState {
    aborted: AtomicBool,
    destroyed: AtomicBool,
}

/// Abort flag plus a one-shot destroy step.
///
/// Both transitions happen once; repeating them is a no-op. A token belongs
/// to exactly one task and is never reset.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abort. Returns `true` if this call performed the transition.
    pub fn abort(&self) -> bool {
        !self.state.aborted.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }

    /// Release the token. Returns `true` if this call performed the transition.
    pub fn destroy(&self) -> bool {
        !self.state.destroyed.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_shared_between_clones() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(!worker.is_aborted());
        token.abort();
        assert!(worker.is_aborted());
    }

    #[test]
    fn abort_and_destroy_transition_once() {
        let token = CancelToken::new();
        assert!(token.abort());
        assert!(!token.abort());
        assert!(token.destroy());
        assert!(!token.destroy());
        assert!(token.is_aborted());
        assert!(token.is_destroyed());
    }
}
