//! The cancellation signal.

use crate::error::{EditorError, Result};

/// A cancel-query callable, checked by long-running delegated operations (delta
/// application, log replay, recursive entry removal). The editor itself does not poll
/// this between every callback; it relies on collaborators to honor it and propagate.
pub struct Cancellation {
    query: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Cancellation {
    /// Wrap a closure that returns `true` once cancellation has been requested.
    pub fn new(query: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            query: Box::new(query),
        }
    }

    /// A `Cancellation` that never fires.
    pub fn never() -> Self {
        Self::new(|| false)
    }

    /// `Ok(())` if not cancelled, `Err(EditorError::Cancelled)` otherwise.
    pub fn check(&self) -> Result<()> {
        if (self.query)() {
            Err(EditorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellation").finish_non_exhaustive()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn never_cancels() {
        assert!(Cancellation::never().check().is_ok());
    }

    #[test]
    fn fires_once_flag_is_set() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        let c = Cancellation::new(move || flag2.load(Ordering::SeqCst));
        assert!(c.check().is_ok());
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(c.check(), Err(EditorError::Cancelled)));
    }
}
