//! Interrupting long-running store work.
//!
//! An [`InterruptHandle`] can be cloned out of the store and used from any
//! thread. Work that wants to be interruptible takes an [`InterruptScope`]
//! when it starts and polls it between steps; SQLite statements already
//! running are cancelled through the connection's own interrupt handle.

use crate::error::{LoginsError, LoginsResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Interrupts work running against one store.
pub struct InterruptHandle {
    counter: Arc<AtomicUsize>,
    sqlite: rusqlite::InterruptHandle,
}

impl InterruptHandle {
    pub(crate) fn new(sqlite: rusqlite::InterruptHandle) -> Self {
        Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sqlite,
        }
    }

    /// Interrupts every scope that is currently open, and any SQL statement
    /// currently executing.
    pub fn interrupt(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
        self.sqlite.interrupt();
    }

    /// Opens a scope that observes interrupts issued from now on.
    #[must_use]
    pub fn begin_scope(&self) -> InterruptScope {
        InterruptScope {
            start: self.counter.load(Ordering::SeqCst),
            counter: Arc::clone(&self.counter),
        }
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupts", &self.counter.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// A window of work that an [`InterruptHandle`] can cancel.
#[derive(Debug, Clone)]
pub struct InterruptScope {
    start: usize,
    counter: Arc<AtomicUsize>,
}

impl InterruptScope {
    /// A scope that is never interrupted.
    #[must_use]
    pub fn uninterruptible() -> Self {
        Self {
            start: 0,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.counter.load(Ordering::SeqCst) != self.start
    }

    pub fn err_if_interrupted(&self) -> LoginsResult<()> {
        if self.was_interrupted() {
            return Err(LoginsError::Interrupted);
        }
        Ok(())
    }
}
