//! Per-call cancellation and deadline signals.
//!
//! # Responsibility
//! - Let callers abort a search or update between store round trips.
//! - Interrupt an in-flight SQLite statement when a token holds a handle.
//!
//! # Invariants
//! - A cancelled token stays cancelled.
//! - An interrupted call returns no partial page.

use rusqlite::InterruptHandle;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a call stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

impl Display for Interrupted {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::DeadlineExceeded => write!(f, "operation deadline exceeded"),
        }
    }
}

impl Error for Interrupted {}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    interrupt: Option<InterruptHandle>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that also interrupts statements running on the
    /// connection the handle was taken from.
    pub fn with_interrupt(handle: InterruptHandle) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                interrupt: Some(handle),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = &self.inner.interrupt {
            handle.interrupt();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("interrupts_sqlite", &self.inner.interrupt.is_some())
            .finish()
    }
}

/// Cancellation and deadline accepted by every operation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub cancel: Option<CancelToken>,
    pub deadline: Option<Instant>,
}

impl CallContext {
    /// Context that never interrupts.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Fails when the call was cancelled or ran past its deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Classifies a store-level interrupt after the fact.
    pub(crate) fn interrupt_reason(&self) -> Interrupted {
        match self.check() {
            Err(reason) => reason,
            Ok(()) => Interrupted::Cancelled,
        }
    }
}
