//! Per-session interrupt flag, the analogue of a pending signal.
//!
//! Raising the flag only marks it; waking the sleeper is done by whoever
//! raises it (see `InterruptHandle` in the session module), which nudges
//! every wait queue on the device. Sleepers re-check their own flag under
//! the queue's mutex, so a wakeup aimed at someone else is harmless.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    pending: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Consumes a pending interrupt. Returns whether one was pending.
    #[inline]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Drops whatever is still pending when the returned guard goes away.
    ///
    /// An interrupt is aimed at the call in progress; one that call never
    /// slept to notice is discarded on the way out.
    #[inline]
    pub fn clear_on_exit(&self) -> InterruptScope<'_> {
        InterruptScope { interrupt: self }
    }
}

#[must_use = "the interrupt is cleared when the scope is dropped"]
pub struct InterruptScope<'a> {
    interrupt: &'a Interrupt,
}

impl Drop for InterruptScope<'_> {
    fn drop(&mut self) {
        self.interrupt.take();
    }
}
