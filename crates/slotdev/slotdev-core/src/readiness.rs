//! One-shot readiness signal and the timer that fires it.
//!
//! ```text
//!   NotReady ──(timer fires)──▶ Ready
//! ```
//!
//! The transition happens once and is never undone. Waiters park on a
//! `Condvar`; the timer sets the state and broadcasts. Once `Ready`, the
//! atomic fast path means readers never touch the mutex again.

use crate::error::DeviceError;
use crate::interrupt::Interrupt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    Ready,
}

pub struct ReadinessSignal {
    ready: AtomicBool,
    /// Waiters sleep on this; the bool mirrors `ready`.
    queue: Mutex<bool>,
    fired: Condvar,
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessSignal {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            queue: Mutex::new(false),
            fired: Condvar::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> Readiness {
        if self.is_ready() {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Moves to `Ready` and wakes every waiter. Later calls do nothing.
    pub fn fire(&self) {
        let mut ready = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if *ready {
            return;
        }
        *ready = true;
        self.ready.store(true, Ordering::Release);
        drop(ready);
        self.fired.notify_all();
    }

    /// Sleeps until `Ready`, or until `interrupt` is raised.
    ///
    /// The signal says nothing about buffer contents: data may already be
    /// there and the caller still waits.
    pub fn wait_until_ready(&self, interrupt: &Interrupt) -> Result<(), DeviceError> {
        if self.is_ready() {
            return Ok(());
        }

        let mut ready = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        while !*ready {
            if interrupt.take() {
                debug!("interrupted in readiness wait");
                return Err(DeviceError::Interrupted);
            }
            ready = self
                .fired
                .wait(ready)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    /// Wakes every waiter so it re-checks its interrupt flag.
    pub(crate) fn wake_all(&self) {
        let _ready = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        self.fired.notify_all();
    }
}

/// Background thread that fires a `ReadinessSignal` once after a delay.
///
/// Dropping the timer cancels and joins it.
pub struct ReadinessTimer {
    cancel: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<bool>>,
}

impl ReadinessTimer {
    /// Schedules `signal` to fire after `delay`.
    ///
    /// # Errors
    /// Returns the OS error if the timer thread cannot be spawned.
    pub fn schedule(signal: Arc<ReadinessSignal>, delay: Duration) -> io::Result<Self> {
        let cancel = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_cancel = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("slotdev-ready-timer".into())
            .spawn(move || {
                let (lock, cvar) = &*thread_cancel;
                let cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let (cancelled, _) = cvar
                    .wait_timeout_while(cancelled, delay, |cancelled| !*cancelled)
                    .unwrap_or_else(PoisonError::into_inner);
                if *cancelled {
                    return false;
                }
                drop(cancelled);

                signal.fire();
                info!(?delay, "readiness timer fired");
                true
            })?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Cancels the timer if it has not fired yet and joins the thread.
    ///
    /// Returns `true` if the timer was still pending.
    pub fn cancel(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        {
            let (lock, cvar) = &*self.cancel;
            *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
            cvar.notify_all();
        }
        // A panicked timer thread never fired.
        let fired = handle.join().unwrap_or(false);
        !fired
    }
}

impl Drop for ReadinessTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn starts_not_ready_and_fires_once() {
        let signal = ReadinessSignal::new();
        assert_eq!(signal.state(), Readiness::NotReady);
        signal.fire();
        signal.fire();
        assert_eq!(signal.state(), Readiness::Ready);
        assert!(signal.wait_until_ready(&Interrupt::new()).is_ok());
    }

    #[test]
    fn timer_wakes_waiter_after_delay() {
        let signal = Arc::new(ReadinessSignal::new());
        let start = Instant::now();
        let _timer =
            ReadinessTimer::schedule(Arc::clone(&signal), Duration::from_millis(50)).unwrap();

        signal.wait_until_ready(&Interrupt::new()).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(signal.is_ready());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let signal = Arc::new(ReadinessSignal::new());
        let timer =
            ReadinessTimer::schedule(Arc::clone(&signal), Duration::from_secs(60)).unwrap();

        let start = Instant::now();
        assert!(timer.cancel());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!signal.is_ready());
    }

    #[test]
    fn cancel_after_firing_reports_not_pending() {
        let signal = Arc::new(ReadinessSignal::new());
        let timer =
            ReadinessTimer::schedule(Arc::clone(&signal), Duration::from_millis(1)).unwrap();
        signal.wait_until_ready(&Interrupt::new()).unwrap();
        assert!(!timer.cancel());
    }

    #[test]
    fn interrupt_leaves_other_waiters_parked() {
        let signal = ReadinessSignal::new();
        let first = Interrupt::new();
        let second = Interrupt::new();

        thread::scope(|s| {
            let a = s.spawn(|| signal.wait_until_ready(&first));
            let b = s.spawn(|| signal.wait_until_ready(&second));
            thread::sleep(Duration::from_millis(20));

            first.raise();
            signal.wake_all();
            assert!(matches!(a.join().unwrap(), Err(DeviceError::Interrupted)));

            thread::sleep(Duration::from_millis(20));
            assert!(!b.is_finished());
            signal.fire();
            assert!(b.join().unwrap().is_ok());
        });
    }
}
