//! Per-direction exclusive access gate.
//!
//! A binary semaphore built from a `Mutex<bool>` and a `Condvar`. The mutex
//! only guards the `held` flag and is never kept across a sleep, so a gate
//! holder may block elsewhere (e.g. on the readiness signal) without
//! stalling callers that merely probe the gate.
//!
//! # Acquisition
//! 1. Try to take the gate without waiting.
//! 2. Busy and non-blocking: `WouldBlock`.
//! 3. Busy and blocking: sleep until released. A raised interrupt ends the
//!    sleep with `Interrupted`; the device never retries on the caller's
//!    behalf.
//!
//! No fairness: when the gate is released every sleeper is woken and
//! whichever re-locks first wins.

use crate::error::DeviceError;
use crate::interrupt::Interrupt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Whether an acquisition may sleep.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Acquire {
    Blocking,
    NonBlocking,
}

impl Acquire {
    #[inline]
    pub fn from_nonblocking(nonblocking: bool) -> Self {
        if nonblocking {
            Acquire::NonBlocking
        } else {
            Acquire::Blocking
        }
    }
}

pub struct AccessGate {
    name: &'static str,
    held: Mutex<bool>,
    released: Condvar,
}

/// Holds the gate until dropped.
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard<'a> {
    gate: &'a AccessGate,
}

impl AccessGate {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Takes the gate if it is free.
    pub fn try_acquire(&self) -> Option<GateGuard<'_>> {
        let mut held = self.state();
        if *held {
            return None;
        }
        *held = true;
        Some(GateGuard { gate: self })
    }

    /// Takes the gate according to `mode`; see the module docs.
    pub fn acquire(
        &self,
        mode: Acquire,
        interrupt: &Interrupt,
    ) -> Result<GateGuard<'_>, DeviceError> {
        debug!(gate = self.name, "try to get lock");
        if let Some(guard) = self.try_acquire() {
            debug!(gate = self.name, "got lock");
            return Ok(guard);
        }

        if mode == Acquire::NonBlocking {
            warn!(gate = self.name, "non-blocking: resource unavailable");
            return Err(DeviceError::WouldBlock);
        }

        let mut held = self.state();
        while *held {
            if interrupt.take() {
                debug!(gate = self.name, "interrupted while waiting for lock");
                return Err(DeviceError::Interrupted);
            }
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        debug!(gate = self.name, "got lock after waiting");
        Ok(GateGuard { gate: self })
    }

    /// Whether some guard currently holds the gate.
    pub fn is_held(&self) -> bool {
        *self.state()
    }

    /// Wakes every sleeper so it re-checks its interrupt flag.
    pub(crate) fn wake_all(&self) {
        let _held = self.state();
        self.released.notify_all();
    }

    // The flag is a plain bool that is always consistent, so a poisoned
    // mutex carries no broken invariant.
    #[inline]
    fn state(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.gate.state();
        *held = false;
        drop(held);
        self.gate.released.notify_all();
    }
}
