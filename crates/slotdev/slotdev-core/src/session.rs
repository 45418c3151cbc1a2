//! Per-open session: a read cursor, a blocking preference, an interrupt flag.
//!
//! The cursor belongs to the session and is not covered by any gate. Two
//! sessions reading around a concurrent write can see different slices of
//! what was, at different moments, the same buffer.

use crate::control::Metadata;
use crate::device::Device;
use crate::error::DeviceError;
use crate::gate::Acquire;
use crate::interrupt::Interrupt;
use crate::registrar::OpenFlags;
use tracing::{debug, warn};

/// Reference point for `seek`. Accepted for interface compatibility; the
/// position is always taken as absolute.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

pub struct DeviceSession<'d> {
    device: &'d Device,
    nonblocking: bool,
    /// Next byte `read` returns.
    offset: u64,
    interrupt: Interrupt,
}

impl<'d> DeviceSession<'d> {
    pub(crate) fn new(device: &'d Device, flags: OpenFlags) -> Self {
        let open = device.session_opened();
        debug!(device = device.name(), nonblocking = flags.nonblocking, open, "open");
        Self {
            device,
            nonblocking: flags.nonblocking,
            offset: 0,
            interrupt: Interrupt::new(),
        }
    }

    #[inline]
    fn mode(&self) -> Acquire {
        Acquire::from_nonblocking(self.nonblocking)
    }

    /// Copies bytes from the cursor into `buf` and advances the cursor.
    ///
    /// Takes the read gate, then waits for the device to become ready.
    /// Returns `Ok(0)` at end-of-data.
    ///
    /// # Errors
    /// - `WouldBlock`: non-blocking session and the gate is held or the
    ///   device is not ready yet
    /// - `Interrupted`: a blocking wait was interrupted
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let _scope = self.interrupt.clear_on_exit();
        let _gate = self.device.read_gate().acquire(self.mode(), &self.interrupt)?;

        let readiness = self.device.readiness();
        if self.nonblocking && !readiness.is_ready() {
            warn!(device = self.device.name(), "non-blocking read before device ready");
            return Err(DeviceError::WouldBlock);
        }
        readiness.wait_until_ready(&self.interrupt)?;

        let store = self.device.store();
        let count = store.read(self.offset, buf);
        if count == 0 {
            debug!(offset = self.offset, length = store.len(), "EOF");
            return Ok(0);
        }

        self.offset += count as u64;
        debug!(offset = self.offset, length = store.len(), count, "read");
        Ok(count)
    }

    /// Replaces the device contents with `data`. The cursor does not move.
    ///
    /// Returns how many bytes were kept, at most `capacity - 1`.
    ///
    /// # Errors
    /// - `WouldBlock`: non-blocking session and the write gate is held
    /// - `Interrupted`: the wait for the write gate was interrupted
    pub fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        let _scope = self.interrupt.clear_on_exit();
        let _gate = self.device.write_gate().acquire(self.mode(), &self.interrupt)?;

        let store = self.device.store();
        let count = store.write(data);
        debug!(
            requested = data.len(),
            count,
            size = store.capacity(),
            length = store.len(),
            "write"
        );
        Ok(count)
    }

    /// Moves the cursor to `position`. `whence` is ignored and nothing is
    /// checked against the current length; reading past it yields EOF.
    ///
    /// # Errors
    /// `InvalidArgument` for a negative position.
    pub fn seek(&mut self, position: i64, whence: Whence) -> Result<u64, DeviceError> {
        let position = u64::try_from(position).map_err(|_| DeviceError::InvalidArgument)?;
        debug!(position, ?whence, "seek");
        self.offset = position;
        Ok(position)
    }

    /// Runs a control request; see `ControlPlane::dispatch`.
    pub fn control(
        &mut self,
        code: u32,
        payload: Option<&mut Metadata>,
    ) -> Result<(), DeviceError> {
        self.device.control().dispatch(code, payload)
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Handle another thread can use to interrupt this session's waits.
    pub fn interrupt_handle(&self) -> InterruptHandle<'d> {
        InterruptHandle {
            device: self.device,
            interrupt: self.interrupt.clone(),
        }
    }

    /// Closes the session. Same as dropping it.
    pub fn release(self) {}
}

impl Drop for DeviceSession<'_> {
    fn drop(&mut self) {
        let open = self.device.session_released();
        debug!(device = self.device.name(), open, "release");
    }
}

/// Interrupts one session's blocking waits from another thread.
#[derive(Clone)]
pub struct InterruptHandle<'d> {
    device: &'d Device,
    interrupt: Interrupt,
}

impl InterruptHandle<'_> {
    /// Marks the session interrupted and wakes it if it is asleep.
    ///
    /// A blocking wait in progress fails with `Interrupted`. If the call in
    /// progress never sleeps, the interrupt is dropped when it returns and
    /// later calls are unaffected. Other sessions are woken too but go back
    /// to sleep.
    pub fn interrupt(&self) {
        self.interrupt.raise();
        self.device.wake_all_waiters();
    }
}
