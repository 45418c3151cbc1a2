//! The device instance: one per service, borrowed by every session.
//!
//! `init` acquires, in order: a device number from the registrar, the
//! buffer, the readiness timer. A failure at any step gives back what the
//! earlier steps took, newest first. Teardown walks the same list in
//! reverse.

use crate::control::ControlPlane;
use crate::error::DeviceError;
use crate::gate::AccessGate;
use crate::readiness::{ReadinessSignal, ReadinessTimer};
use crate::registrar::{CharDevice, DeviceNumber, OpenFlags, Registrar};
use crate::session::DeviceSession;
use crate::store::BufferStore;
use slotdev_config::DeviceConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info, warn};

pub struct Device {
    name: String,
    number: DeviceNumber,
    store: BufferStore,
    read_gate: AccessGate,
    write_gate: AccessGate,
    readiness: Arc<ReadinessSignal>,
    /// `None` once torn down.
    timer: Option<ReadinessTimer>,
    /// `None` once the number has been given back.
    registrar: Option<Box<dyn Registrar>>,
    open_sessions: AtomicUsize,
}

impl Device {
    /// Brings the device up and starts the readiness timer.
    ///
    /// # Errors
    /// - `Registration` if the registrar refuses the name
    /// - `OutOfMemory` if the buffer cannot be allocated
    /// - `TimerSpawn` if the timer thread cannot be started
    pub fn init(
        config: &DeviceConfig,
        mut registrar: Box<dyn Registrar>,
    ) -> Result<Self, DeviceError> {
        let number = registrar.register(&config.name).inspect_err(|e| {
            error!(name = %config.name, error = %e, "registering failed");
        })?;

        let store = match BufferStore::with_capacity(config.capacity) {
            Ok(store) => store,
            Err(e) => {
                error!(
                    name = %config.name,
                    capacity = config.capacity,
                    "couldn't allocate device buffer"
                );
                registrar.unregister(number);
                return Err(e);
            }
        };

        let readiness = Arc::new(ReadinessSignal::new());
        let timer = match ReadinessTimer::schedule(Arc::clone(&readiness), config.ready_delay()) {
            Ok(timer) => timer,
            Err(source) => {
                error!(name = %config.name, error = %source, "couldn't start readiness timer");
                drop(store);
                registrar.unregister(number);
                return Err(DeviceError::TimerSpawn(source));
            }
        };

        info!(
            name = %config.name,
            %number,
            capacity = config.capacity,
            ready_delay = ?config.ready_delay(),
            "device up"
        );

        Ok(Self {
            name: config.name.clone(),
            number,
            store,
            read_gate: AccessGate::new("read"),
            write_gate: AccessGate::new("write"),
            readiness,
            timer: Some(timer),
            registrar: Some(registrar),
            open_sessions: AtomicUsize::new(0),
        })
    }

    /// Opens a new session. Never blocks, never fails.
    pub fn open(&self, flags: OpenFlags) -> DeviceSession<'_> {
        DeviceSession::new(self, flags)
    }

    /// Control plane over this device's buffer. Bypasses both gates.
    pub fn control(&self) -> ControlPlane<'_> {
        ControlPlane::new(&self.store)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn number(&self) -> DeviceNumber {
        self.number
    }

    #[inline]
    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    #[inline]
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    /// Cancels the timer if still pending and gives the device number back.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    #[inline]
    pub(crate) fn store(&self) -> &BufferStore {
        &self.store
    }

    /// Gate serializing readers.
    #[inline]
    pub fn read_gate(&self) -> &AccessGate {
        &self.read_gate
    }

    /// Gate serializing writers.
    #[inline]
    pub fn write_gate(&self) -> &AccessGate {
        &self.write_gate
    }

    pub(crate) fn session_opened(&self) -> usize {
        self.open_sessions.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn session_released(&self) -> usize {
        self.open_sessions.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Nudges every sleeper on this device to re-check its interrupt flag.
    pub(crate) fn wake_all_waiters(&self) {
        self.read_gate.wake_all();
        self.write_gate.wake_all();
        self.readiness.wake_all();
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.timer.take() {
            if timer.cancel() {
                warn!(name = %self.name, "readiness timer still pending at teardown");
            }
        }
        if let Some(mut registrar) = self.registrar.take() {
            registrar.unregister(self.number);
            info!(name = %self.name, number = %self.number, "device down");
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl CharDevice for Device {
    type Session<'a> = DeviceSession<'a>;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, flags: OpenFlags) -> Result<DeviceSession<'_>, DeviceError> {
        Ok(Device::open(self, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::{InMemoryRegistrar, RegistrarError};
    use std::time::{Duration, Instant};

    fn config(name: &str, delay_ms: u64) -> DeviceConfig {
        DeviceConfig {
            name: name.into(),
            ready_delay_ms: delay_ms,
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn init_registers_and_shutdown_unregisters() {
        let registrar = InMemoryRegistrar::new();
        let device = Device::init(&config("dev", 60_000), Box::new(registrar.clone())).unwrap();
        assert!(registrar.is_registered("dev"));
        assert_eq!(device.control().get_metadata().size, 1024);

        let start = Instant::now();
        device.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!registrar.is_registered("dev"));
    }

    #[test]
    fn drop_tears_down_too() {
        let registrar = InMemoryRegistrar::new();
        drop(Device::init(&config("dev", 60_000), Box::new(registrar.clone())).unwrap());
        assert!(registrar.registered().is_empty());
    }

    #[test]
    fn failed_allocation_gives_number_back() {
        let registrar = InMemoryRegistrar::new();
        let cfg = DeviceConfig {
            capacity: u32::MAX as usize + 1,
            ..config("huge", 10)
        };
        let err = Device::init(&cfg, Box::new(registrar.clone())).err().unwrap();
        assert!(matches!(err, DeviceError::OutOfMemory { .. }));
        assert!(registrar.registered().is_empty());
    }

    #[test]
    fn duplicate_name_is_registration_error() {
        let registrar = InMemoryRegistrar::new();
        let _first = Device::init(&config("dup", 60_000), Box::new(registrar.clone())).unwrap();
        let err = Device::init(&config("dup", 60_000), Box::new(registrar.clone()))
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::Registration(RegistrarError::NameTaken(_))));
    }

    #[test]
    fn sessions_are_counted() {
        let device =
            Device::init(&config("count", 60_000), Box::new(InMemoryRegistrar::new())).unwrap();
        let a = device.open(OpenFlags::BLOCKING);
        let b = CharDevice::open(&device, OpenFlags::NONBLOCK).unwrap();
        assert_eq!(device.open_sessions(), 2);
        a.release();
        drop(b);
        assert_eq!(device.open_sessions(), 0);
    }
}
