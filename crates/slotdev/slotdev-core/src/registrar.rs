//! Registration contract between the device and whatever exposes it.
//!
//! The device does not create nodes or hand out numbers itself; it asks a
//! `Registrar` for a `DeviceNumber` on init and gives it back on teardown.
//! `InMemoryRegistrar` is the in-process stand-in used by the service
//! binary and the tests.

use crate::error::DeviceError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// First major number handed out; start of the range reserved for local use.
pub const FIRST_DYNAMIC_MAJOR: u32 = 240;
/// One past the last major number handed out.
pub const LAST_DYNAMIC_MAJOR: u32 = 255;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceNumber {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrarError {
    #[error("device name '{0}' is already registered")]
    NameTaken(String),

    #[error("no free device numbers")]
    Exhausted,
}

pub trait Registrar: Send + Sync {
    fn register(&mut self, name: &str) -> Result<DeviceNumber, RegistrarError>;

    /// Gives `number` back. Unknown numbers are ignored.
    fn unregister(&mut self, number: DeviceNumber);
}

/// Flags a session is opened with.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct OpenFlags {
    pub nonblocking: bool,
}

impl OpenFlags {
    pub const BLOCKING: Self = Self { nonblocking: false };
    pub const NONBLOCK: Self = Self { nonblocking: true };
}

/// What a registered character device exposes: a name and a way to open it.
/// Reads, writes, seeks and control requests go through the session.
pub trait CharDevice {
    type Session<'a>
    where
        Self: 'a;

    fn name(&self) -> &str;

    fn open(&self, flags: OpenFlags) -> Result<Self::Session<'_>, DeviceError>;
}

#[derive(Default)]
struct Table {
    by_major: BTreeMap<u32, String>,
}

/// Hands out one major number per name from the dynamic range.
///
/// Clones share the same table, so a test can keep one clone and watch what
/// a device registers through another.
#[derive(Clone, Default)]
pub struct InMemoryRegistrar {
    table: Arc<Mutex<Table>>,
}

impl InMemoryRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.table().by_major.values().any(|n| n == name)
    }

    pub fn registered(&self) -> Vec<(DeviceNumber, String)> {
        self.table()
            .by_major
            .iter()
            .map(|(&major, name)| (DeviceNumber { major, minor: 0 }, name.clone()))
            .collect()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Registrar for InMemoryRegistrar {
    fn register(&mut self, name: &str) -> Result<DeviceNumber, RegistrarError> {
        let mut table = self.table();
        if table.by_major.values().any(|n| n == name) {
            return Err(RegistrarError::NameTaken(name.to_owned()));
        }
        let major = (FIRST_DYNAMIC_MAJOR..LAST_DYNAMIC_MAJOR)
            .find(|m| !table.by_major.contains_key(m))
            .ok_or(RegistrarError::Exhausted)?;
        table.by_major.insert(major, name.to_owned());
        Ok(DeviceNumber { major, minor: 0 })
    }

    fn unregister(&mut self, number: DeviceNumber) {
        self.table().by_major.remove(&number.major);
    }
}
