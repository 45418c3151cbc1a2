//! Out-of-band control plane: metadata get/set and flush.
//!
//! None of these operations consult a gate. They run concurrently with
//! reads and writes, so a snapshot can be stale the moment it is taken and
//! a `set` can describe bytes that were never written. Both are accepted
//! behavior, not errors.
//!
//! # Request codes
//!
//! Codes follow the usual 32-bit ioctl packing:
//!
//! ```text
//!  31 30 | 29 ........ 16 | 15 ..... 8 | 7 ...... 0
//!   dir  |  payload size  |   magic    |   number
//! ```
//!
//! with magic `'C'` and a payload of two `u32` fields followed by a
//! 1024-byte data area.

use crate::error::DeviceError;
use crate::store::BufferStore;
use tracing::{debug, error};

pub const CONTROL_MAGIC: u8 = b'C';

/// Size of the control payload as laid out on the wire.
pub const CONTROL_PAYLOAD_SIZE: u32 = 4 + 4 + 1024;

const DIR_WRITE: u32 = 1;
const DIR_READ: u32 = 2;

const fn request_code(dir: u32, magic: u8, number: u8, size: u32) -> u32 {
    (dir << 30) | ((size & 0x3fff) << 16) | ((magic as u32) << 8) | number as u32
}

/// Reads `{size, length}` out of the device.
pub const CTL_GET_DATA: u32 = request_code(DIR_READ, CONTROL_MAGIC, 0, CONTROL_PAYLOAD_SIZE);
/// Writes `{size, length}` into the device.
pub const CTL_SET_DATA: u32 = request_code(DIR_WRITE, CONTROL_MAGIC, 1, CONTROL_PAYLOAD_SIZE);
/// Empties the buffer and restores the default size.
pub const CTL_FLUSH: u32 = request_code(DIR_WRITE, CONTROL_MAGIC, 2, CONTROL_PAYLOAD_SIZE);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Get,
    Set,
    Flush,
}

impl ControlCommand {
    #[inline]
    pub fn code(self) -> u32 {
        match self {
            ControlCommand::Get => CTL_GET_DATA,
            ControlCommand::Set => CTL_SET_DATA,
            ControlCommand::Flush => CTL_FLUSH,
        }
    }
}

impl TryFrom<u32> for ControlCommand {
    type Error = DeviceError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            CTL_GET_DATA => Ok(ControlCommand::Get),
            CTL_SET_DATA => Ok(ControlCommand::Set),
            CTL_FLUSH => Ok(ControlCommand::Flush),
            _ => Err(DeviceError::InvalidArgument),
        }
    }
}

/// Buffer metadata exchanged through the control plane.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Logical capacity in bytes.
    pub size: u32,
    /// Valid bytes in the buffer.
    pub length: u32,
}

pub struct ControlPlane<'a> {
    store: &'a BufferStore,
}

impl<'a> ControlPlane<'a> {
    pub fn new(store: &'a BufferStore) -> Self {
        Self { store }
    }

    pub fn get_metadata(&self) -> Metadata {
        Metadata {
            size: self.store.capacity(),
            length: self.store.len(),
        }
    }

    /// Overwrites capacity and length verbatim. Buffer bytes are untouched.
    pub fn set_metadata(&self, meta: Metadata) {
        self.store.set_metadata(meta.size, meta.length);
    }

    pub fn flush(&self) {
        self.store.flush();
    }

    /// Decodes `code` and runs it against `payload`.
    ///
    /// A missing payload is rejected before the code is looked at, so an
    /// unknown code with no payload reports `BadAddress`.
    pub fn dispatch(&self, code: u32, payload: Option<&mut Metadata>) -> Result<(), DeviceError> {
        let Some(payload) = payload else {
            error!(code, "control request without payload");
            return Err(DeviceError::BadAddress);
        };

        let command = ControlCommand::try_from(code).inspect_err(|_| {
            error!(code, "invalid control command");
        })?;

        match command {
            ControlCommand::Get => {
                *payload = self.get_metadata();
                debug!(size = payload.size, length = payload.length, "get data");
            }
            ControlCommand::Set => {
                debug!(size = payload.size, length = payload.length, "set data");
                self.set_metadata(*payload);
            }
            ControlCommand::Flush => {
                debug!("flush");
                self.flush();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_codes_match_ioctl_packing() {
        assert_eq!(CTL_GET_DATA, 0x8408_4300);
        assert_eq!(CTL_SET_DATA, 0x4408_4301);
        assert_eq!(CTL_FLUSH, 0x4408_4302);
        for cmd in [ControlCommand::Get, ControlCommand::Set, ControlCommand::Flush] {
            assert_eq!(ControlCommand::try_from(cmd.code()).unwrap(), cmd);
        }
    }

    #[test]
    fn set_then_get_round_trips_even_past_written_bytes() {
        let store = BufferStore::with_capacity(64).unwrap();
        let ctl = ControlPlane::new(&store);
        store.write(b"ab");

        let mut meta = Metadata {
            size: 5000,
            length: 900,
        };
        ctl.dispatch(CTL_SET_DATA, Some(&mut meta)).unwrap();

        let mut out = Metadata::default();
        ctl.dispatch(CTL_GET_DATA, Some(&mut out)).unwrap();
        assert_eq!(out, meta);
    }

    #[test]
    fn flush_restores_defaults() {
        let store = BufferStore::with_capacity(64).unwrap();
        let ctl = ControlPlane::new(&store);
        store.write(b"abc");
        ctl.set_metadata(Metadata { size: 8, length: 3 });

        ctl.dispatch(CTL_FLUSH, Some(&mut Metadata::default())).unwrap();
        assert_eq!(ctl.get_metadata(), Metadata { size: 64, length: 0 });
    }

    #[test]
    fn unknown_code_is_invalid_argument() {
        let store = BufferStore::with_capacity(8).unwrap();
        let ctl = ControlPlane::new(&store);
        let err = ctl.dispatch(0xdead, Some(&mut Metadata::default())).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument));
    }

    #[test]
    fn missing_payload_is_bad_address() {
        let store = BufferStore::with_capacity(8).unwrap();
        let ctl = ControlPlane::new(&store);
        assert!(matches!(
            ctl.dispatch(CTL_GET_DATA, None),
            Err(DeviceError::BadAddress)
        ));
        assert!(matches!(ctl.dispatch(0xdead, None), Err(DeviceError::BadAddress)));
    }
}
