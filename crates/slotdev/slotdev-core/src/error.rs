//! Error surface shared by every device operation.

use crate::registrar::RegistrarError;

/// Failures reported by the device and its sessions.
///
/// Nothing here is retried by the device itself. `WouldBlock` and
/// `Interrupted` are the two outcomes a caller may reasonably retry.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The gate (or the readiness signal) was unavailable and the session
    /// was opened non-blocking.
    #[error("resource temporarily unavailable")]
    WouldBlock,

    /// A blocking wait was cancelled by an interrupt; safe to retry.
    #[error("interrupted while waiting")]
    Interrupted,

    /// The payload for a transfer was missing.
    #[error("bad address")]
    BadAddress,

    #[error("invalid argument")]
    InvalidArgument,

    /// Allocation of device state failed during initialization.
    #[error("out of memory allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("device registration failed")]
    Registration(#[from] RegistrarError),

    #[error("failed to spawn readiness timer")]
    TimerSpawn(#[source] std::io::Error),
}

impl DeviceError {
    /// Whether the same call can be issued again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeviceError::WouldBlock | DeviceError::Interrupted)
    }
}
