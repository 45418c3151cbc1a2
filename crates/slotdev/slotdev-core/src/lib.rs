//! Synchronized single-slot byte buffer device.
//!
//! One shared buffer, two independent gates (read, write), a readiness
//! signal that opens once after a delay, and a control plane that edits
//! buffer metadata behind the gates' backs.
//!
//! ```text
//!  session.write ──▶ [write gate] ──────────────────────────▶ BufferStore
//!  session.read  ──▶ [read gate] ──▶ ReadinessSignal ──────▶ BufferStore
//!  session.control ─────────────────────▶ ControlPlane ────▶ BufferStore
//! ```

mod control;
mod device;
mod error;
mod gate;
mod interrupt;
mod readiness;
mod registrar;
mod session;
mod store;

pub use control::{
    CONTROL_MAGIC, CONTROL_PAYLOAD_SIZE, CTL_FLUSH, CTL_GET_DATA, CTL_SET_DATA, ControlCommand,
    ControlPlane, Metadata,
};
pub use device::Device;
pub use error::DeviceError;
pub use gate::{AccessGate, Acquire, GateGuard};
pub use interrupt::{Interrupt, InterruptScope};
pub use readiness::{Readiness, ReadinessSignal, ReadinessTimer};
pub use registrar::{
    CharDevice, DeviceNumber, FIRST_DYNAMIC_MAJOR, InMemoryRegistrar, LAST_DYNAMIC_MAJOR,
    OpenFlags, Registrar, RegistrarError,
};
pub use session::{DeviceSession, InterruptHandle, Whence};
pub use store::BufferStore;
