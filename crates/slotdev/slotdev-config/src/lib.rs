mod config;

pub use config::{ConfigError, DeviceConfig};
