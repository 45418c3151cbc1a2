use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Name the device is registered under.
    #[serde(default = "defaults::name")]
    pub name: String,
    /// Size of the backing buffer in bytes, terminator included.
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    /// Delay before readers are let through, in milliseconds.
    #[serde(default = "defaults::ready_delay_ms")]
    pub ready_delay_ms: u64,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn name() -> String {
        "slotdev".into()
    }

    pub fn capacity() -> usize {
        1024
    }

    pub fn ready_delay_ms() -> u64 {
        25_000
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: defaults::name(),
            capacity: defaults::capacity(),
            ready_delay_ms: defaults::ready_delay_ms(),
            log_level: defaults::log_level(),
        }
    }
}

impl DeviceConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let device_config: DeviceConfig = toml::from_str(&toml_to_str)?;
        Ok(device_config)
    }

    #[inline]
    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: DeviceConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, DeviceConfig::default());
        assert_eq!(cfg.capacity, 1024);
        assert_eq!(cfg.ready_delay(), Duration::from_secs(25));
    }

    #[test]
    fn fields_override_defaults() {
        let cfg: DeviceConfig = toml::from_str(
            r#"
            name = "scratch"
            capacity = 64
            ready_delay_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.name, "scratch");
        assert_eq!(cfg.capacity, 64);
        assert_eq!(cfg.ready_delay(), Duration::from_millis(10));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = DeviceConfig::load("/nonexistent/slotdev.toml").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Read { ref path, .. } if path == "/nonexistent/slotdev.toml"
        ));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let path = std::env::temp_dir().join(format!("slotdev_cfg_{}.toml", std::process::id()));
        std::fs::write(&path, "capacity = \"lots\"").unwrap();
        let err = DeviceConfig::load(path.to_string_lossy().into_owned()).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
