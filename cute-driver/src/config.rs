//! Configuration management for cute-driver.
//!
//! Configuration comes from a JSON file and environment variables. The C
//! ABI has no way to pass a config value, so `init_driver` builds one with
//! [`DriverConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "CUTE_DRIVER_CONFIG";
/// Environment override for [`DriverConfig::init_policy`].
pub const INIT_POLICY_ENV: &str = "CUTE_DRIVER_INIT_POLICY";
/// Environment override for [`DriverConfig::max_loopback_len`].
pub const MAX_LOOPBACK_ENV: &str = "CUTE_DRIVER_MAX_LOOPBACK_LEN";

/// What a second `init` on an initialized context does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// Second init returns an empty envelope and changes nothing.
    #[default]
    Idempotent,
    /// Second init fails with an internal error.
    Strict,
}

impl std::str::FromStr for InitPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idempotent" => Ok(InitPolicy::Idempotent),
            "strict" => Ok(InitPolicy::Strict),
            other => Err(Error::Config(format!("unknown init policy '{other}'"))),
        }
    }
}

/// Driver subsystem configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Double-init behaviour
    pub init_policy: InitPolicy,

    /// Largest payload the loopback protocol accepts, in bytes
    pub max_loopback_len: usize,

    /// Default log level when RUST_LOG is unset
    pub log_level: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            init_policy: InitPolicy::Idempotent,
            max_loopback_len: 64 * 1024,
            log_level: "info".to_string(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a specific JSON file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: DriverConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the environment.
    ///
    /// Starts from the file named by `CUTE_DRIVER_CONFIG` (or defaults),
    /// then applies the individual overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(policy) = std::env::var(INIT_POLICY_ENV) {
            config.init_policy = policy.parse()?;
        }
        if let Ok(len) = std::env::var(MAX_LOOPBACK_ENV) {
            config.max_loopback_len = len
                .parse()
                .map_err(|e| Error::Config(format!("{MAX_LOOPBACK_ENV}: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values no protocol can work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_loopback_len == 0 {
            return Err(Error::Config("max_loopback_len must be non-zero".into()));
        }
        Ok(())
    }
}
