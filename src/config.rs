//! Configuration for the assistant.
//!
//! Values are loaded in order (later wins):
//! 1. Compiled defaults
//! 2. `--config <path>`, or `./vna.toml` when no path is given
//! 3. Environment variables (`VNA_ADDRESS`, `VNA_LOG_LEVEL`)
//!
//! ```toml
//! address = "TCPIP::10.10.10.155::5025::SOCKET"
//! read_timeout_ms = 1000
//! fine_end = 30
//!
//! [timing]
//! ack_attempts = 10
//! save_poll_ms = 5000
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::result::ConfigError;
use crate::sequencer::DEFAULT_FINE_END;
use crate::session::Timing;
use crate::transport::OpenOptions;

pub const LOCAL_CONFIG: &str = "vna.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VnaConfig {
    /// VISA resource string of the analyzer.
    pub address: String,
    pub serial_baud: u32,
    /// How long a single acknowledgement read waits before counting as a miss.
    pub read_timeout_ms: u64,
    pub log_level: String,
    /// Last fine sub-band calibration state.
    pub fine_end: i32,
    pub timing: Timing,
}

impl Default for VnaConfig {
    fn default() -> Self {
        VnaConfig {
            address: "TCPIP::10.10.10.155::5025::SOCKET".to_owned(),
            serial_baud: 9600,
            read_timeout_ms: 1000,
            log_level: "info".to_owned(),
            fine_end: DEFAULT_FINE_END,
            timing: Timing::default(),
        }
    }
}

impl VnaConfig {
    /// Loads `path` if given, else `./vna.toml` if it exists, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Some(PathBuf::from(LOCAL_CONFIG)).filter(|p| p.exists()),
        };
        let mut config = match file {
            Some(file) => Self::from_file(&file)?,
            None => VnaConfig::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup("VNA_ADDRESS") {
            self.address = address;
        }
        if let Some(level) = lookup("VNA_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            serial_baud: self.serial_baud,
        }
    }
}
