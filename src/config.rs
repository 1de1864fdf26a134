//! Bridge configuration.
//!
//! Everything here has a sensible default so a host can construct
//! `BridgeConfig::default()` and go.  Hosts that want to tune scratch sizes
//! or the reported host identity can drop a JSON file into the user config
//! directory (`<config_dir>/vst3-bridge/config.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plugin::automation::ScratchLimits;
use crate::plugin::types::{ProcessMode, ProcessSetup};

/// Identity reported to plugins through the host-application object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            name: "vst3-bridge".to_string(),
            vendor: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: HostInfo,
    pub sample_rate: f64,
    pub max_block_size: u32,
    pub process_mode: ProcessMode,
    /// Discrete events accepted per process block; extra events are dropped.
    pub max_events_per_block: usize,
    /// Distinct parameter ids automated per process block.
    pub max_parameter_changes: usize,
    /// `None` means "on in debug builds only".
    pub thread_checks: Option<bool>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: HostInfo::default(),
            sample_rate: 48_000.0,
            max_block_size: 1024,
            process_mode: ProcessMode::Realtime,
            max_events_per_block: 1024,
            max_parameter_changes: 512,
            thread_checks: None,
        }
    }
}

impl BridgeConfig {
    /// Default location of the config file, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("vst3-bridge").join("config.json"))
    }

    /// Load the config from the default location, falling back to defaults
    /// when the file does not exist.  A file that exists but fails to parse
    /// is an error.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded bridge config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn process_setup(&self) -> ProcessSetup {
        ProcessSetup {
            mode: self.process_mode,
            sample_rate: self.sample_rate,
            max_block_size: self.max_block_size.max(1),
        }
    }

    pub fn scratch_limits(&self) -> ScratchLimits {
        ScratchLimits {
            max_events: self.max_events_per_block,
            max_parameter_changes: self.max_parameter_changes,
        }
    }

    pub fn thread_checks_enabled(&self) -> bool {
        self.thread_checks.unwrap_or(cfg!(debug_assertions))
    }
}
