//! Error types for the plugin bridge.

use std::path::PathBuf;
use thiserror::Error;

use crate::plugin::model::PluginCallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Opening,
    Factory,
    ClassLookup,
    Instantiation,
    Initialization,
    Connection,
    Setup,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Opening => write!(f, "opening module"),
            LoadStage::Factory => write!(f, "getting factory"),
            LoadStage::ClassLookup => write!(f, "looking up class"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Initialization => write!(f, "initializing"),
            LoadStage::Connection => write!(f, "connecting processor and controller"),
            LoadStage::Setup => write!(f, "setting up processing"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Plugin load failed while {stage}: {reason}")]
    Load { stage: LoadStage, reason: String },

    #[error("Plugin module not found: {0}")]
    ModuleNotFound(PathBuf),

    #[error("Plugin class {0} not found in module")]
    ClassNotFound(String),

    #[error("Plugin call {call} failed with code {code:#x}")]
    Plugin { call: &'static str, code: i32 },

    #[error("Not supported by plugin: {0}")]
    Unsupported(&'static str),

    #[error("Session is not in a valid state for {0}")]
    InvalidState(&'static str),

    #[error("No parameter at index {0}")]
    ParameterNotFound(usize),

    #[error("Malformed state blob: {0}")]
    MalformedState(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn load(stage: LoadStage, reason: impl Into<String>) -> Self {
        BridgeError::Load {
            stage,
            reason: reason.into(),
        }
    }

    /// Attach the name of the failing plugin call to a raw result code.
    pub fn plugin(call: &'static str, err: PluginCallError) -> Self {
        BridgeError::Plugin {
            call,
            code: err.code,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
