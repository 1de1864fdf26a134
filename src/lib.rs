//! Host-side VST3 plugin bridge.
//!
//! A [`PluginSession`] owns one loaded plugin: it negotiates buses, runs the
//! per-block process call, translates host events into the plugin's event
//! list and automation queues, and reports what the plugin asks of the
//! host through a notification channel the host drains.  The audio thread
//! processes through an [`AudioHandle`] taken from the session.
//!
//! ```no_run
//! use vst3_bridge::{BridgeConfig, PluginSession};
//!
//! let config = BridgeConfig::default();
//! let mut session = PluginSession::load(
//!     "/usr/lib/vst3/Plugin.vst3".as_ref(),
//!     "0123456789ABCDEF0123456789ABCDEF",
//!     &config,
//! )?;
//! for note in session.poll_notifications() {
//!     println!("{:?}", note);
//! }
//! # Ok::<(), vst3_bridge::BridgeError>(())
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod vst3;
pub mod wire;

pub use config::{BridgeConfig, HostInfo};
pub use error::{BridgeError, LoadStage, Result};
pub use plugin::events::{HostIssuedEvent, HostNotification, ParameterChange};
pub use plugin::{AudioHandle, Lifecycle, PluginSession};
