//! Format-agnostic session layer.
//!
//! Everything here talks to the plugin through the capability traits in
//! [`model`]; the COM side lives in `crate::vst3`.

pub mod automation;
pub mod bus;
pub mod cc_map;
pub mod context;
pub mod diagnostics;
pub mod edit;
pub mod events;
pub mod model;
pub mod notify;
pub mod realtime;
pub mod session;
pub mod state;
pub mod thread_check;
pub mod transport;
pub mod types;

pub use realtime::AudioHandle;
pub use session::{Lifecycle, PluginSession};
pub use types::*;
