//! VST3 backend.
//!
//! Implements the capability traits in `crate::plugin::model` over the COM
//! interfaces of a `.vst3` module: module loading, the host-side COM
//! objects plugins call back into, per-block process data and the editor
//! view.

pub mod com_host;
pub mod host;
pub mod module;
pub mod process;
pub mod view;

pub use host::Vst3Loader;
pub use module::{ClassInfo, Vst3Module};
