//! Capability traits a plugin backend implements.
//!
//! A loaded plugin is a processor / controller pair plus a handful of
//! optional capabilities (MIDI mapping, channel-context listener, a link
//! between processor and controller, an editor view).  The session queries
//! the optional ones once at load time and keeps the handles; nothing is
//! re-queried per call.
//!
//! The VST3 backend implements these over COM pointers; tests implement
//! them over plain Rust mocks.

use std::path::Path;
use std::sync::Arc;

use super::automation::{ParameterQueues, ScratchLimits};
use super::bus::BusConfiguration;
use super::context::HostContext;
use super::edit::EditTracker;
use super::events::PluginEvent;
use super::state::StateBuffer;
use super::transport::TransportContext;
use super::types::*;
use crate::error::Result;

/// A plugin call returned something other than "ok".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("plugin returned result code {code:#x}")]
pub struct PluginCallError {
    pub code: i32,
}

pub type CallResult<T = ()> = std::result::Result<T, PluginCallError>;

/// Everything the processor needs for one block besides the audio buffers.
#[derive(Debug, Clone, Copy)]
pub struct ProcessBlock<'a> {
    pub num_samples: usize,
    pub mode: ProcessMode,
    pub events: &'a [PluginEvent],
    pub parameters: &'a ParameterQueues,
    pub transport: &'a TransportContext,
}

/// Audio buffers as `[bus][channel][sample]`.
pub type InputBuffers<'a, 'b, 'c> = &'a [&'b [&'c [f32]]];
pub type OutputBuffers<'a, 'b, 'c> = &'a mut [&'b mut [&'c mut [f32]]];

pub trait Processor: Send {
    fn bus_count(&self, media: MediaKind, direction: BusDirection) -> usize;
    fn bus_info(&self, media: MediaKind, direction: BusDirection, index: usize) -> Option<BusInfo>;
    fn activate_bus(
        &mut self,
        media: MediaKind,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> CallResult;
    fn bus_arrangement(&self, direction: BusDirection, index: usize) -> Option<SpeakerArrangement>;
    fn set_bus_arrangements(
        &mut self,
        inputs: &[SpeakerArrangement],
        outputs: &[SpeakerArrangement],
    ) -> CallResult;

    fn setup_processing(&mut self, setup: &ProcessSetup) -> CallResult;
    /// Size any per-block scratch for the negotiated layout.  UI thread.
    fn prepare(&mut self, _buses: &BusConfiguration, _limits: &ScratchLimits) {}
    fn set_active(&mut self, active: bool) -> CallResult;
    fn set_processing(&mut self, processing: bool) -> CallResult;
    fn latency_samples(&self) -> u32;
    fn tail_samples(&self) -> u32;

    /// Audio thread.  Must not allocate.
    fn process(
        &mut self,
        block: &ProcessBlock<'_>,
        inputs: InputBuffers<'_, '_, '_>,
        outputs: OutputBuffers<'_, '_, '_>,
    ) -> CallResult;
    /// Hand `sink` the last value the plugin wrote for each parameter it
    /// reported during the previous `process` call.  Audio thread.
    fn read_output_parameters(&self, _sink: &mut dyn FnMut(ParamId, f64)) {}

    fn get_state(&mut self, stream: &mut StateBuffer) -> CallResult;
    fn set_state(&mut self, stream: &mut StateBuffer) -> CallResult;
    fn terminate(&mut self);
}

pub trait Controller: Send {
    fn parameter_count(&self) -> usize;
    fn parameter_descriptor(&self, index: usize) -> Option<ParameterDescriptor>;
    fn param_normalized(&self, id: ParamId) -> f64;
    fn param_string(&self, id: ParamId, value: f64) -> Option<String>;
    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> CallResult;

    /// Push the processor's state into the controller.
    fn set_component_state(&mut self, stream: &mut StateBuffer) -> CallResult;
    fn get_state(&mut self, stream: &mut StateBuffer) -> CallResult;
    fn set_state(&mut self, stream: &mut StateBuffer) -> CallResult;

    fn midi_mapping(&self) -> Option<Box<dyn MidiMapping>>;
    fn info_listener(&self) -> Option<Box<dyn InfoListener>>;
    fn create_view(&mut self) -> Option<Box<dyn PlugView>>;
    fn terminate(&mut self);
}

pub trait MidiMapping: Send {
    fn controller_assignment(&self, bus: i32, channel: i16, controller: i16) -> Option<ParamId>;
}

pub trait InfoListener: Send {
    fn set_channel_context(&mut self, context: &TrackContext) -> CallResult;
}

/// Bidirectional link between distinct processor and controller objects.
pub trait ConnectionLink: Send {
    fn connect(&mut self) -> CallResult;
    fn disconnect(&mut self);
}

pub trait PlugView: Send {
    fn is_platform_supported(&self, kind: WindowKind) -> bool;
    fn attach(&mut self, parent: WindowHandle, kind: WindowKind) -> CallResult;
    fn size(&self) -> Option<ViewSize>;
    /// Tell the view its window now has `size`.
    fn set_size(&mut self, size: ViewSize) -> CallResult;
    fn removed(&mut self);
}

/// A freshly instantiated and initialized plugin.
pub struct PluginObjects {
    pub identity: PluginIdentity,
    pub processor: Box<dyn Processor>,
    pub controller: Box<dyn Controller>,
    /// Present only when processor and controller are separate objects
    /// that both expose connection endpoints.
    pub connection: Option<Box<dyn ConnectionLink>>,
}

/// What a loader gets to wire into the plugin.
pub struct LoadContext<'a> {
    pub host: &'a Arc<HostContext>,
    pub tracker: &'a Arc<EditTracker>,
}

pub trait PluginLoader {
    /// Open `path`, find `class_id`, instantiate and initialize it.
    fn load(&self, path: &Path, class_id: &str, cx: &LoadContext<'_>) -> Result<PluginObjects>;
}
