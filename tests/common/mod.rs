//! In-memory plugin used by the session tests.
//!
//! Every capability call is appended to a shared [`Recorder`] so tests can
//! check the order in which the session drives the plugin.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use vst3_bridge::plugin::automation::ScratchLimits;
use vst3_bridge::plugin::bus::BusConfiguration;
use vst3_bridge::plugin::events::{HostIssuedEvent, PluginEvent};
use vst3_bridge::plugin::model::*;
use vst3_bridge::plugin::state::StateBuffer;
use vst3_bridge::plugin::thread_check::{FixedThreadRole, ThreadRole};
use vst3_bridge::plugin::types::*;
use vst3_bridge::{AudioHandle, BridgeConfig, BridgeError, PluginSession};

pub const CLASS_ID: &str = "0123456789ABCDEF0123456789ABCDEF";

/// Bus layout the mock reports.  Tests may change it and then signal an IO
/// change.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub audio_inputs: Vec<u32>,
    pub audio_outputs: Vec<u32>,
    pub event_inputs: usize,
    /// Output buses the processor gives no info for.
    pub hidden_outputs: Vec<usize>,
}

/// One automation point the processor received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceivedPoint {
    pub id: ParamId,
    pub sample_offset: i32,
    pub value: f64,
}

#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
    pub layout: Mutex<Layout>,
    pub latency: AtomicU32,
    pub tail: AtomicU32,
    pub fail_activate: AtomicBool,

    pub processor_state: Mutex<Vec<u8>>,
    pub controller_state: Mutex<Vec<u8>>,
    /// Last component state the controller was handed.
    pub component_state_seen: Mutex<Vec<u8>>,
    pub controller_values: Mutex<HashMap<ParamId, f64>>,

    pub events: Mutex<Vec<PluginEvent>>,
    pub points: Mutex<Vec<ReceivedPoint>>,
    pub modes: Mutex<Vec<ProcessMode>>,
    pub setups: Mutex<Vec<ProcessSetup>>,
    pub track_context: Mutex<Option<TrackContext>>,

    /// Written to the output parameter changes after every block.
    pub output_values: Mutex<Vec<(ParamId, f64)>>,
    /// When set, `processor.get_state` waits on it twice: once on entry and
    /// once before returning.
    pub state_gate: Mutex<Option<Arc<Barrier>>>,
}

impl Recorder {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Index of the first occurrence of `call`.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }

    /// Only the calls listed in `wanted`, in order.
    pub fn calls_among(&self, wanted: &[&str]) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| wanted.contains(&c.as_str()))
            .cloned()
            .collect()
    }
}

/// What the mock plugin supports.
#[derive(Clone)]
pub struct MockPlugin {
    pub layout: Layout,
    pub parameters: Vec<ParameterDescriptor>,
    /// `(controller, parameter)`; controller 129 is pitch bend.
    pub midi_assignments: Vec<(i16, ParamId)>,
    pub has_view: bool,
    pub view_kind: WindowKind,
    pub has_info_listener: bool,
    pub separate_controller: bool,
}

impl Default for MockPlugin {
    fn default() -> Self {
        Self {
            layout: Layout {
                audio_inputs: vec![2],
                audio_outputs: vec![2],
                event_inputs: 1,
                ..Default::default()
            },
            parameters: vec![
                descriptor(5, "Gain", "dB"),
                descriptor(7, "Cutoff", "Hz"),
            ],
            midi_assignments: Vec::new(),
            has_view: true,
            view_kind: WindowKind::X11,
            has_info_listener: true,
            separate_controller: true,
        }
    }
}

pub fn descriptor(id: ParamId, title: &str, units: &str) -> ParameterDescriptor {
    ParameterDescriptor {
        id,
        title: title.to_string(),
        short_title: title.chars().take(3).collect(),
        units: units.to_string(),
        step_count: 0,
        default_value: 0.5,
        flags: ParameterFlags {
            automatable: true,
            ..Default::default()
        },
    }
}

pub struct MockLoader {
    pub plugin: MockPlugin,
    pub recorder: Arc<Recorder>,
    pub fail: bool,
}

impl PluginLoader for MockLoader {
    fn load(
        &self,
        path: &Path,
        class_id: &str,
        _cx: &LoadContext<'_>,
    ) -> vst3_bridge::Result<PluginObjects> {
        self.recorder.record("load");
        if self.fail {
            return Err(BridgeError::ClassNotFound(class_id.to_string()));
        }
        *self.recorder.layout.lock() = self.plugin.layout.clone();
        Ok(PluginObjects {
            identity: PluginIdentity {
                id: class_id.to_string(),
                name: "Mock Synth".to_string(),
                vendor: "Test Vendor".to_string(),
                version: path.display().to_string(),
            },
            processor: Box::new(MockProcessor {
                recorder: self.recorder.clone(),
            }),
            controller: Box::new(MockController {
                plugin: self.plugin.clone(),
                recorder: self.recorder.clone(),
            }),
            connection: self.plugin.separate_controller.then(|| {
                Box::new(MockConnection {
                    recorder: self.recorder.clone(),
                }) as Box<dyn ConnectionLink>
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct MockProcessor {
    recorder: Arc<Recorder>,
}

impl Processor for MockProcessor {
    fn bus_count(&self, media: MediaKind, direction: BusDirection) -> usize {
        let layout = self.recorder.layout.lock();
        match (media, direction) {
            (MediaKind::Audio, BusDirection::Input) => layout.audio_inputs.len(),
            (MediaKind::Audio, BusDirection::Output) => layout.audio_outputs.len(),
            (MediaKind::Event, BusDirection::Input) => layout.event_inputs,
            (MediaKind::Event, BusDirection::Output) => 0,
        }
    }

    fn bus_info(&self, media: MediaKind, direction: BusDirection, index: usize) -> Option<BusInfo> {
        let layout = self.recorder.layout.lock();
        let channel_count = match (media, direction) {
            (MediaKind::Audio, BusDirection::Input) => *layout.audio_inputs.get(index)?,
            (MediaKind::Audio, BusDirection::Output) if layout.hidden_outputs.contains(&index) => {
                return None;
            }
            (MediaKind::Audio, BusDirection::Output) => *layout.audio_outputs.get(index)?,
            (MediaKind::Event, BusDirection::Input) if index < layout.event_inputs => 16,
            _ => return None,
        };
        Some(BusInfo {
            name: format!("{:?} {:?} {}", media, direction, index),
            channel_count,
        })
    }

    fn activate_bus(
        &mut self,
        media: MediaKind,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> CallResult {
        self.recorder.record(format!(
            "activate_bus({:?},{:?},{},{})",
            media, direction, index, active
        ));
        Ok(())
    }

    fn bus_arrangement(&self, direction: BusDirection, index: usize) -> Option<SpeakerArrangement> {
        let layout = self.recorder.layout.lock();
        let channels = match direction {
            BusDirection::Input => layout.audio_inputs.get(index)?,
            BusDirection::Output => layout.audio_outputs.get(index)?,
        };
        Some((1u64 << channels) - 1)
    }

    fn set_bus_arrangements(
        &mut self,
        inputs: &[SpeakerArrangement],
        outputs: &[SpeakerArrangement],
    ) -> CallResult {
        self.recorder.record(format!(
            "set_bus_arrangements({},{})",
            inputs.len(),
            outputs.len()
        ));
        Ok(())
    }

    fn setup_processing(&mut self, setup: &ProcessSetup) -> CallResult {
        self.recorder.record("setup_processing");
        self.recorder.setups.lock().push(*setup);
        Ok(())
    }

    fn prepare(&mut self, _buses: &BusConfiguration, _limits: &ScratchLimits) {
        self.recorder.record("prepare");
    }

    fn set_active(&mut self, active: bool) -> CallResult {
        self.recorder.record(format!("set_active({})", active));
        if active && self.recorder.fail_activate.load(Ordering::Relaxed) {
            return Err(PluginCallError { code: 1 });
        }
        Ok(())
    }

    fn set_processing(&mut self, processing: bool) -> CallResult {
        self.recorder.record(format!("set_processing({})", processing));
        Ok(())
    }

    fn latency_samples(&self) -> u32 {
        self.recorder.record("latency_samples");
        self.recorder.latency.load(Ordering::Relaxed)
    }

    fn tail_samples(&self) -> u32 {
        self.recorder.record("tail_samples");
        self.recorder.tail.load(Ordering::Relaxed)
    }

    fn process(
        &mut self,
        block: &ProcessBlock<'_>,
        inputs: InputBuffers<'_, '_, '_>,
        outputs: OutputBuffers<'_, '_, '_>,
    ) -> CallResult {
        self.recorder.record("process");
        self.recorder.events.lock().extend_from_slice(block.events);
        self.recorder.modes.lock().push(block.mode);
        {
            let mut points = self.recorder.points.lock();
            for queue in block.parameters.as_slice() {
                for point in queue.points() {
                    points.push(ReceivedPoint {
                        id: queue.id,
                        sample_offset: point.sample_offset,
                        value: point.value,
                    });
                }
            }
        }
        // Pass-through, so tests can see the plugin actually ran.
        for (out_bus, in_bus) in outputs.iter_mut().zip(inputs) {
            for (out_ch, in_ch) in out_bus.iter_mut().zip(in_bus.iter()) {
                out_ch[..block.num_samples].copy_from_slice(&in_ch[..block.num_samples]);
            }
        }
        Ok(())
    }

    fn read_output_parameters(&self, sink: &mut dyn FnMut(ParamId, f64)) {
        for &(id, value) in self.recorder.output_values.lock().iter() {
            sink(id, value);
        }
    }

    fn get_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        self.recorder.record("processor.get_state");
        let gate = self.recorder.state_gate.lock().clone();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        stream
            .write_all(&self.recorder.processor_state.lock())
            .map_err(|_| PluginCallError { code: 1 })
    }

    fn set_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        self.recorder.record("processor.set_state");
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .map_err(|_| PluginCallError { code: 1 })?;
        *self.recorder.processor_state.lock() = data;
        Ok(())
    }

    fn terminate(&mut self) {
        self.recorder.record("processor.terminate");
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct MockController {
    plugin: MockPlugin,
    recorder: Arc<Recorder>,
}

impl Controller for MockController {
    fn parameter_count(&self) -> usize {
        self.plugin.parameters.len()
    }

    fn parameter_descriptor(&self, index: usize) -> Option<ParameterDescriptor> {
        self.plugin.parameters.get(index).cloned()
    }

    fn param_normalized(&self, id: ParamId) -> f64 {
        self.recorder
            .controller_values
            .lock()
            .get(&id)
            .copied()
            .unwrap_or(0.5)
    }

    fn param_string(&self, id: ParamId, value: f64) -> Option<String> {
        // Parameter 7 has no text representation.
        (id != 7).then(|| format!("{:.1} units", value * 10.0))
    }

    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> CallResult {
        self.recorder.record(format!("set_param_normalized({})", id));
        self.recorder.controller_values.lock().insert(id, value);
        Ok(())
    }

    fn set_component_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        self.recorder.record("controller.set_component_state");
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .map_err(|_| PluginCallError { code: 1 })?;
        *self.recorder.component_state_seen.lock() = data;
        Ok(())
    }

    fn get_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        self.recorder.record("controller.get_state");
        stream
            .write_all(&self.recorder.controller_state.lock())
            .map_err(|_| PluginCallError { code: 1 })
    }

    fn set_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        self.recorder.record("controller.set_state");
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .map_err(|_| PluginCallError { code: 1 })?;
        *self.recorder.controller_state.lock() = data;
        Ok(())
    }

    fn midi_mapping(&self) -> Option<Box<dyn MidiMapping>> {
        if self.plugin.midi_assignments.is_empty() {
            return None;
        }
        Some(Box::new(MockMapping {
            assignments: self.plugin.midi_assignments.clone(),
            recorder: self.recorder.clone(),
        }))
    }

    fn info_listener(&self) -> Option<Box<dyn InfoListener>> {
        self.plugin.has_info_listener.then(|| {
            Box::new(MockInfoListener {
                recorder: self.recorder.clone(),
            }) as Box<dyn InfoListener>
        })
    }

    fn create_view(&mut self) -> Option<Box<dyn PlugView>> {
        self.recorder.record("create_view");
        self.plugin.has_view.then(|| {
            Box::new(MockView {
                kind: self.plugin.view_kind,
                size: ViewSize {
                    width: 640,
                    height: 480,
                },
                recorder: self.recorder.clone(),
            }) as Box<dyn PlugView>
        })
    }

    fn terminate(&mut self) {
        self.recorder.record("controller.terminate");
    }
}

struct MockMapping {
    assignments: Vec<(i16, ParamId)>,
    recorder: Arc<Recorder>,
}

impl MidiMapping for MockMapping {
    fn controller_assignment(&self, _bus: i32, _channel: i16, controller: i16) -> Option<ParamId> {
        self.recorder.record(format!("controller_assignment({})", controller));
        self.assignments
            .iter()
            .find(|(c, _)| *c == controller)
            .map(|(_, id)| *id)
    }
}

struct MockInfoListener {
    recorder: Arc<Recorder>,
}

impl InfoListener for MockInfoListener {
    fn set_channel_context(&mut self, context: &TrackContext) -> CallResult {
        self.recorder.record("set_channel_context");
        *self.recorder.track_context.lock() = Some(context.clone());
        Ok(())
    }
}

struct MockConnection {
    recorder: Arc<Recorder>,
}

impl ConnectionLink for MockConnection {
    fn connect(&mut self) -> CallResult {
        self.recorder.record("connect");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.recorder.record("disconnect");
    }
}

struct MockView {
    kind: WindowKind,
    size: ViewSize,
    recorder: Arc<Recorder>,
}

impl PlugView for MockView {
    fn is_platform_supported(&self, kind: WindowKind) -> bool {
        kind == self.kind
    }

    fn attach(&mut self, _parent: WindowHandle, kind: WindowKind) -> CallResult {
        self.recorder.record(format!("view.attach({:?})", kind));
        Ok(())
    }

    fn size(&self) -> Option<ViewSize> {
        Some(self.size)
    }

    fn set_size(&mut self, size: ViewSize) -> CallResult {
        self.recorder
            .record(format!("view.set_size({}x{})", size.width, size.height));
        self.size = size;
        Ok(())
    }

    fn removed(&mut self) {
        self.recorder.record("view.removed");
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub session: PluginSession,
    pub recorder: Arc<Recorder>,
    pub thread: Arc<FixedThreadRole>,
}

impl Harness {
    pub fn on_audio_thread<T>(&mut self, f: impl FnOnce(&mut PluginSession) -> T) -> T {
        self.thread.set(ThreadRole::Audio);
        let out = f(&mut self.session);
        self.thread.set(ThreadRole::Ui);
        out
    }
}

pub fn config() -> BridgeConfig {
    BridgeConfig {
        sample_rate: 44_100.0,
        max_block_size: 64,
        ..Default::default()
    }
}

pub fn try_load(
    plugin: MockPlugin,
    recorder: Arc<Recorder>,
) -> vst3_bridge::Result<(PluginSession, Arc<FixedThreadRole>)> {
    vst3_bridge::logging::init_for_tests();
    let thread = Arc::new(FixedThreadRole::new(ThreadRole::Ui));
    let loader = MockLoader {
        plugin,
        recorder,
        fail: false,
    };
    let session = PluginSession::load_with(
        &loader,
        Path::new("/opt/vst3/Mock.vst3"),
        CLASS_ID,
        &config(),
        thread.clone(),
    )?;
    Ok((session, thread))
}

pub fn load(plugin: MockPlugin) -> Harness {
    let recorder = Arc::new(Recorder::default());
    let (session, thread) = match try_load(plugin, recorder.clone()) {
        Ok(loaded) => loaded,
        Err(e) => panic!("mock plugin failed to load: {}", e),
    };
    Harness {
        session,
        recorder,
        thread,
    }
}

/// `[bus][channel][sample]` buffers shaped after `channels`.
pub fn buffers(channels: &[u32], samples: usize, fill: f32) -> Vec<Vec<Vec<f32>>> {
    channels
        .iter()
        .map(|&n| (0..n).map(|_| vec![fill; samples]).collect())
        .collect()
}

/// Run one block with inputs filled with `0.5` and outputs pre-filled with
/// `1.0`, returning the outputs.
pub fn run_block(
    session: &mut PluginSession,
    details: &ProcessDetails,
    inputs: &[u32],
    outputs: &[u32],
    events: &[HostIssuedEvent],
) -> Vec<Vec<Vec<f32>>> {
    run_block_with(details, inputs, outputs, |ins, outs| {
        session.process(details, ins, outs, events)
    })
}

/// [`run_block`] through an audio handle.
pub fn run_audio_block(
    audio: &AudioHandle,
    details: &ProcessDetails,
    inputs: &[u32],
    outputs: &[u32],
    events: &[HostIssuedEvent],
) -> Vec<Vec<Vec<f32>>> {
    run_block_with(details, inputs, outputs, |ins, outs| {
        audio.process(details, ins, outs, events)
    })
}

fn run_block_with(
    details: &ProcessDetails,
    inputs: &[u32],
    outputs: &[u32],
    process: impl FnOnce(&[&[&[f32]]], &mut [&mut [&mut [f32]]]),
) -> Vec<Vec<Vec<f32>>> {
    let samples = details.block_size as usize;
    let ins = buffers(inputs, samples, 0.5);
    let mut outs = buffers(outputs, samples, 1.0);
    {
        let in_channels: Vec<Vec<&[f32]>> = ins
            .iter()
            .map(|bus| bus.iter().map(|ch| ch.as_slice()).collect())
            .collect();
        let in_buses: Vec<&[&[f32]]> = in_channels.iter().map(|bus| bus.as_slice()).collect();
        let mut out_channels: Vec<Vec<&mut [f32]>> = outs
            .iter_mut()
            .map(|bus| bus.iter_mut().map(|ch| ch.as_mut_slice()).collect())
            .collect();
        let mut out_buses: Vec<&mut [&mut [f32]]> = out_channels
            .iter_mut()
            .map(|bus| bus.as_mut_slice())
            .collect();
        process(&in_buses, &mut out_buses);
    }
    outs
}

pub fn block(size: u32) -> ProcessDetails {
    ProcessDetails {
        sample_rate: 44_100.0,
        block_size: size,
        ..Default::default()
    }
}
