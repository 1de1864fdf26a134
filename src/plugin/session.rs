//! A loaded plugin and its lifecycle.
//!
//! `PluginSession` owns the processor / controller pair and everything
//! derived from it: the negotiated buses, the MIDI CC map, the editor view.
//! All of its methods belong to the UI thread.  The audio thread processes
//! through an [`AudioHandle`], which shares the processor with the session
//! and never waits for it.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::automation::ScratchLimits;
use super::bus::{self, BusConfiguration};
use super::cc_map::MidiCcMap;
use super::context::HostContext;
use super::diagnostics::RealtimeDiagnostics;
use super::edit::EditTracker;
use super::events::{HostIssuedEvent, HostNotification, ParameterChange};
use super::model::*;
use super::notify::{self, Notifications};
use super::realtime::{AudioHandle, PendingValues, RealtimeState};
use super::state::{self, StateBuffer};
use super::thread_check::{MarkedThreads, ThreadGuard, ThreadIdentity};
use super::types::*;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, LoadStage, Result};
use crate::vst3::Vst3Loader;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Loaded,
    Connected,
    Configured,
    Activated,
    Processing,
    Deactivated,
    Terminated,
}

pub struct PluginSession {
    id: SessionId,
    identity: PluginIdentity,
    lifecycle: Lifecycle,
    limits: ScratchLimits,
    /// Values taken over from the audio side, waiting to reach the
    /// controller.  Swapped with the realtime copy so neither allocates.
    pending: PendingValues,

    view: Option<Box<dyn PlugView>>,
    info_listener: Option<Box<dyn InfoListener>>,
    connection: Option<Box<dyn ConnectionLink>>,
    connected: bool,
    controller: Option<Box<dyn Controller>>,
    active: bool,

    tracker: Arc<EditTracker>,
    notifications: Notifications,
    threads: Arc<ThreadGuard>,
    /// Holds the processor.
    audio: AudioHandle,
    /// Released last, after every plugin object.
    host: Option<Arc<HostContext>>,
}

impl PluginSession {
    /// Load a VST3 plugin from `path` (a `.vst3` bundle or the binary inside
    /// it).  `class_id` is the 32-digit hex class id.
    pub fn load(path: &Path, class_id: &str, config: &BridgeConfig) -> Result<Self> {
        Self::load_with(&Vst3Loader, path, class_id, config, Arc::new(MarkedThreads))
    }

    /// Load through an arbitrary backend, with an explicit thread identity.
    pub fn load_with(
        loader: &dyn PluginLoader,
        path: &Path,
        class_id: &str,
        config: &BridgeConfig,
        threads: Arc<dyn ThreadIdentity>,
    ) -> Result<Self> {
        let threads = Arc::new(ThreadGuard::new(threads, config.thread_checks_enabled()));
        threads.ensure_ui("load");

        let host = HostContext::acquire(&config.host);
        let (notifier, notifications) = notify::channel();
        let tracker = Arc::new(EditTracker::new(notifier));

        let objects = loader.load(
            path,
            class_id,
            &LoadContext {
                host: &host,
                tracker: &tracker,
            },
        )?;
        let id = next_session_id();
        log::info!(
            "Session {}: loaded \"{}\" by {} ({})",
            id,
            objects.identity.name,
            objects.identity.vendor,
            path.display()
        );

        let midi_mapping = objects.controller.midi_mapping();
        let info_listener = objects.controller.info_listener();
        let limits = config.scratch_limits();
        let realtime = RealtimeState::new(
            objects.processor,
            config.process_setup(),
            MidiCcMap::new(midi_mapping),
            limits,
        );

        let mut session = PluginSession {
            id,
            identity: objects.identity,
            lifecycle: Lifecycle::Loaded,
            limits,
            pending: PendingValues::with_capacity(limits.max_parameter_changes),
            view: None,
            info_listener,
            connection: objects.connection,
            connected: false,
            controller: Some(objects.controller),
            active: false,
            tracker,
            notifications,
            audio: AudioHandle::new(realtime, threads.clone()),
            threads,
            host: Some(host),
        };

        // From here on, an early return drops the session, which unloads it.
        session.connect();
        session.hand_off_initial_state();
        session.configure();
        session
            .activate()
            .map_err(|e| BridgeError::load(LoadStage::Activation, e.to_string()))?;
        session.start_processing();
        Ok(session)
    }

    /// Tear the plugin down.  Calling it again is a no-op.  Audio handles
    /// that outlive this keep producing silence.
    pub fn unload(&mut self) {
        if self.lifecycle == Lifecycle::Terminated {
            return;
        }
        self.threads.ensure_ui("unload");

        self.detach_view();
        self.stop_processing();
        self.deactivate();

        if let Some(link) = self.connection.as_mut() {
            if self.connected {
                link.disconnect();
            }
        }
        self.connected = false;
        if let Some(controller) = self.controller.as_mut() {
            controller.terminate();
        }
        let processor = {
            let mut rt = self.audio.lock();
            if let Some(processor) = rt.processor.as_mut() {
                processor.terminate();
            }
            rt.cc_map = MidiCcMap::new(None);
            rt.pending.clear();
            rt.processor.take()
        };

        self.info_listener = None;
        self.connection = None;
        self.controller = None;
        drop(processor);
        self.host = None;
        self.lifecycle = Lifecycle::Terminated;
        log::info!("Session {}: unloaded \"{}\"", self.id, self.identity.name);
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &PluginIdentity {
        &self.identity
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_processing(&self) -> bool {
        self.audio.lock().processing
    }

    pub fn has_view(&self) -> bool {
        self.view.is_some()
    }

    pub fn process_setup(&self) -> ProcessSetup {
        self.audio.lock().setup
    }

    pub fn buses(&self) -> BusConfiguration {
        self.audio.lock().buses.clone()
    }

    pub fn io_summary(&self) -> IoSummary {
        self.audio.lock().buses.summary()
    }

    /// The tracker the plugin's component handler reports edits to.
    pub fn edit_tracker(&self) -> &Arc<EditTracker> {
        &self.tracker
    }

    pub fn diagnostics(&self) -> &RealtimeDiagnostics {
        self.audio.diagnostics()
    }

    /// A handle the audio thread processes through.  Any number may exist;
    /// they all drive this session's processor.
    pub fn audio_handle(&self) -> AudioHandle {
        self.audio.clone()
    }

    // ---------------------------------------------------------------------
    // Bus / processing configuration
    // ---------------------------------------------------------------------

    /// Re-read the plugin's bus layout.  Processing is suspended around it.
    pub fn negotiate_io(&mut self) -> Result<IoSummary> {
        self.threads.ensure_ui("negotiate_io");
        self.require_loaded("negotiate_io")?;
        self.suspended(Self::configure)?;
        Ok(self.io_summary())
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        self.threads.ensure_ui("set_sample_rate");
        self.require_loaded("set_sample_rate")?;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(BridgeError::Unsupported("non-positive sample rate"));
        }
        self.audio.lock().setup.sample_rate = sample_rate;
        self.suspended(Self::configure)
    }

    pub fn set_processing(&mut self, processing: bool) -> Result<()> {
        self.threads.ensure_ui("set_processing");
        self.require_loaded("set_processing")?;
        if processing {
            if !self.active {
                return Err(BridgeError::InvalidState("set_processing on an inactive plugin"));
            }
            self.start_processing();
        } else {
            self.stop_processing();
        }
        Ok(())
    }

    /// Query latency.  Also re-reads the tail length and reports it as a
    /// [`HostNotification::TailLengthChanged`].
    pub fn get_latency(&mut self) -> Result<u32> {
        self.threads.ensure_ui("get_latency");
        self.require_loaded("get_latency")?;
        let was_active = self.active;
        let was_processing = self.is_processing();

        self.stop_processing();
        self.deactivate();
        let tail = self.with_processor("get_latency", |p| p.tail_samples())?;
        self.tracker
            .notifier()
            .notify(HostNotification::TailLengthChanged(tail));

        self.activate()
            .map_err(|e| BridgeError::plugin("setActive", e))?;
        let latency = self.with_processor("get_latency", |p| p.latency_samples())?;

        if was_processing {
            self.start_processing();
        } else if !was_active {
            self.deactivate();
        }
        Ok(latency)
    }

    // ---------------------------------------------------------------------
    // Parameters
    // ---------------------------------------------------------------------

    pub fn parameter_count(&self) -> usize {
        self.controller
            .as_ref()
            .map_or(0, |c| c.parameter_count())
    }

    pub fn get_parameter(&self, index: usize) -> Result<ParameterInfo> {
        self.threads.ensure_ui("get_parameter");
        let controller = self
            .controller
            .as_deref()
            .ok_or(BridgeError::InvalidState("get_parameter"))?;
        let desc = controller
            .parameter_descriptor(index)
            .ok_or(BridgeError::ParameterNotFound(index))?;
        self.tracker.record_index(desc.id, index);

        let value = controller.param_normalized(desc.id);
        let formatted = controller
            .param_string(desc.id, value)
            .unwrap_or_else(|| format!("{:.3}", value));
        Ok(ParameterInfo {
            id: desc.id,
            index,
            name: desc.title,
            units: desc.units,
            value,
            formatted,
            default_value: desc.default_value,
            flags: desc.flags,
        })
    }

    /// Direct write to the controller, outside any edit gesture.
    pub fn set_parameter(&mut self, id: ParamId, value: f64) -> Result<()> {
        self.threads.ensure_ui("set_parameter");
        self.controller_mut("set_parameter")?
            .set_param_normalized(id, value.clamp(0.0, 1.0))
            .map_err(|e| BridgeError::plugin("setParamNormalized", e))
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    pub fn get_state(&mut self) -> Result<Vec<u8>> {
        self.threads.ensure_ui("get_state");
        let mut stream = StateBuffer::new();
        self.with_processor("get_state", |p| p.get_state(&mut stream))?
            .map_err(|e| BridgeError::plugin("IComponent::getState", e))?;
        Ok(stream.into_bytes())
    }

    /// Restore processor state and mirror it into the controller.
    pub fn set_state(&mut self, data: &[u8]) -> Result<()> {
        self.threads.ensure_ui("set_state");
        let mut stream = StateBuffer::from_bytes(data.to_vec());
        self.with_processor("set_state", |p| p.set_state(&mut stream))?
            .map_err(|e| BridgeError::plugin("IComponent::setState", e))?;
        stream.rewind();
        if let Some(controller) = self.controller.as_mut() {
            if let Err(e) = controller.set_component_state(&mut stream) {
                log::warn!("Session {}: controller rejected component state: {}", self.id, e);
            }
        }
        Ok(())
    }

    pub fn get_controller_state(&mut self) -> Result<Vec<u8>> {
        self.threads.ensure_ui("get_controller_state");
        let mut stream = StateBuffer::new();
        self.controller_mut("get_controller_state")?
            .get_state(&mut stream)
            .map_err(|e| BridgeError::plugin("IEditController::getState", e))?;
        Ok(stream.into_bytes())
    }

    pub fn set_controller_state(&mut self, data: &[u8]) -> Result<()> {
        self.threads.ensure_ui("set_controller_state");
        let mut stream = StateBuffer::from_bytes(data.to_vec());
        self.controller_mut("set_controller_state")?
            .set_state(&mut stream)
            .map_err(|e| BridgeError::plugin("IEditController::setState", e))
    }

    /// Processor and controller state in one blob.
    pub fn get_preset_data(&mut self) -> Result<Vec<u8>> {
        let processor = self.get_state()?;
        let controller = self.get_controller_state().unwrap_or_else(|e| {
            log::debug!("Session {}: no controller state ({})", self.id, e);
            Vec::new()
        });
        state::encode_preset(&processor, &controller)
    }

    pub fn set_preset_data(&mut self, blob: &[u8]) -> Result<()> {
        let (processor, controller) = state::decode_preset(blob)?;
        if !processor.is_empty() {
            self.set_state(processor)?;
        }
        if !controller.is_empty() {
            self.set_controller_state(controller)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Editor view and track context
    // ---------------------------------------------------------------------

    /// Attach the plugin editor to `parent`.  A second call reuses the view
    /// that is already attached.
    pub fn attach_view(&mut self, parent: WindowHandle, kind: WindowKind) -> Result<ViewSize> {
        self.threads.ensure_ui("attach_view");
        if self.view.is_none() {
            let mut view = self
                .controller_mut("attach_view")?
                .create_view()
                .ok_or(BridgeError::Unsupported("editor view"))?;
            if !view.is_platform_supported(kind) {
                return Err(BridgeError::Unsupported("window kind"));
            }
            view.attach(parent, kind)
                .map_err(|e| BridgeError::plugin("IPlugView::attached", e))?;
            log::debug!("Session {}: editor attached ({:?})", self.id, kind);
            self.view = Some(view);
        }
        Ok(self
            .view
            .as_ref()
            .and_then(|v| v.size())
            .unwrap_or_default())
    }

    /// Tell the attached editor its window is now `size`, typically after
    /// the host acted on a [`HostNotification::ResizeWindow`].  Returns the
    /// size the view settled on.
    pub fn resize_view(&mut self, size: ViewSize) -> Result<ViewSize> {
        self.threads.ensure_ui("resize_view");
        let view = self
            .view
            .as_mut()
            .ok_or(BridgeError::InvalidState("resize_view without an attached editor"))?;
        view.set_size(size)
            .map_err(|e| BridgeError::plugin("IPlugView::onSize", e))?;
        Ok(view.size().unwrap_or(size))
    }

    pub fn detach_view(&mut self) {
        self.threads.ensure_ui("detach_view");
        if let Some(mut view) = self.view.take() {
            view.removed();
            log::debug!("Session {}: editor detached", self.id);
        }
    }

    /// Tell the plugin about the track it sits on.  Does nothing if the
    /// plugin does not listen for it.
    pub fn set_track_context(&mut self, context: &TrackContext) -> Result<()> {
        self.threads.ensure_ui("set_track_context");
        self.require_loaded("set_track_context")?;
        if let Some(listener) = self.info_listener.as_mut() {
            if let Err(e) = listener.set_channel_context(context) {
                log::warn!("Session {}: track context rejected: {}", self.id, e);
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------------

    /// Drain plugin notifications.  Also pushes pending parameter values into
    /// the controller, reports values the processor wrote back, re-negotiates
    /// IO after an IO change (reporting the new latency), and logs realtime
    /// diagnostics.
    pub fn poll_notifications(&mut self) -> Vec<HostNotification> {
        self.threads.ensure_ui("poll_notifications");
        self.sync_controller();

        let mut out = self.notifications.drain();
        let io_changed = out
            .iter()
            .any(|n| matches!(n, HostNotification::IoChanged));
        if io_changed && self.lifecycle != Lifecycle::Terminated {
            // Parameters may have been renumbered along with the buses.
            self.tracker.clear_indices();
            if let Err(e) = self.negotiate_io() {
                log::warn!("Session {}: IO re-negotiation failed: {}", self.id, e);
            }
            match self.get_latency() {
                Ok(latency) => {
                    out.extend(self.notifications.drain());
                    out.push(HostNotification::LatencyChanged(latency));
                }
                Err(e) => log::warn!("Session {}: latency query failed: {}", self.id, e),
            }
        }

        let snapshot = self.diagnostics().take_snapshot();
        if snapshot.has_problems() {
            snapshot.log(self.id);
        }
        let violations = self.threads.take_violations();
        if violations > 0 {
            log::warn!(
                "Session {}: {} calls made from the wrong thread",
                self.id,
                violations
            );
        }
        out
    }

    // ---------------------------------------------------------------------
    // Realtime
    // ---------------------------------------------------------------------

    /// Process one block on the session itself.  Same as
    /// [`AudioHandle::process`], for hosts that drive both sides from one
    /// owner.
    pub fn process(
        &mut self,
        details: &ProcessDetails,
        inputs: &[&[&[f32]]],
        outputs: &mut [&mut [&mut [f32]]],
        events: &[HostIssuedEvent],
    ) {
        self.audio.process(details, inputs, outputs, events);
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn connect(&mut self) {
        if let Some(link) = self.connection.as_mut() {
            match link.connect() {
                Ok(()) => self.connected = true,
                Err(e) => log::warn!(
                    "Session {}: connecting processor and controller failed ({}), \
                     state goes through the host only",
                    self.id,
                    e
                ),
            }
        }
        self.lifecycle = Lifecycle::Connected;
    }

    /// Give the controller the processor's initial state.
    fn hand_off_initial_state(&mut self) {
        let mut stream = StateBuffer::new();
        let Ok(result) = self.with_processor("load", |p| p.get_state(&mut stream)) else {
            return;
        };
        let Some(controller) = self.controller.as_mut() else {
            return;
        };
        match result {
            Ok(()) => {
                stream.rewind();
                if let Err(e) = controller.set_component_state(&mut stream) {
                    log::warn!("Session {}: initial state hand-off failed: {}", self.id, e);
                }
            }
            Err(e) => log::debug!("Session {}: processor has no initial state ({})", self.id, e),
        }
    }

    /// Negotiate buses, push the process setup and size realtime scratch.
    /// Failures are logged; the plugin keeps its defaults.
    fn configure(&mut self) {
        let mut rt = self.audio.lock();
        let RealtimeState {
            processor,
            buses,
            setup,
            cc_map,
            ..
        } = &mut *rt;
        let Some(processor) = processor.as_deref_mut() else {
            return;
        };
        *buses = bus::negotiate(processor);
        if let Err(e) = processor.setup_processing(setup) {
            log::warn!(
                "Session {}: setupProcessing rejected {:?}: {}",
                self.id,
                setup,
                e
            );
        }
        processor.prepare(buses, &self.limits);

        cc_map.invalidate();
        cc_map.resolve_pitch_bend(buses.event_inputs.len());
        drop(rt);
        self.lifecycle = Lifecycle::Configured;
    }

    fn activate(&mut self) -> CallResult {
        if self.active {
            return Ok(());
        }
        if let Some(processor) = self.audio.lock().processor.as_mut() {
            processor.set_active(true)?;
        }
        self.active = true;
        self.lifecycle = Lifecycle::Activated;
        Ok(())
    }

    fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        if let Some(processor) = self.audio.lock().processor.as_mut() {
            if let Err(e) = processor.set_active(false) {
                log::warn!("Session {}: setActive(false) failed: {}", self.id, e);
            }
        }
        self.active = false;
        self.lifecycle = Lifecycle::Deactivated;
    }

    /// Plugins may refuse `setProcessing` and still expect `process`, so a
    /// refusal is only logged.
    fn start_processing(&mut self) {
        if !self.active {
            return;
        }
        let mut rt = self.audio.lock();
        if rt.processing {
            return;
        }
        if let Some(processor) = rt.processor.as_mut() {
            if let Err(e) = processor.set_processing(true) {
                log::warn!(
                    "Session {}: setProcessing(true) returned {} (continuing anyway)",
                    self.id,
                    e
                );
            }
        }
        rt.processing = true;
        drop(rt);
        self.lifecycle = Lifecycle::Processing;
    }

    fn stop_processing(&mut self) {
        let mut rt = self.audio.lock();
        if !rt.processing {
            return;
        }
        if let Some(processor) = rt.processor.as_mut() {
            if let Err(e) = processor.set_processing(false) {
                log::warn!("Session {}: setProcessing(false) failed: {}", self.id, e);
            }
        }
        rt.processing = false;
        drop(rt);
        self.lifecycle = Lifecycle::Activated;
    }

    /// Run `f` with processing stopped and the plugin deactivated, then
    /// restore the previous state.
    fn suspended<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Result<T> {
        let was_active = self.active;
        let was_processing = self.is_processing();
        self.stop_processing();
        self.deactivate();

        let out = f(self);

        if was_active {
            self.activate()
                .map_err(|e| BridgeError::plugin("setActive", e))?;
            if was_processing {
                self.start_processing();
            }
        }
        Ok(out)
    }

    /// Take over what the audio side collected since the last poll: mirror
    /// it into the controller and report processor-written values.
    fn sync_controller(&mut self) {
        std::mem::swap(&mut self.audio.lock().pending, &mut self.pending);
        let Some(controller) = self.controller.as_mut() else {
            self.pending.clear();
            return;
        };
        for &(id, value) in &self.pending.delivered {
            if let Err(e) = controller.set_param_normalized(id, value) {
                log::debug!("Controller ignored value for parameter {}: {}", id, e);
            }
        }
        for &(id, value) in &self.pending.reported {
            if let Err(e) = controller.set_param_normalized(id, value) {
                log::debug!("Controller ignored reported value for parameter {}: {}", id, e);
            }
            self.tracker
                .notifier()
                .notify(HostNotification::Parameter(ParameterChange {
                    parameter_id: id,
                    parameter_index: self.tracker.index_of(id),
                    current_value: value,
                    initial_value: f64::NAN,
                    end_edit: false,
                }));
        }
        self.pending.clear();
    }

    fn require_loaded(&self, op: &'static str) -> Result<()> {
        if self.audio.lock().processor.is_none() {
            return Err(BridgeError::InvalidState(op));
        }
        Ok(())
    }

    /// Run `f` on the processor while holding the realtime lock.
    fn with_processor<T>(&self, op: &'static str, f: impl FnOnce(&mut dyn Processor) -> T) -> Result<T> {
        let mut rt = self.audio.lock();
        match rt.processor.as_deref_mut() {
            Some(p) => Ok(f(p)),
            None => Err(BridgeError::InvalidState(op)),
        }
    }

    fn controller_mut(&mut self, op: &'static str) -> Result<&mut dyn Controller> {
        match self.controller.as_deref_mut() {
            Some(c) => Ok(c),
            None => Err(BridgeError::InvalidState(op)),
        }
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        self.unload();
    }
}
