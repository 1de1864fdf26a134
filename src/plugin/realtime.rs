//! The audio-thread side of a session.
//!
//! Everything `process` touches lives in one [`RealtimeState`] behind a
//! mutex shared with the session.  The UI thread takes the lock for the
//! duration of a processor call (state, activation, bus negotiation).  The
//! audio thread only ever `try_lock`s it: when the UI thread holds it, the
//! block is output as silence and counted, never waited for.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::automation::{AutomationQueueBuilder, ScratchLimits};
use super::bus::BusConfiguration;
use super::cc_map::MidiCcMap;
use super::diagnostics::RealtimeDiagnostics;
use super::events::HostIssuedEvent;
use super::model::{ProcessBlock, Processor};
use super::thread_check::ThreadGuard;
use super::transport::TransportContext;
use super::types::*;

/// Parameter values crossing from the audio thread to the UI thread.
#[derive(Debug, Default)]
pub(crate) struct PendingValues {
    /// Delivered to the processor; the controller still has to hear them.
    pub delivered: Vec<(ParamId, f64)>,
    /// Written by the processor into its output changes.
    pub reported: Vec<(ParamId, f64)>,
}

impl PendingValues {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            delivered: Vec::with_capacity(capacity),
            reported: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.delivered.clear();
        self.reported.clear();
    }
}

/// Latest value wins.  Returns `false` when a new slot was needed and the
/// list is full.
fn upsert(list: &mut Vec<(ParamId, f64)>, id: ParamId, value: f64) -> bool {
    if let Some(slot) = list.iter_mut().find(|(p, _)| *p == id) {
        slot.1 = value;
        return true;
    }
    if list.len() == list.capacity() {
        return false;
    }
    list.push((id, value));
    true
}

pub(crate) struct RealtimeState {
    pub processor: Option<Box<dyn Processor>>,
    pub buses: BusConfiguration,
    pub setup: ProcessSetup,
    pub cc_map: MidiCcMap,
    pub automation: AutomationQueueBuilder,
    pub processing: bool,
    pub pending: PendingValues,
}

impl RealtimeState {
    pub fn new(
        processor: Box<dyn Processor>,
        setup: ProcessSetup,
        cc_map: MidiCcMap,
        limits: ScratchLimits,
    ) -> Self {
        Self {
            processor: Some(processor),
            buses: BusConfiguration::default(),
            setup,
            cc_map,
            automation: AutomationQueueBuilder::new(limits),
            processing: false,
            pending: PendingValues::with_capacity(limits.max_parameter_changes),
        }
    }

    fn run(
        &mut self,
        diagnostics: &RealtimeDiagnostics,
        details: &ProcessDetails,
        inputs: &[&[&[f32]]],
        outputs: &mut [&mut [&mut [f32]]],
        events: &[HostIssuedEvent],
    ) {
        let num_samples = details.block_size as usize;

        let Some(processor) = self.processor.as_deref_mut() else {
            silence(outputs, num_samples);
            return;
        };
        if !self.processing {
            diagnostics.record_idle();
            silence(outputs, num_samples);
            return;
        }
        if num_samples > self.setup.max_block_size as usize
            || !self.buses.matches(inputs, outputs, num_samples)
        {
            diagnostics.record_mismatch();
            silence(outputs, num_samples);
            return;
        }

        let has_event_input = self.buses.has_event_input();
        self.automation.begin_block(num_samples);
        for event in events {
            self.automation.push(event, &self.cc_map, has_event_input);
        }

        let transport = TransportContext::from_details(details);
        let mode = if details.playing_state == PlayingState::OfflineRendering {
            ProcessMode::Offline
        } else {
            self.setup.mode
        };
        let block = ProcessBlock {
            num_samples,
            mode,
            events: self.automation.events(),
            parameters: self.automation.parameters(),
            transport: &transport,
        };
        if let Err(e) = processor.process(&block, inputs, outputs) {
            diagnostics.record_failure(e.code);
        }
        diagnostics.record_block();

        let mut overflow = 0;
        for queue in self.automation.parameters().as_slice() {
            if !upsert(&mut self.pending.delivered, queue.id, queue.last_value()) {
                overflow += 1;
            }
        }
        let reported = &mut self.pending.reported;
        processor.read_output_parameters(&mut |id, value| {
            if !upsert(reported, id, value) {
                overflow += 1;
            }
        });
        self.automation.finish_block();
        diagnostics.record_dropped(self.automation.take_dropped() + overflow);
    }
}

/// Send-able handle for the audio thread.
///
/// Obtained from [`PluginSession::audio_handle`](super::PluginSession::audio_handle).
/// Once the session is unloaded every block is silence.
#[derive(Clone)]
pub struct AudioHandle {
    shared: Arc<Mutex<RealtimeState>>,
    diagnostics: Arc<RealtimeDiagnostics>,
    threads: Arc<ThreadGuard>,
}

impl AudioHandle {
    pub(crate) fn new(state: RealtimeState, threads: Arc<ThreadGuard>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(state)),
            diagnostics: Arc::new(RealtimeDiagnostics::new()),
            threads,
        }
    }

    /// UI thread.  Blocks until the audio thread has finished its block.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RealtimeState> {
        self.shared.lock()
    }

    pub fn diagnostics(&self) -> &RealtimeDiagnostics {
        &self.diagnostics
    }

    /// Process one block.  Audio thread only.
    ///
    /// Buffers are `[bus][channel][sample]` and must match the negotiated
    /// layout; a block that does not match, or that arrives while the UI
    /// thread is inside a processor call, is output as silence.  Plugin
    /// failures are counted in [`Self::diagnostics`], never returned.
    pub fn process(
        &self,
        details: &ProcessDetails,
        inputs: &[&[&[f32]]],
        outputs: &mut [&mut [&mut [f32]]],
        events: &[HostIssuedEvent],
    ) {
        self.threads.ensure_audio("process");
        let Some(mut state) = self.shared.try_lock() else {
            self.diagnostics.record_contended();
            silence(outputs, details.block_size as usize);
            return;
        };
        state.run(&self.diagnostics, details, inputs, outputs, events);
    }
}

fn silence(outputs: &mut [&mut [&mut [f32]]], num_samples: usize) {
    for bus in outputs.iter_mut() {
        for channel in bus.iter_mut() {
            let n = num_samples.min(channel.len());
            channel[..n].fill(0.0);
        }
    }
}
