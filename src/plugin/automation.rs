//! Per-block translation of host events into plugin input.
//!
//! Every process block the host hands over an ordered list of
//! [`HostIssuedEvent`]s.  Discrete events (notes, note expression, raw MIDI)
//! become [`PluginEvent`]s in a time-ordered event list; parameter changes
//! (including pitch bend mapped through the [`MidiCcMap`]) become one
//! value point per parameter id.
//!
//! All storage is allocated up front from [`ScratchLimits`].  The per-block
//! path only clears and fills within that capacity, so it never allocates.
//! Anything that does not fit is dropped and counted.  Offsets past the end
//! of the block are pulled back onto its last sample.

use super::cc_map::{MidiCcKey, MidiCcMap};
use super::events::{EventKind, HostIssuedEvent, MidiMessage, PluginEvent, PluginEventBody};
use super::types::ParamId;

const PITCH_BEND_RANGE: f64 = 16384.0;

/// Capacities of the realtime scratch structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchLimits {
    pub max_events: usize,
    pub max_parameter_changes: usize,
}

impl Default for ScratchLimits {
    fn default() -> Self {
        Self {
            max_events: 1024,
            max_parameter_changes: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterPoint {
    pub sample_offset: i32,
    pub value: f64,
}

/// The automation for one parameter in one block.  Later writes replace
/// earlier ones, so a queue only ever holds a single point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterQueue {
    pub id: ParamId,
    point: ParameterPoint,
}

impl ParameterQueue {
    pub fn points(&self) -> &[ParameterPoint] {
        std::slice::from_ref(&self.point)
    }

    pub fn last_value(&self) -> f64 {
        self.point.value
    }
}

/// Fixed-capacity set of parameter queues for one block.
#[derive(Debug)]
pub struct ParameterQueues {
    queues: Vec<ParameterQueue>,
}

impl ParameterQueues {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queues: Vec::with_capacity(capacity),
        }
    }

    pub fn reset(&mut self) {
        self.queues.clear();
    }

    /// Clear-then-add: the queue for `id` ends up holding only this point.
    /// Returns `false` if a new queue was needed but capacity is exhausted.
    pub fn replace(&mut self, id: ParamId, sample_offset: i32, value: f64) -> bool {
        let point = ParameterPoint {
            sample_offset,
            value,
        };
        if let Some(q) = self.queues.iter_mut().find(|q| q.id == id) {
            q.point = point;
            return true;
        }
        if self.queues.len() == self.queues.capacity() {
            return false;
        }
        self.queues.push(ParameterQueue { id, point });
        true
    }

    pub fn get(&self, id: ParamId) -> Option<&ParameterQueue> {
        self.queues.iter().find(|q| q.id == id)
    }

    pub fn as_slice(&self) -> &[ParameterQueue] {
        &self.queues
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queues.capacity()
    }
}

/// Fixed-capacity, time-ordered list of discrete events.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<PluginEvent>,
}

impl EventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    /// Insert keeping sample offsets non-decreasing.  Events with equal
    /// offsets stay in arrival order.
    pub fn insert(&mut self, event: PluginEvent) -> bool {
        if self.events.len() == self.events.capacity() {
            return false;
        }
        let pos = self
            .events
            .iter()
            .rposition(|e| e.sample_offset <= event.sample_offset)
            .map_or(0, |p| p + 1);
        self.events.insert(pos, event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn as_slice(&self) -> &[PluginEvent] {
        &self.events
    }

    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }
}

pub struct AutomationQueueBuilder {
    events: EventBuffer,
    parameters: ParameterQueues,
    /// Largest valid sample offset in the current block.
    last_offset: i32,
    dropped: u32,
}

impl AutomationQueueBuilder {
    pub fn new(limits: ScratchLimits) -> Self {
        Self {
            events: EventBuffer::with_capacity(limits.max_events),
            parameters: ParameterQueues::with_capacity(limits.max_parameter_changes),
            last_offset: 0,
            dropped: 0,
        }
    }

    pub fn begin_block(&mut self, num_samples: usize) {
        self.events.clear();
        self.parameters.reset();
        self.last_offset = i32::try_from(num_samples.saturating_sub(1)).unwrap_or(i32::MAX);
    }

    /// Translate a whole block's worth of events.
    pub fn build(
        &mut self,
        num_samples: usize,
        events: &[HostIssuedEvent],
        cc_map: &MidiCcMap,
        has_event_input: bool,
    ) {
        self.begin_block(num_samples);
        for event in events {
            self.push(event, cc_map, has_event_input);
        }
    }

    /// Translate one event.  MIDI and note expression need an event input
    /// bus; parameter changes never do.
    pub fn push(&mut self, event: &HostIssuedEvent, cc_map: &MidiCcMap, has_event_input: bool) {
        let offset = i32::try_from(event.block_offset)
            .unwrap_or(i32::MAX)
            .min(self.last_offset);
        match event.kind {
            EventKind::Parameter { id, value } => self.set_parameter(id, offset, value),
            EventKind::Midi(midi) if has_event_input => match midi.message() {
                MidiMessage::NoteOn {
                    channel,
                    pitch,
                    velocity,
                } => self.add_event(
                    event,
                    offset,
                    PluginEventBody::NoteOn {
                        channel: i16::from(channel),
                        pitch: i16::from(pitch),
                        tuning: midi.detune,
                        velocity: normalize_velocity(velocity),
                        length: midi.note_length,
                        note_id: midi.note_id,
                    },
                ),
                MidiMessage::NoteOff {
                    channel,
                    pitch,
                    velocity,
                } => self.add_event(
                    event,
                    offset,
                    PluginEventBody::NoteOff {
                        channel: i16::from(channel),
                        pitch: i16::from(pitch),
                        velocity: normalize_velocity(velocity),
                        note_id: midi.note_id,
                        tuning: midi.detune,
                    },
                ),
                MidiMessage::PitchBend { channel, value } => {
                    let key = MidiCcKey::pitch_bend(event.bus_index as i32, i16::from(channel));
                    if let Some(id) = cc_map.lookup(key) {
                        self.set_parameter(id, offset, f64::from(value) / PITCH_BEND_RANGE);
                    }
                }
                MidiMessage::Other(bytes) => {
                    self.add_event(event, offset, PluginEventBody::Data { bytes })
                }
            },
            EventKind::NoteExpression {
                note_id,
                kind,
                value,
            } if has_event_input => self.add_event(
                event,
                offset,
                PluginEventBody::NoteExpression {
                    type_id: kind.type_id(),
                    note_id,
                    value,
                },
            ),
            EventKind::Midi(_) | EventKind::NoteExpression { .. } => {}
        }
    }

    /// The event list is block-scoped; call after the plugin has processed.
    pub fn finish_block(&mut self) {
        self.events.clear();
    }

    pub fn events(&self) -> &[PluginEvent] {
        self.events.as_slice()
    }

    pub fn parameters(&self) -> &ParameterQueues {
        &self.parameters
    }

    /// Read and reset the count of events dropped for lack of capacity.
    pub fn take_dropped(&mut self) -> u32 {
        std::mem::take(&mut self.dropped)
    }

    fn set_parameter(&mut self, id: ParamId, offset: i32, value: f64) {
        if !self.parameters.replace(id, offset, value) {
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    fn add_event(&mut self, source: &HostIssuedEvent, offset: i32, body: PluginEventBody) {
        let event = PluginEvent {
            bus_index: source.bus_index as i32,
            sample_offset: offset,
            ppq_position: source.ppq_time,
            is_live: source.is_live,
            body,
        };
        if !self.events.insert(event) {
            self.dropped = self.dropped.saturating_add(1);
        }
    }
}

#[inline]
fn normalize_velocity(velocity: u8) -> f32 {
    f32::from(velocity) / 127.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::cc_map::PITCH_BEND_CONTROLLER;
    use crate::plugin::events::{MidiEvent, NoteExpressionKind};
    use crate::plugin::model::MidiMapping;

    struct BendTo(ParamId);

    impl MidiMapping for BendTo {
        fn controller_assignment(&self, _bus: i32, _channel: i16, controller: i16) -> Option<ParamId> {
            (controller == PITCH_BEND_CONTROLLER).then_some(self.0)
        }
    }

    fn builder() -> AutomationQueueBuilder {
        AutomationQueueBuilder::new(ScratchLimits {
            max_events: 8,
            max_parameter_changes: 4,
        })
    }

    #[test]
    fn test_note_on_off_scenario() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        b.build(
            512,
            &[
                HostIssuedEvent::midi(0, [0x90, 60, 100]),
                HostIssuedEvent::midi(256, [0x80, 60, 0]),
            ],
            &cc,
            true,
        );

        let events = b.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sample_offset, 0);
        assert_eq!(events[1].sample_offset, 256);
        match events[0].body {
            PluginEventBody::NoteOn {
                pitch, velocity, ..
            } => {
                assert_eq!(pitch, 60);
                assert!((velocity - 100.0 / 127.0).abs() < 1e-6);
                assert!((velocity - 0.787).abs() < 1e-3);
            }
            other => panic!("expected note on, got {:?}", other),
        }
        match events[1].body {
            PluginEventBody::NoteOff {
                pitch, velocity, ..
            } => {
                assert_eq!(pitch, 60);
                assert_eq!(velocity, 0.0);
            }
            other => panic!("expected note off, got {:?}", other),
        }
    }

    #[test]
    fn test_velocity_bounds() {
        assert_eq!(normalize_velocity(127), 1.0);
        assert_eq!(normalize_velocity(0), 0.0);
    }

    #[test]
    fn test_parameter_updates_overwrite() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        b.build(
            512,
            &[
                HostIssuedEvent::parameter(10, 5, 0.25),
                HostIssuedEvent::parameter(300, 6, 0.9),
                HostIssuedEvent::parameter(20, 5, 0.75),
            ],
            &cc,
            true,
        );
        let q = b.parameters().get(5).unwrap();
        assert_eq!(q.points().len(), 1);
        assert_eq!(q.points()[0].value, 0.75);
        assert_eq!(q.points()[0].sample_offset, 20);
        assert_eq!(b.parameters().len(), 2);
    }

    #[test]
    fn test_pitch_bend_needs_resolution() {
        let mut b = builder();
        let mut cc = MidiCcMap::new(Some(Box::new(BendTo(77))));
        let bend = [HostIssuedEvent::midi(0, [0xe0, 0x00, 0x40])];

        b.build(512, &bend, &cc, true);
        assert!(b.parameters().is_empty());
        assert!(b.events().is_empty());

        cc.resolve_pitch_bend(1);
        b.build(512, &bend, &cc, true);
        let v = b.parameters().get(77).unwrap().last_value();
        assert!((v - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_event_bus_keeps_only_parameters() {
        let mut b = builder();
        let mut cc = MidiCcMap::new(Some(Box::new(BendTo(77))));
        cc.resolve_pitch_bend(1);
        b.build(
            512,
            &[
                HostIssuedEvent::midi(0, [0x90, 60, 100]),
                HostIssuedEvent::midi(0, [0xe0, 0x7f, 0x7f]),
                HostIssuedEvent::note_expression(0, 1, NoteExpressionKind::Pan, 0.3),
                HostIssuedEvent::parameter(0, 1, 0.5),
            ],
            &cc,
            false,
        );
        assert!(b.events().is_empty());
        assert_eq!(b.parameters().len(), 1);
        assert!(b.parameters().get(1).is_some());
    }

    #[test]
    fn test_note_expression_and_raw_midi() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        b.build(
            512,
            &[
                HostIssuedEvent::note_expression(4, 12, NoteExpressionKind::Brightness, 0.6),
                HostIssuedEvent::midi(8, [0xb0, 74, 64]),
            ],
            &cc,
            true,
        );
        assert_eq!(
            b.events()[0].body,
            PluginEventBody::NoteExpression {
                type_id: 5,
                note_id: 12,
                value: 0.6
            }
        );
        assert_eq!(
            b.events()[1].body,
            PluginEventBody::Data {
                bytes: [0xb0, 74, 64]
            }
        );
    }

    #[test]
    fn test_note_fields_carry_through() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        let mut ev = HostIssuedEvent::midi(3, [0x92, 64, 127]);
        if let EventKind::Midi(ref mut m) = ev.kind {
            *m = MidiEvent {
                data: m.data,
                detune: 12.5,
                note_length: 480,
                note_id: 9,
            };
        }
        ev.is_live = true;
        ev.bus_index = 1;
        ev.ppq_time = 2.5;
        b.build(512, &[ev], &cc, true);

        let e = b.events()[0];
        assert!(e.is_live);
        assert_eq!(e.bus_index, 1);
        assert_eq!(e.ppq_position, 2.5);
        assert_eq!(
            e.body,
            PluginEventBody::NoteOn {
                channel: 2,
                pitch: 64,
                tuning: 12.5,
                velocity: 1.0,
                length: 480,
                note_id: 9
            }
        );
    }

    #[test]
    fn test_out_of_order_offsets_are_sorted_stably() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        b.build(
            512,
            &[
                HostIssuedEvent::midi(100, [0x90, 1, 1]),
                HostIssuedEvent::midi(50, [0x90, 2, 1]),
                HostIssuedEvent::midi(100, [0x90, 3, 1]),
                HostIssuedEvent::midi(0, [0x90, 4, 1]),
            ],
            &cc,
            true,
        );
        let pitches: Vec<i16> = b
            .events()
            .iter()
            .map(|e| match e.body {
                PluginEventBody::NoteOn { pitch, .. } => pitch,
                _ => -1,
            })
            .collect();
        assert_eq!(pitches, vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_offsets_past_the_block_are_clamped() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        b.build(
            64,
            &[
                HostIssuedEvent::midi(63, [0x90, 60, 100]),
                HostIssuedEvent::midi(64, [0x90, 61, 100]),
                HostIssuedEvent::midi(u32::MAX, [0x80, 60, 0]),
                HostIssuedEvent::parameter(1000, 3, 0.4),
            ],
            &cc,
            true,
        );
        let offsets: Vec<i32> = b.events().iter().map(|e| e.sample_offset).collect();
        assert_eq!(offsets, vec![63, 63, 63]);
        assert_eq!(b.parameters().get(3).unwrap().points()[0].sample_offset, 63);
        assert_eq!(b.take_dropped(), 0);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        let notes: Vec<_> = (0..20)
            .map(|i| HostIssuedEvent::midi(i, [0x90, 60, 100]))
            .collect();
        let params: Vec<_> = (0..10)
            .map(|i| HostIssuedEvent::parameter(0, i, 0.5))
            .collect();

        b.build(512, &notes, &cc, true);
        for p in &params {
            b.push(p, &cc, true);
        }
        assert_eq!(b.events().len(), 8);
        assert_eq!(b.events.capacity(), 8);
        assert_eq!(b.parameters().len(), 4);
        assert_eq!(b.parameters().capacity(), 4);
        assert_eq!(b.take_dropped(), 12 + 6);
        assert_eq!(b.take_dropped(), 0);
    }

    #[test]
    fn test_finish_block_clears_events_only() {
        let mut b = builder();
        let cc = MidiCcMap::new(None);
        b.build(
            512,
            &[
                HostIssuedEvent::midi(0, [0x90, 60, 100]),
                HostIssuedEvent::parameter(0, 1, 0.5),
            ],
            &cc,
            true,
        );
        b.finish_block();
        assert!(b.events().is_empty());
        assert_eq!(b.parameters().len(), 1);
        b.begin_block(512);
        assert!(b.parameters().is_empty());
    }
}
