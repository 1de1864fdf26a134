//! MIDI controller → parameter mapping.
//!
//! Plugins that want MIDI CCs (and pitch bend) routed to parameters expose
//! a controller-assignment query.  That query is not realtime-safe, so the
//! UI thread resolves keys ahead of time and the audio thread only reads
//! the cache.

use std::collections::HashMap;

use super::model::MidiMapping;
use super::types::ParamId;

/// Pitch bend is queried as a virtual controller above the 0..=127 CC range.
pub const PITCH_BEND_CONTROLLER: i16 = 129;

/// Channels queried per event bus when pre-resolving pitch bend.
const MIDI_CHANNELS: i16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiCcKey {
    pub bus: i32,
    pub channel: i16,
    pub controller: i16,
}

impl MidiCcKey {
    pub fn pitch_bend(bus: i32, channel: i16) -> Self {
        Self {
            bus,
            channel,
            controller: PITCH_BEND_CONTROLLER,
        }
    }
}

pub struct MidiCcMap {
    mapping: Option<Box<dyn MidiMapping>>,
    /// `None` values are cached misses.
    cache: HashMap<MidiCcKey, Option<ParamId>>,
}

impl MidiCcMap {
    pub fn new(mapping: Option<Box<dyn MidiMapping>>) -> Self {
        Self {
            mapping,
            cache: HashMap::new(),
        }
    }

    pub fn supports_mapping(&self) -> bool {
        self.mapping.is_some()
    }

    /// UI thread only.  Queries the plugin at most once per key.
    pub fn resolve(&mut self, bus: i32, channel: i16, controller: i16) -> Option<ParamId> {
        let key = MidiCcKey {
            bus,
            channel,
            controller,
        };
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }
        let resolved = self
            .mapping
            .as_ref()
            .and_then(|m| m.controller_assignment(bus, channel, controller));
        if let Some(id) = resolved {
            log::debug!(
                "MIDI CC {} (bus {}, channel {}) → parameter {}",
                controller,
                bus,
                channel,
                id
            );
        }
        self.cache.insert(key, resolved);
        resolved
    }

    /// Resolve pitch bend on every channel of the first `event_buses` buses.
    /// Without a mapping capability there is nothing to ask.
    pub fn resolve_pitch_bend(&mut self, event_buses: usize) {
        if !self.supports_mapping() {
            return;
        }
        for bus in 0..event_buses as i32 {
            for channel in 0..MIDI_CHANNELS {
                self.resolve(bus, channel, PITCH_BEND_CONTROLLER);
            }
        }
        log::debug!("{} MIDI controller keys resolved", self.resolved_keys());
    }

    /// Cache-only lookup for the audio thread.
    #[inline]
    pub fn lookup(&self, key: MidiCcKey) -> Option<ParamId> {
        self.cache.get(&key).copied().flatten()
    }

    /// Forget all resolutions, e.g. after the plugin reported an IO change.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    pub fn resolved_keys(&self) -> usize {
        self.cache.len()
    }
}
