//! Event vocabulary crossing the bridge.
//!
//! Inbound: [`HostIssuedEvent`] arrives with every process block and is
//! translated into [`PluginEvent`]s and parameter queues.  Outbound:
//! [`HostNotification`] carries everything the plugin asks of the host.

use serde::{Deserialize, Serialize};

use super::types::ParamId;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A raw three-byte MIDI message plus the per-note extras the host knows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MidiEvent {
    pub data: [u8; 3],
    /// Detune in cents.
    pub detune: f32,
    /// Note length in samples, `0` if unknown.
    pub note_length: i32,
    /// Host-assigned note id, `-1` if none.
    pub note_id: i32,
}

impl MidiEvent {
    pub fn new(data: [u8; 3]) -> Self {
        Self {
            data,
            detune: 0.0,
            note_length: 0,
            note_id: -1,
        }
    }

    pub fn message(&self) -> MidiMessage {
        let [status, d1, d2] = self.data;
        let channel = status & 0x0f;
        match status & 0xf0 {
            0x90 if d2 > 0 => MidiMessage::NoteOn {
                channel,
                pitch: d1 & 0x7f,
                velocity: d2 & 0x7f,
            },
            0x90 | 0x80 => MidiMessage::NoteOff {
                channel,
                pitch: d1 & 0x7f,
                velocity: d2 & 0x7f,
            },
            0xe0 => MidiMessage::PitchBend {
                channel,
                value: (u16::from(d2 & 0x7f) << 7) | u16::from(d1 & 0x7f),
            },
            _ => MidiMessage::Other(self.data),
        }
    }
}

/// Decoded view of a [`MidiEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8, velocity: u8 },
    /// 14-bit bend, centre is `0x2000`.
    PitchBend { channel: u8, value: u16 },
    Other([u8; 3]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteExpressionKind {
    Volume,
    Pan,
    Tuning,
    Vibrato,
    Expression,
    Brightness,
}

impl NoteExpressionKind {
    /// Plugin-side note-expression type id.
    pub fn type_id(self) -> u32 {
        match self {
            Self::Volume => 0,
            Self::Pan => 1,
            Self::Tuning => 2,
            Self::Vibrato => 3,
            Self::Expression => 4,
            Self::Brightness => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    Midi(MidiEvent),
    NoteExpression {
        note_id: i32,
        kind: NoteExpressionKind,
        value: f64,
    },
    Parameter {
        id: ParamId,
        value: f64,
    },
}

/// One event for the current block, as supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostIssuedEvent {
    pub kind: EventKind,
    /// Sample offset inside the block.
    pub block_offset: u32,
    /// Musical position in quarter notes.
    pub ppq_time: f64,
    pub bus_index: u32,
    /// Played live rather than from a sequence.
    pub is_live: bool,
}

impl HostIssuedEvent {
    pub fn midi(block_offset: u32, data: [u8; 3]) -> Self {
        Self {
            kind: EventKind::Midi(MidiEvent::new(data)),
            block_offset,
            ppq_time: 0.0,
            bus_index: 0,
            is_live: false,
        }
    }

    pub fn parameter(block_offset: u32, id: ParamId, value: f64) -> Self {
        Self {
            kind: EventKind::Parameter { id, value },
            block_offset,
            ppq_time: 0.0,
            bus_index: 0,
            is_live: false,
        }
    }

    pub fn note_expression(
        block_offset: u32,
        note_id: i32,
        kind: NoteExpressionKind,
        value: f64,
    ) -> Self {
        Self {
            kind: EventKind::NoteExpression {
                note_id,
                kind,
                value,
            },
            block_offset,
            ppq_time: 0.0,
            bus_index: 0,
            is_live: false,
        }
    }
}

/// A translated discrete event, ready for the plugin's event list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PluginEvent {
    pub bus_index: i32,
    pub sample_offset: i32,
    pub ppq_position: f64,
    pub is_live: bool,
    pub body: PluginEventBody,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PluginEventBody {
    NoteOn {
        channel: i16,
        pitch: i16,
        tuning: f32,
        velocity: f32,
        length: i32,
        note_id: i32,
    },
    NoteOff {
        channel: i16,
        pitch: i16,
        velocity: f32,
        note_id: i32,
        tuning: f32,
    },
    NoteExpression {
        type_id: u32,
        note_id: i32,
        value: f64,
    },
    /// Undecoded MIDI, delivered as a three-byte data event.
    Data { bytes: [u8; 3] },
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A parameter change reported by the plugin, either from an edit gesture
/// in its own editor or as a value its processor wrote back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub parameter_id: ParamId,
    /// Plugin-assigned index, `-1` if the host never queried it.
    pub parameter_index: i32,
    /// `NaN` when unknown.
    pub current_value: f64,
    /// Value when the edit began; `NaN` when unknown or when the processor
    /// reported the value.
    pub initial_value: f64,
    pub end_edit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HostNotification {
    LatencyChanged(u32),
    ResizeWindow { width: u32, height: u32 },
    Parameter(ParameterChange),
    UpdateDisplay,
    IoChanged,
    EditorOpenRequest,
    EditorCloseRequest,
    TailLengthChanged(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_note_on_keeps_channel() {
        let ev = MidiEvent::new([0x93, 60, 100]);
        assert_eq!(
            ev.message(),
            MidiMessage::NoteOn {
                channel: 3,
                pitch: 60,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_note_on_with_zero_velocity_is_note_off() {
        let ev = MidiEvent::new([0x90, 60, 0]);
        assert!(matches!(ev.message(), MidiMessage::NoteOff { pitch: 60, .. }));
    }

    #[test]
    fn test_pitch_bend_value() {
        // centre: lsb 0x00, msb 0x40
        let ev = MidiEvent::new([0xe0, 0x00, 0x40]);
        assert_eq!(
            ev.message(),
            MidiMessage::PitchBend {
                channel: 0,
                value: 0x2000
            }
        );
    }

    #[test]
    fn test_control_change_is_other() {
        let ev = MidiEvent::new([0xb0, 7, 90]);
        assert_eq!(ev.message(), MidiMessage::Other([0xb0, 7, 90]));
    }
}
