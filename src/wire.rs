//! Flat `#[repr(C)]` shapes for events crossing a foreign boundary.
//!
//! Inside the crate events are Rust enums.  Hosts written against a C ABI
//! exchange these tagged unions instead; conversion happens only here.

use thiserror::Error;

use crate::plugin::events::{
    EventKind, HostIssuedEvent, HostNotification, MidiEvent, NoteExpressionKind, ParameterChange,
};
use crate::plugin::types::ParamId;

pub const EVENT_MIDI: u32 = 0;
pub const EVENT_NOTE_EXPRESSION: u32 = 1;
pub const EVENT_PARAMETER: u32 = 2;

pub const NOTIFY_LATENCY_CHANGED: u32 = 0;
pub const NOTIFY_RESIZE_WINDOW: u32 = 1;
pub const NOTIFY_PARAMETER: u32 = 2;
pub const NOTIFY_UPDATE_DISPLAY: u32 = 3;
pub const NOTIFY_IO_CHANGED: u32 = 4;
pub const NOTIFY_EDITOR_OPEN_REQUEST: u32 = 5;
pub const NOTIFY_EDITOR_CLOSE_REQUEST: u32 = 6;
pub const NOTIFY_TAIL_LENGTH_CHANGED: u32 = 7;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("Unknown event tag {0}")]
    UnknownEventTag(u32),

    #[error("Unknown notification tag {0}")]
    UnknownNotificationTag(u32),

    #[error("Unknown note expression type {0}")]
    UnknownExpression(u32),

    #[error("Invalid boolean byte {0}")]
    InvalidBool(u8),
}

/// Wire booleans are a byte that must be `0` or `1`.
fn flag(raw: u8) -> Result<bool, WireError> {
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WireError::InvalidBool(other)),
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireMidi {
    pub data: [u8; 3],
    pub detune: f32,
    pub note_length: i32,
    pub note_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireNoteExpression {
    pub note_id: i32,
    pub kind: u32,
    pub value: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireParameter {
    pub id: ParamId,
    pub value: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union WireEventPayload {
    pub midi: WireMidi,
    pub note_expression: WireNoteExpression,
    pub parameter: WireParameter,
}

/// One host event.  `tag` selects the live field of `payload`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireHostEvent {
    pub tag: u32,
    pub block_offset: u32,
    pub ppq_time: f64,
    pub bus_index: u32,
    /// `0` or `1`.
    pub is_live: u8,
    pub payload: WireEventPayload,
}

fn expression_kind(raw: u32) -> Result<NoteExpressionKind, WireError> {
    use NoteExpressionKind::*;
    [Volume, Pan, Tuning, Vibrato, Expression, Brightness]
        .into_iter()
        .find(|k| k.type_id() == raw)
        .ok_or(WireError::UnknownExpression(raw))
}

impl TryFrom<&WireHostEvent> for HostIssuedEvent {
    type Error = WireError;

    fn try_from(wire: &WireHostEvent) -> Result<Self, WireError> {
        // The tag is checked before any payload field is read.
        let kind = unsafe {
            match wire.tag {
                EVENT_MIDI => {
                    let m = wire.payload.midi;
                    EventKind::Midi(MidiEvent {
                        data: m.data,
                        detune: m.detune,
                        note_length: m.note_length,
                        note_id: m.note_id,
                    })
                }
                EVENT_NOTE_EXPRESSION => {
                    let n = wire.payload.note_expression;
                    EventKind::NoteExpression {
                        note_id: n.note_id,
                        kind: expression_kind(n.kind)?,
                        value: n.value,
                    }
                }
                EVENT_PARAMETER => {
                    let p = wire.payload.parameter;
                    EventKind::Parameter {
                        id: p.id,
                        value: p.value,
                    }
                }
                other => return Err(WireError::UnknownEventTag(other)),
            }
        };
        Ok(HostIssuedEvent {
            kind,
            block_offset: wire.block_offset,
            ppq_time: wire.ppq_time,
            bus_index: wire.bus_index,
            is_live: flag(wire.is_live)?,
        })
    }
}

impl From<&HostIssuedEvent> for WireHostEvent {
    fn from(event: &HostIssuedEvent) -> Self {
        let (tag, payload) = match event.kind {
            EventKind::Midi(m) => (
                EVENT_MIDI,
                WireEventPayload {
                    midi: WireMidi {
                        data: m.data,
                        detune: m.detune,
                        note_length: m.note_length,
                        note_id: m.note_id,
                    },
                },
            ),
            EventKind::NoteExpression {
                note_id,
                kind,
                value,
            } => (
                EVENT_NOTE_EXPRESSION,
                WireEventPayload {
                    note_expression: WireNoteExpression {
                        note_id,
                        kind: kind.type_id(),
                        value,
                    },
                },
            ),
            EventKind::Parameter { id, value } => (
                EVENT_PARAMETER,
                WireEventPayload {
                    parameter: WireParameter { id, value },
                },
            ),
        };
        Self {
            tag,
            block_offset: event.block_offset,
            ppq_time: event.ppq_time,
            bus_index: event.bus_index,
            is_live: u8::from(event.is_live),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireSize {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireParameterChange {
    pub id: ParamId,
    pub index: i32,
    pub current_value: f64,
    pub initial_value: f64,
    /// `0` or `1`.
    pub end_edit: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union WireNotificationPayload {
    /// Latency or tail length in samples; zero for payload-less tags.
    pub samples: u32,
    pub size: WireSize,
    pub parameter: WireParameterChange,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireNotification {
    pub tag: u32,
    pub payload: WireNotificationPayload,
}

impl From<&HostNotification> for WireNotification {
    fn from(notification: &HostNotification) -> Self {
        let empty = WireNotificationPayload { samples: 0 };
        let (tag, payload) = match *notification {
            HostNotification::LatencyChanged(samples) => {
                (NOTIFY_LATENCY_CHANGED, WireNotificationPayload { samples })
            }
            HostNotification::ResizeWindow { width, height } => (
                NOTIFY_RESIZE_WINDOW,
                WireNotificationPayload {
                    size: WireSize { width, height },
                },
            ),
            HostNotification::Parameter(change) => (
                NOTIFY_PARAMETER,
                WireNotificationPayload {
                    parameter: WireParameterChange {
                        id: change.parameter_id,
                        index: change.parameter_index,
                        current_value: change.current_value,
                        initial_value: change.initial_value,
                        end_edit: u8::from(change.end_edit),
                    },
                },
            ),
            HostNotification::UpdateDisplay => (NOTIFY_UPDATE_DISPLAY, empty),
            HostNotification::IoChanged => (NOTIFY_IO_CHANGED, empty),
            HostNotification::EditorOpenRequest => (NOTIFY_EDITOR_OPEN_REQUEST, empty),
            HostNotification::EditorCloseRequest => (NOTIFY_EDITOR_CLOSE_REQUEST, empty),
            HostNotification::TailLengthChanged(samples) => {
                (NOTIFY_TAIL_LENGTH_CHANGED, WireNotificationPayload { samples })
            }
        };
        Self { tag, payload }
    }
}

impl TryFrom<&WireNotification> for HostNotification {
    type Error = WireError;

    fn try_from(wire: &WireNotification) -> Result<Self, WireError> {
        unsafe {
            Ok(match wire.tag {
                NOTIFY_LATENCY_CHANGED => HostNotification::LatencyChanged(wire.payload.samples),
                NOTIFY_RESIZE_WINDOW => {
                    let s = wire.payload.size;
                    HostNotification::ResizeWindow {
                        width: s.width,
                        height: s.height,
                    }
                }
                NOTIFY_PARAMETER => {
                    let p = wire.payload.parameter;
                    HostNotification::Parameter(ParameterChange {
                        parameter_id: p.id,
                        parameter_index: p.index,
                        current_value: p.current_value,
                        initial_value: p.initial_value,
                        end_edit: flag(p.end_edit)?,
                    })
                }
                NOTIFY_UPDATE_DISPLAY => HostNotification::UpdateDisplay,
                NOTIFY_IO_CHANGED => HostNotification::IoChanged,
                NOTIFY_EDITOR_OPEN_REQUEST => HostNotification::EditorOpenRequest,
                NOTIFY_EDITOR_CLOSE_REQUEST => HostNotification::EditorCloseRequest,
                NOTIFY_TAIL_LENGTH_CHANGED => {
                    HostNotification::TailLengthChanged(wire.payload.samples)
                }
                other => return Err(WireError::UnknownNotificationTag(other)),
            })
        }
    }
}
