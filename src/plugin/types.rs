//! Format-agnostic types shared by the session core and the VST3 backend.

use std::ffi::c_void;

use serde::{Deserialize, Serialize};

/// Plugin-assigned parameter identifier.
pub type ParamId = u32;

/// Unique identifier for a loaded plugin session.
pub type SessionId = u64;

/// Speaker arrangement bitmask as reported by the plugin.
pub type SpeakerArrangement = u64;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginIdentity {
    /// Class id as 32 upper-case hex digits.
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Buses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Event,
}

/// What the plugin reports about one bus before the host activates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusInfo {
    pub name: String,
    pub channel_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusDescriptor {
    pub direction: BusDirection,
    pub media: MediaKind,
    pub channel_count: u32,
    pub name: String,
}

/// Snapshot of the negotiated bus layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSummary {
    /// Channel count per audio input bus.
    pub audio_inputs: Vec<u32>,
    /// Channel count per audio output bus.
    pub audio_outputs: Vec<u32>,
    pub event_inputs: usize,
    pub event_outputs: usize,
}

impl IoSummary {
    pub fn total_input_channels(&self) -> u32 {
        self.audio_inputs.iter().sum()
    }

    pub fn total_output_channels(&self) -> u32 {
        self.audio_outputs.iter().sum()
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    Realtime,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessSetup {
    pub mode: ProcessMode,
    pub sample_rate: f64,
    pub max_block_size: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayingState {
    #[default]
    Stopped,
    Playing,
    Recording,
    OfflineRendering,
}

impl PlayingState {
    pub fn is_rolling(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// Per-block description of the host's transport, supplied with every
/// process call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessDetails {
    pub sample_rate: f64,
    pub block_size: u32,
    /// Beats per minute.
    pub tempo: f64,
    /// Project position in quarter notes.
    pub player_time: f64,
    /// Position of the last bar start in quarter notes.
    pub bar_start_pos: f64,
    pub time_sig_numerator: u32,
    pub time_sig_denominator: u32,
    pub cycle_enabled: bool,
    pub cycle_start: f64,
    pub cycle_end: f64,
    pub playing_state: PlayingState,
    /// Wall-clock time of the block in nanoseconds.
    pub nanos: i64,
}

impl Default for ProcessDetails {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: 512,
            tempo: 120.0,
            player_time: 0.0,
            bar_start_pos: 0.0,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
            cycle_enabled: false,
            cycle_start: 0.0,
            cycle_end: 0.0,
            playing_state: PlayingState::Stopped,
            nanos: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterFlags {
    pub automatable: bool,
    pub read_only: bool,
    pub wrap_around: bool,
    pub hidden: bool,
    pub is_list: bool,
    pub is_bypass: bool,
}

/// Static metadata as the controller reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub id: ParamId,
    pub title: String,
    pub short_title: String,
    pub units: String,
    pub step_count: i32,
    pub default_value: f64,
    pub flags: ParameterFlags,
}

/// Metadata plus current value, as returned to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub id: ParamId,
    pub index: usize,
    pub name: String,
    pub units: String,
    /// Normalized value in `[0, 1]`.
    pub value: f64,
    pub formatted: String,
    pub default_value: f64,
    pub flags: ParameterFlags,
}

// ---------------------------------------------------------------------------
// Track context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Colour {
    /// Packed as `b | g << 8 | r << 16 | a << 24`.
    pub fn packed(self) -> u32 {
        u32::from(self.b)
            | u32::from(self.g) << 8
            | u32::from(self.r) << 16
            | u32::from(self.a) << 24
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackContext {
    pub colour: Colour,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Editor views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    Hwnd,
    X11,
    Wayland,
    NsView,
    Other,
}

/// Native parent window handle supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHandle(pub *mut c_void);

// The handle is only an address passed through to the plugin on the UI thread.
unsafe impl Send for WindowHandle {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSize {
    pub width: u32,
    pub height: u32,
}
