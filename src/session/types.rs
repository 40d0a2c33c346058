//! Session data model
//!
//! Tracks own their clip slots, so a slot can never outlive or precede its
//! track. Every numeric setter goes through the clamp helpers below.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const VOLUME_MIN: f64 = 0.0;
pub const VOLUME_MAX: f64 = 1.0;
pub const PAN_MIN: f64 = -1.0;
pub const PAN_MAX: f64 = 1.0;
pub const TEMPO_MIN: f64 = 20.0;
pub const TEMPO_MAX: f64 = 999.0;

pub const DEFAULT_VOLUME: f64 = 0.8;
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Clamp into `[min, max]`; NaN clamps to `min`
fn clamp_range(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

pub fn clamp_volume(value: f64) -> f64 {
    clamp_range(value, VOLUME_MIN, VOLUME_MAX)
}

pub fn clamp_send(value: f64) -> f64 {
    clamp_range(value, VOLUME_MIN, VOLUME_MAX)
}

pub fn clamp_pan(value: f64) -> f64 {
    clamp_range(value, PAN_MIN, PAN_MAX)
}

pub fn clamp_tempo(value: f64) -> f64 {
    clamp_range(value, TEMPO_MIN, TEMPO_MAX)
}

/// Return send A/B/C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendSlot {
    A,
    B,
    C,
}

impl SendSlot {
    pub const ALL: [SendSlot; 3] = [SendSlot::A, SendSlot::B, SendSlot::C];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Address segment: `a`, `b` or `c`
    pub fn as_str(self) -> &'static str {
        match self {
            SendSlot::A => "a",
            SendSlot::B => "b",
            SendSlot::C => "c",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipStatus {
    #[default]
    Empty,
    Queued,
    Playing,
    Recording,
}

impl ClipStatus {
    /// Parse the remote's textual status
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "empty" | "stopped" => Some(ClipStatus::Empty),
            "queued" | "triggered" => Some(ClipStatus::Queued),
            "playing" => Some(ClipStatus::Playing),
            "recording" => Some(ClipStatus::Recording),
            _ => None,
        }
    }

    /// Numeric playing status: 0 stopped, 1 playing, 2 queued, 3 recording
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ClipStatus::Empty),
            1 => Some(ClipStatus::Playing),
            2 => Some(ClipStatus::Queued),
            3 => Some(ClipStatus::Recording),
            _ => None,
        }
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipStatus::Empty => write!(f, "empty"),
            ClipStatus::Queued => write!(f, "queued"),
            ClipStatus::Playing => write!(f, "playing"),
            ClipStatus::Recording => write!(f, "recording"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ClipSlot {
    pub status: ClipStatus,
    pub name: String,
    pub has_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: usize,
    pub name: String,
    pub volume: f64,
    pub pan: f64,
    pub mute: bool,
    pub solo: bool,
    pub arm: bool,
    pub sends: [f64; 3],
    /// One slot per scene
    pub clips: Vec<ClipSlot>,
}

impl Track {
    pub fn new(id: usize, name: impl Into<String>, scenes: usize) -> Self {
        Self {
            id,
            name: name.into(),
            volume: DEFAULT_VOLUME,
            pan: 0.0,
            mute: false,
            solo: false,
            arm: false,
            sends: [0.0; 3],
            clips: vec![ClipSlot::default(); scenes],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoState {
    pub bpm: f64,
    pub playing: bool,
    pub recording: bool,
}

impl Default for TempoState {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_TEMPO,
            playing: false,
            recording: false,
        }
    }
}

/// Per-track parameter, used to key sync bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackParam {
    Volume,
    Pan,
    Mute,
    Solo,
    Arm,
    Send(SendSlot),
    Name,
}

impl TrackParam {
    /// Continuous controls get the longer grace window
    pub fn is_continuous(self) -> bool {
        matches!(self, TrackParam::Volume | TrackParam::Pan | TrackParam::Send(_))
    }
}

/// Identity of one synchronized entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Track(usize, TrackParam),
    Clip(usize, usize),
    Tempo,
}

impl EntityKey {
    pub fn is_continuous(&self) -> bool {
        match self {
            EntityKey::Track(_, param) => param.is_continuous(),
            EntityKey::Clip(..) => false,
            EntityKey::Tempo => true,
        }
    }
}
