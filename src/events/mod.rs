//! Typed events exchanged between the sync core and the UI side
//!
//! `live:*` events describe confirmed remote state, UI topics carry local
//! intents towards the remote, and `ui:*` topics carry rate-limited batches
//! for rendering.

mod bus;

pub use bus::{EventBus, SubscriptionId};

use serde::Serialize;
use std::fmt;

use crate::osc::Endpoint;
use crate::session::{ClipStatus, SendSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topic {
    // Remote state
    LiveTrackVolume,
    LiveTrackPan,
    LiveTrackMute,
    LiveTrackSolo,
    LiveTrackArm,
    LiveTrackSend,
    LiveTrackName,
    LiveClipStatus,
    LiveClipName,
    LiveTempo,
    LiveTrackNames,
    LiveStructureChanged,
    LiveSyncComplete,
    // Local intents
    TrackVolume,
    TrackPan,
    TrackMute,
    TrackSolo,
    TrackArm,
    TrackSend,
    TrackStop,
    ClipTrigger,
    ClipStop,
    SceneLaunch,
    TempoSet,
    TransportPlay,
    TransportStop,
    TransportRecord,
    SettingsChanged,
    // Rendering batches
    UiTrackBatch,
    UiClipBatch,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::LiveTrackVolume => "live:track_volume",
            Topic::LiveTrackPan => "live:track_pan",
            Topic::LiveTrackMute => "live:track_mute",
            Topic::LiveTrackSolo => "live:track_solo",
            Topic::LiveTrackArm => "live:track_arm",
            Topic::LiveTrackSend => "live:track_send",
            Topic::LiveTrackName => "live:track_name",
            Topic::LiveClipStatus => "live:clip_status",
            Topic::LiveClipName => "live:clip_name",
            Topic::LiveTempo => "live:tempo",
            Topic::LiveTrackNames => "live:track_names",
            Topic::LiveStructureChanged => "live:structure_changed",
            Topic::LiveSyncComplete => "live:sync_complete",
            Topic::TrackVolume => "track:volume",
            Topic::TrackPan => "track:pan",
            Topic::TrackMute => "track:mute",
            Topic::TrackSolo => "track:solo",
            Topic::TrackArm => "track:arm",
            Topic::TrackSend => "track:send",
            Topic::TrackStop => "track:stop",
            Topic::ClipTrigger => "clip:trigger",
            Topic::ClipStop => "clip:stop",
            Topic::SceneLaunch => "scene:launch",
            Topic::TempoSet => "tempo:set",
            Topic::TransportPlay => "transport:play",
            Topic::TransportStop => "transport:stop",
            Topic::TransportRecord => "transport:record",
            Topic::SettingsChanged => "settings:changed",
            Topic::UiTrackBatch => "ui:track_batch",
            Topic::UiClipBatch => "ui:clip_batch",
        }
    }

    /// Every `live:*` topic carrying per-entity state (what the UI feed consumes)
    pub const LIVE_STATE: [Topic; 10] = [
        Topic::LiveTrackVolume,
        Topic::LiveTrackPan,
        Topic::LiveTrackMute,
        Topic::LiveTrackSolo,
        Topic::LiveTrackArm,
        Topic::LiveTrackSend,
        Topic::LiveTrackName,
        Topic::LiveClipStatus,
        Topic::LiveClipName,
        Topic::LiveTempo,
    ];

    /// Topics that reset the UI's view of the session
    pub const STRUCTURAL: [Topic; 3] = [
        Topic::LiveTrackNames,
        Topic::LiveStructureChanged,
        Topic::LiveSyncComplete,
    ];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackLevel {
    pub track: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackToggle {
    pub track: usize,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackSendLevel {
    pub track: usize,
    pub send: SendSlot,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackName {
    pub track: usize,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackRef {
    pub track: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClipRef {
    pub track: usize,
    pub scene: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SceneRef {
    pub scene: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClipStatusUpdate {
    pub track: usize,
    pub scene: usize,
    pub status: ClipStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipName {
    pub track: usize,
    pub scene: usize,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tempo {
    pub bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackNames {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StructureChange {
    pub tracks: usize,
    pub scenes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncComplete {
    pub tracks: usize,
    /// Requests queued for the fan-out
    pub requests: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsChange {
    pub endpoint: Endpoint,
}

/// Coalesced changes for one track; `None` means untouched in this window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackChanges {
    pub track: usize,
    pub volume: Option<f64>,
    pub pan: Option<f64>,
    pub mute: Option<bool>,
    pub solo: Option<bool>,
    pub arm: Option<bool>,
    pub sends: [Option<f64>; 3],
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackBatch {
    pub tracks: Vec<TrackChanges>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipChanges {
    pub track: usize,
    pub scene: usize,
    pub status: Option<ClipStatus>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClipBatch {
    /// Ordered by track, then scene
    pub clips: Vec<ClipChanges>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", content = "payload")]
pub enum Event {
    #[serde(rename = "live:track_volume")]
    LiveTrackVolume(TrackLevel),
    #[serde(rename = "live:track_pan")]
    LiveTrackPan(TrackLevel),
    #[serde(rename = "live:track_mute")]
    LiveTrackMute(TrackToggle),
    #[serde(rename = "live:track_solo")]
    LiveTrackSolo(TrackToggle),
    #[serde(rename = "live:track_arm")]
    LiveTrackArm(TrackToggle),
    #[serde(rename = "live:track_send")]
    LiveTrackSend(TrackSendLevel),
    #[serde(rename = "live:track_name")]
    LiveTrackName(TrackName),
    #[serde(rename = "live:clip_status")]
    LiveClipStatus(ClipStatusUpdate),
    #[serde(rename = "live:clip_name")]
    LiveClipName(ClipName),
    #[serde(rename = "live:tempo")]
    LiveTempo(Tempo),
    #[serde(rename = "live:track_names")]
    LiveTrackNames(TrackNames),
    #[serde(rename = "live:structure_changed")]
    LiveStructureChanged(StructureChange),
    #[serde(rename = "live:sync_complete")]
    LiveSyncComplete(SyncComplete),

    #[serde(rename = "track:volume")]
    TrackVolume(TrackLevel),
    #[serde(rename = "track:pan")]
    TrackPan(TrackLevel),
    #[serde(rename = "track:mute")]
    TrackMute(TrackToggle),
    #[serde(rename = "track:solo")]
    TrackSolo(TrackToggle),
    #[serde(rename = "track:arm")]
    TrackArm(TrackToggle),
    #[serde(rename = "track:send")]
    TrackSend(TrackSendLevel),
    #[serde(rename = "track:stop")]
    TrackStop(TrackRef),
    #[serde(rename = "clip:trigger")]
    ClipTrigger(ClipRef),
    #[serde(rename = "clip:stop")]
    ClipStop(ClipRef),
    #[serde(rename = "scene:launch")]
    SceneLaunch(SceneRef),
    #[serde(rename = "tempo:set")]
    TempoSet(Tempo),
    #[serde(rename = "transport:play")]
    TransportPlay,
    #[serde(rename = "transport:stop")]
    TransportStop,
    #[serde(rename = "transport:record")]
    TransportRecord,
    #[serde(rename = "settings:changed")]
    SettingsChanged(SettingsChange),

    #[serde(rename = "ui:track_batch")]
    UiTrackBatch(TrackBatch),
    #[serde(rename = "ui:clip_batch")]
    UiClipBatch(ClipBatch),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::LiveTrackVolume(_) => Topic::LiveTrackVolume,
            Event::LiveTrackPan(_) => Topic::LiveTrackPan,
            Event::LiveTrackMute(_) => Topic::LiveTrackMute,
            Event::LiveTrackSolo(_) => Topic::LiveTrackSolo,
            Event::LiveTrackArm(_) => Topic::LiveTrackArm,
            Event::LiveTrackSend(_) => Topic::LiveTrackSend,
            Event::LiveTrackName(_) => Topic::LiveTrackName,
            Event::LiveClipStatus(_) => Topic::LiveClipStatus,
            Event::LiveClipName(_) => Topic::LiveClipName,
            Event::LiveTempo(_) => Topic::LiveTempo,
            Event::LiveTrackNames(_) => Topic::LiveTrackNames,
            Event::LiveStructureChanged(_) => Topic::LiveStructureChanged,
            Event::LiveSyncComplete(_) => Topic::LiveSyncComplete,
            Event::TrackVolume(_) => Topic::TrackVolume,
            Event::TrackPan(_) => Topic::TrackPan,
            Event::TrackMute(_) => Topic::TrackMute,
            Event::TrackSolo(_) => Topic::TrackSolo,
            Event::TrackArm(_) => Topic::TrackArm,
            Event::TrackSend(_) => Topic::TrackSend,
            Event::TrackStop(_) => Topic::TrackStop,
            Event::ClipTrigger(_) => Topic::ClipTrigger,
            Event::ClipStop(_) => Topic::ClipStop,
            Event::SceneLaunch(_) => Topic::SceneLaunch,
            Event::TempoSet(_) => Topic::TempoSet,
            Event::TransportPlay => Topic::TransportPlay,
            Event::TransportStop => Topic::TransportStop,
            Event::TransportRecord => Topic::TransportRecord,
            Event::SettingsChanged(_) => Topic::SettingsChanged,
            Event::UiTrackBatch(_) => Topic::UiTrackBatch,
            Event::UiClipBatch(_) => Topic::UiClipBatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::LiveTrackVolume.as_str(), "live:track_volume");
        assert_eq!(Topic::SettingsChanged.to_string(), "settings:changed");
        assert_eq!(Event::TransportPlay.topic(), Topic::TransportPlay);
        assert_eq!(
            Event::UiClipBatch(ClipBatch::default()).topic().as_str(),
            "ui:clip_batch"
        );
    }

    #[test]
    fn test_event_serializes_with_topic_tag() {
        let event = Event::LiveTrackVolume(TrackLevel { track: 2, value: 0.5 });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "live:track_volume");
        assert_eq!(json["payload"]["track"], 2);
    }
}
