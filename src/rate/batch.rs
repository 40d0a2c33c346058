//! Time-windowed batching of per-entity updates into UI batch events

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::events::{ClipBatch, ClipChanges, Event, Tempo, TrackBatch, TrackChanges};

/// Collects updates for one window, starting at the first buffered update
///
/// Repeated writes to the same field collapse to the last value. A flush
/// yields at most one `ui:track_batch`, one `ui:clip_batch` and one tempo
/// event.
pub struct Batcher {
    window: Duration,
    opened_at: Option<Instant>,
    tracks: BTreeMap<usize, TrackChanges>,
    clips: BTreeMap<(usize, usize), ClipChanges>,
    tempo: Option<f64>,
}

impl Batcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            opened_at: None,
            tracks: BTreeMap::new(),
            clips: BTreeMap::new(),
            tempo: None,
        }
    }

    /// Buffer one `live:*` state event; other events are ignored
    pub fn push(&mut self, event: &Event, now: Instant) {
        let before = self.len();

        match event {
            Event::LiveTrackVolume(e) => self.track(e.track).volume = Some(e.value),
            Event::LiveTrackPan(e) => self.track(e.track).pan = Some(e.value),
            Event::LiveTrackMute(e) => self.track(e.track).mute = Some(e.value),
            Event::LiveTrackSolo(e) => self.track(e.track).solo = Some(e.value),
            Event::LiveTrackArm(e) => self.track(e.track).arm = Some(e.value),
            Event::LiveTrackSend(e) => self.track(e.track).sends[e.send.index()] = Some(e.value),
            Event::LiveTrackName(e) => self.track(e.track).name = Some(e.name.clone()),
            Event::LiveClipStatus(e) => self.clip(e.track, e.scene).status = Some(e.status),
            Event::LiveClipName(e) => self.clip(e.track, e.scene).name = Some(e.name.clone()),
            Event::LiveTempo(e) => self.tempo = Some(e.bpm),
            other => {
                trace!("Batcher ignoring {}", other.topic());
                return;
            }
        }

        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        trace!("Batched {} ({} -> {} entities)", event.topic(), before, self.len());
    }

    fn track(&mut self, track: usize) -> &mut TrackChanges {
        self.tracks.entry(track).or_insert_with(|| TrackChanges {
            track,
            ..TrackChanges::default()
        })
    }

    fn clip(&mut self, track: usize, scene: usize) -> &mut ClipChanges {
        self.clips
            .entry((track, scene))
            .or_insert_with(|| ClipChanges {
                track,
                scene,
                status: None,
                name: None,
            })
    }

    /// When the open window closes, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.window)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// Number of buffered entities (tracks, clip slots, tempo)
    pub fn len(&self) -> usize {
        self.tracks.len() + self.clips.len() + self.tempo.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emit the buffered window and start over
    pub fn flush(&mut self) -> Vec<Event> {
        let mut out = Vec::new();

        if !self.tracks.is_empty() {
            let tracks = std::mem::take(&mut self.tracks).into_values().collect();
            out.push(Event::UiTrackBatch(TrackBatch { tracks }));
        }
        if !self.clips.is_empty() {
            let clips = std::mem::take(&mut self.clips).into_values().collect();
            out.push(Event::UiClipBatch(ClipBatch { clips }));
        }
        if let Some(bpm) = self.tempo.take() {
            out.push(Event::LiveTempo(Tempo { bpm }));
        }

        self.opened_at = None;
        out
    }

    /// Drop everything buffered without emitting
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.clips.clear();
        self.tempo = None;
        self.opened_at = None;
    }
}
