//! SessionStore - In-memory session state
//!
//! Mutators clamp their input, bounds-check ids and report whether the
//! stored value actually changed, so callers can skip redundant events.

use parking_lot::RwLock;

use super::types::{
    clamp_pan, clamp_send, clamp_tempo, clamp_volume, ClipSlot, ClipStatus, SendSlot, TempoState,
    Track,
};
use crate::error::SessionError;

/// Session state contract shared by the sync controller and the UI side
///
/// Every mutator returns `Ok(true)` when the stored value changed,
/// `Ok(false)` when it was already equal, and an error for unknown ids.
pub trait SessionState: Send + Sync {
    /// Replace the session with `tracks` default tracks of `scenes` slots
    fn init_project(&self, tracks: usize, scenes: usize);
    /// Replace the session with one track per remote name, keeping the scene count
    fn init_project_from_remote(&self, names: &[String]);

    fn set_track_volume(&self, track: usize, value: f64) -> Result<bool, SessionError>;
    fn set_track_pan(&self, track: usize, value: f64) -> Result<bool, SessionError>;
    fn set_track_mute(&self, track: usize, value: bool) -> Result<bool, SessionError>;
    fn set_track_solo(&self, track: usize, value: bool) -> Result<bool, SessionError>;
    fn set_track_arm(&self, track: usize, value: bool) -> Result<bool, SessionError>;
    fn set_track_send(&self, track: usize, send: SendSlot, value: f64)
        -> Result<bool, SessionError>;
    fn set_track_name(&self, track: usize, name: &str) -> Result<bool, SessionError>;

    fn set_clip_status(
        &self,
        track: usize,
        scene: usize,
        status: ClipStatus,
    ) -> Result<bool, SessionError>;
    fn set_clip_name(&self, track: usize, scene: usize, name: &str) -> Result<bool, SessionError>;
    fn set_clip_has_content(
        &self,
        track: usize,
        scene: usize,
        has_content: bool,
    ) -> Result<bool, SessionError>;

    fn set_tempo(&self, bpm: f64) -> bool;
    fn set_playing(&self, playing: bool) -> bool;
    fn set_recording(&self, recording: bool) -> bool;

    fn track_count(&self) -> usize;
    fn scene_count(&self) -> usize;
    fn track(&self, track: usize) -> Option<Track>;
    fn clip(&self, track: usize, scene: usize) -> Option<ClipSlot>;
    fn tempo(&self) -> TempoState;
    fn track_names(&self) -> Vec<String>;
}

struct Session {
    tracks: Vec<Track>,
    scenes: usize,
    tempo: TempoState,
}

/// Lock-guarded in-memory implementation of [`SessionState`]
pub struct SessionStore {
    inner: RwLock<Session>,
}

impl SessionStore {
    pub fn new(tracks: usize, scenes: usize) -> Self {
        let store = Self {
            inner: RwLock::new(Session {
                tracks: Vec::new(),
                scenes,
                tempo: TempoState::default(),
            }),
        };
        store.init_project(tracks, scenes);
        store
    }

    /// All tracks, cloned out of the lock
    pub fn snapshot(&self) -> Vec<Track> {
        self.inner.read().tracks.clone()
    }

    fn with_track<F>(&self, track: usize, f: F) -> Result<bool, SessionError>
    where
        F: FnOnce(&mut Track) -> bool,
    {
        let mut session = self.inner.write();
        let entry = session
            .tracks
            .get_mut(track)
            .ok_or(SessionError::UnknownTrack { track })?;
        Ok(f(entry))
    }

    fn with_clip<F>(&self, track: usize, scene: usize, f: F) -> Result<bool, SessionError>
    where
        F: FnOnce(&mut ClipSlot) -> bool,
    {
        let mut session = self.inner.write();
        let slot = session
            .tracks
            .get_mut(track)
            .and_then(|t| t.clips.get_mut(scene))
            .ok_or(SessionError::UnknownClip { track, scene })?;
        Ok(f(slot))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(8, 12)
    }
}

/// Assign and report whether the value changed
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

impl SessionState for SessionStore {
    fn init_project(&self, tracks: usize, scenes: usize) {
        let mut session = self.inner.write();
        session.scenes = scenes;
        session.tracks = (0..tracks)
            .map(|id| Track::new(id, format!("Track {}", id + 1), scenes))
            .collect();
    }

    fn init_project_from_remote(&self, names: &[String]) {
        let mut session = self.inner.write();
        let scenes = session.scenes;
        session.tracks = names
            .iter()
            .enumerate()
            .map(|(id, name)| Track::new(id, name.clone(), scenes))
            .collect();
    }

    fn set_track_volume(&self, track: usize, value: f64) -> Result<bool, SessionError> {
        self.with_track(track, |t| replace(&mut t.volume, clamp_volume(value)))
    }

    fn set_track_pan(&self, track: usize, value: f64) -> Result<bool, SessionError> {
        self.with_track(track, |t| replace(&mut t.pan, clamp_pan(value)))
    }

    fn set_track_mute(&self, track: usize, value: bool) -> Result<bool, SessionError> {
        self.with_track(track, |t| replace(&mut t.mute, value))
    }

    fn set_track_solo(&self, track: usize, value: bool) -> Result<bool, SessionError> {
        self.with_track(track, |t| replace(&mut t.solo, value))
    }

    fn set_track_arm(&self, track: usize, value: bool) -> Result<bool, SessionError> {
        self.with_track(track, |t| replace(&mut t.arm, value))
    }

    fn set_track_send(
        &self,
        track: usize,
        send: SendSlot,
        value: f64,
    ) -> Result<bool, SessionError> {
        self.with_track(track, |t| replace(&mut t.sends[send.index()], clamp_send(value)))
    }

    fn set_track_name(&self, track: usize, name: &str) -> Result<bool, SessionError> {
        self.with_track(track, |t| {
            if t.name == name {
                false
            } else {
                t.name = name.to_string();
                true
            }
        })
    }

    fn set_clip_status(
        &self,
        track: usize,
        scene: usize,
        status: ClipStatus,
    ) -> Result<bool, SessionError> {
        self.with_clip(track, scene, |c| {
            let changed = replace(&mut c.status, status);
            if status != ClipStatus::Empty {
                c.has_content = true;
            }
            changed
        })
    }

    fn set_clip_name(&self, track: usize, scene: usize, name: &str) -> Result<bool, SessionError> {
        self.with_clip(track, scene, |c| {
            if c.name == name {
                false
            } else {
                c.name = name.to_string();
                true
            }
        })
    }

    fn set_clip_has_content(
        &self,
        track: usize,
        scene: usize,
        has_content: bool,
    ) -> Result<bool, SessionError> {
        self.with_clip(track, scene, |c| replace(&mut c.has_content, has_content))
    }

    fn set_tempo(&self, bpm: f64) -> bool {
        replace(&mut self.inner.write().tempo.bpm, clamp_tempo(bpm))
    }

    fn set_playing(&self, playing: bool) -> bool {
        replace(&mut self.inner.write().tempo.playing, playing)
    }

    fn set_recording(&self, recording: bool) -> bool {
        replace(&mut self.inner.write().tempo.recording, recording)
    }

    fn track_count(&self) -> usize {
        self.inner.read().tracks.len()
    }

    fn scene_count(&self) -> usize {
        self.inner.read().scenes
    }

    fn track(&self, track: usize) -> Option<Track> {
        self.inner.read().tracks.get(track).cloned()
    }

    fn clip(&self, track: usize, scene: usize) -> Option<ClipSlot> {
        self.inner
            .read()
            .tracks
            .get(track)
            .and_then(|t| t.clips.get(scene))
            .cloned()
    }

    fn tempo(&self) -> TempoState {
        self.inner.read().tempo
    }

    fn track_names(&self) -> Vec<String> {
        self.inner.read().tracks.iter().map(|t| t.name.clone()).collect()
    }
}
