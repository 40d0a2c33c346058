//! Local intents -> outbound messages

use std::time::Instant;

use rosc::OscType;
use tracing::{debug, error, trace};

use super::SyncController;
use crate::events::{ClipStatusUpdate, Event};
use crate::osc::args::flag;
use crate::session::{
    clamp_pan, clamp_send, clamp_tempo, clamp_volume, ClipStatus, EntityKey, SendSlot, TrackParam,
};

impl SyncController {
    fn has_track(&self, track: usize) -> bool {
        let known = track < self.store.track_count();
        if !known {
            debug!("Ignoring intent for unknown track {}", track);
        }
        known
    }

    fn has_clip(&self, track: usize, scene: usize) -> bool {
        let known = track < self.store.track_count() && scene < self.store.scene_count();
        if !known {
            debug!("Ignoring intent for unknown clip slot {}/{}", track, scene);
        }
        known
    }

    /// Send a write for `key` unless we are in the middle of applying the
    /// remote's own update for it
    fn write(&self, key: EntityKey, value: f64, address: &str, arg: OscType) -> bool {
        if self.in_flight.contains(&key) {
            trace!("Suppressing echo of {:?} to {}", key, address);
            return false;
        }

        self.pending.begin(key, value, Instant::now());
        debug!("Write {} {:?}", address, arg);
        let sent = self.outbound.send(address, vec![arg]);
        if !sent {
            self.pending.cancel(&key);
        }
        sent
    }

    fn write_level(&self, track: usize, param: TrackParam, value: f64, address: String) -> bool {
        if !self.has_track(track) {
            return false;
        }
        self.write(
            EntityKey::Track(track, param),
            value,
            &address,
            OscType::Float(value as f32),
        )
    }

    fn write_toggle(&self, track: usize, param: TrackParam, value: bool, address: String) -> bool {
        if !self.has_track(track) {
            return false;
        }
        let numeric = if value { 1.0 } else { 0.0 };
        self.write(EntityKey::Track(track, param), numeric, &address, flag(value))
    }

    pub fn set_track_volume(&self, track: usize, value: f64) -> bool {
        let value = clamp_volume(value);
        self.write_level(
            track,
            TrackParam::Volume,
            value,
            format!("/live/track/{}/volume", track),
        )
    }

    pub fn set_track_pan(&self, track: usize, value: f64) -> bool {
        let value = clamp_pan(value);
        self.write_level(track, TrackParam::Pan, value, format!("/live/track/{}/pan", track))
    }

    pub fn set_track_send(&self, track: usize, send: SendSlot, value: f64) -> bool {
        let value = clamp_send(value);
        self.write_level(
            track,
            TrackParam::Send(send),
            value,
            format!("/live/track/{}/send/{}", track, send.as_str()),
        )
    }

    pub fn set_track_mute(&self, track: usize, value: bool) -> bool {
        self.write_toggle(track, TrackParam::Mute, value, format!("/live/track/{}/mute", track))
    }

    pub fn set_track_solo(&self, track: usize, value: bool) -> bool {
        self.write_toggle(track, TrackParam::Solo, value, format!("/live/track/{}/solo", track))
    }

    pub fn set_track_arm(&self, track: usize, value: bool) -> bool {
        self.write_toggle(track, TrackParam::Arm, value, format!("/live/track/{}/arm", track))
    }

    pub fn set_tempo(&self, bpm: f64) -> bool {
        let bpm = clamp_tempo(bpm);
        self.write(EntityKey::Tempo, bpm, "/live/tempo", OscType::Float(bpm as f32))
    }

    /// Launch a clip, or stop its track when the clip is already playing
    ///
    /// A launch marks the slot queued and any other active slot on the track
    /// stopped until Live pushes the real status.
    pub fn trigger_clip(&self, track: usize, scene: usize) -> bool {
        let Some(slot) = self.store.clip(track, scene) else {
            debug!("Ignoring intent for unknown clip slot {}/{}", track, scene);
            return false;
        };

        if slot.status == ClipStatus::Playing {
            debug!("Clip {}/{} already playing, stopping track", track, scene);
            return self.stop_track(track);
        }

        let sent = self
            .outbound
            .send(&format!("/live/clip/{}/{}/trigger", track, scene), vec![]);
        if !sent {
            return false;
        }

        // One active clip per track
        for other in 0..self.store.scene_count() {
            if other == scene {
                continue;
            }
            let active = self
                .store
                .clip(track, other)
                .is_some_and(|c| matches!(c.status, ClipStatus::Playing | ClipStatus::Queued));
            if active {
                self.local_clip_status(track, other, ClipStatus::Empty);
            }
        }
        self.local_clip_status(track, scene, ClipStatus::Queued);
        true
    }

    fn local_clip_status(&self, track: usize, scene: usize, status: ClipStatus) {
        match self.store.set_clip_status(track, scene, status) {
            Ok(true) => self.bus.publish(Event::LiveClipStatus(ClipStatusUpdate {
                track,
                scene,
                status,
            })),
            Ok(false) => {}
            Err(e) => error!("Session store rejected a bounds-checked update: {}", e),
        }
    }

    pub fn stop_clip(&self, track: usize, scene: usize) -> bool {
        if !self.has_clip(track, scene) {
            return false;
        }
        self.outbound
            .send(&format!("/live/clip/{}/{}/stop", track, scene), vec![])
    }

    pub fn stop_track(&self, track: usize) -> bool {
        if !self.has_track(track) {
            return false;
        }
        self.outbound.send(&format!("/live/track/{}/stop", track), vec![])
    }

    pub fn launch_scene(&self, scene: usize) -> bool {
        if scene >= self.store.scene_count() {
            debug!("Ignoring launch of unknown scene {}", scene);
            return false;
        }
        self.outbound.send(&format!("/live/scene/{}/launch", scene), vec![])
    }

    pub fn play(&self) -> bool {
        let sent = self.outbound.send("/live/play", vec![]);
        if sent {
            self.store.set_playing(true);
        }
        sent
    }

    pub fn stop(&self) -> bool {
        let sent = self.outbound.send("/live/stop", vec![]);
        if sent {
            self.store.set_playing(false);
            self.store.set_recording(false);
        }
        sent
    }

    pub fn record(&self) -> bool {
        let sent = self.outbound.send("/live/record", vec![]);
        if sent {
            self.store.set_recording(true);
        }
        sent
    }

    /// Ask the remote to push its full state
    pub fn request_sync(&self) -> bool {
        self.outbound.send("/live/sync/request", vec![])
    }
}
