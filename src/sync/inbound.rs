//! Inbound messages -> store mutations and `live:*` events
//!
//! Arguments are positional with ids first and the value last. Push
//! messages carry the ids in the address instead. Anything short,
//! mistyped or out of range is dropped before touching the store.

use std::sync::Arc;

use rosc::{OscMessage, OscType};
use tracing::{debug, error, trace};

use super::SyncController;
use crate::events::{ClipName, ClipStatusUpdate, Event, TrackName};
use crate::osc::args::{bool_at, float_at, index_at, int_at, string_at};
use crate::osc::OscTransport;
use crate::session::{ClipStatus, EntityKey, SendSlot, TrackParam};

/// Track-level parameters answered on `/live/track/get/<param>` and pushed
/// on `/live/track/<id>/<param>`
const TRACK_PARAMS: [(&str, TrackParam); 5] = [
    ("volume", TrackParam::Volume),
    ("pan", TrackParam::Pan),
    ("mute", TrackParam::Mute),
    ("solo", TrackParam::Solo),
    ("arm", TrackParam::Arm),
];

/// Numeric id embedded in an address, counted in non-empty segments
fn address_index(address: &str, position: usize) -> Option<usize> {
    address
        .split('/')
        .filter(|s| !s.is_empty())
        .nth(position)?
        .parse()
        .ok()
}

fn param_value(param: TrackParam, args: &[OscType], index: usize) -> Option<f64> {
    match param {
        TrackParam::Mute | TrackParam::Solo | TrackParam::Arm => {
            bool_at(args, index).map(|b| if b { 1.0 } else { 0.0 })
        }
        _ => float_at(args, index),
    }
}

/// Status as sent by the remote: numeric code or name
fn clip_status_at(args: &[OscType], index: usize) -> Option<ClipStatus> {
    match args.get(index)? {
        OscType::String(s) => ClipStatus::parse(s),
        _ => int_at(args, index).and_then(ClipStatus::from_code),
    }
}

fn malformed(msg: &OscMessage) {
    trace!("Dropping malformed {} {:?}", msg.addr, msg.args);
}

impl SyncController {
    /// Register a handler that reaches the controller through a weak ref
    fn route<F>(self: &Arc<Self>, transport: &OscTransport, pattern: &str, f: F)
    where
        F: Fn(&SyncController, &OscMessage) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        transport.register_handler(pattern, move |msg: &OscMessage| {
            if let Some(controller) = weak.upgrade() {
                f(&controller, msg);
            }
            Ok(())
        });
    }

    /// Register every response, push and structure handler on `transport`
    pub fn install_handlers(self: &Arc<Self>, transport: &OscTransport) {
        let before = transport.handlers_count();

        for (name, param) in TRACK_PARAMS {
            // Response: [track, value]
            self.route(transport, &format!("/live/track/get/{}", name), move |c, msg| {
                match (index_at(&msg.args, 0), param_value(param, &msg.args, 1)) {
                    (Some(track), Some(value)) => c.remote_track_param(track, param, value),
                    _ => malformed(msg),
                }
            });

            // Push: /live/track/<id>/<param> [value]
            self.route(transport, &format!("/live/track/*/{}", name), move |c, msg| {
                let value = msg
                    .args
                    .len()
                    .checked_sub(1)
                    .and_then(|last| param_value(param, &msg.args, last));
                match (address_index(&msg.addr, 2), value) {
                    (Some(track), Some(value)) => c.remote_track_param(track, param, value),
                    _ => malformed(msg),
                }
            });
        }

        // [track, send, value]
        self.route(transport, "/live/track/get/send", |c, msg| {
            let send = index_at(&msg.args, 1).and_then(SendSlot::from_index);
            match (index_at(&msg.args, 0), send, float_at(&msg.args, 2)) {
                (Some(track), Some(send), Some(value)) => {
                    c.remote_track_param(track, TrackParam::Send(send), value)
                }
                _ => malformed(msg),
            }
        });

        self.route(transport, "/live/track/get/name", |c, msg| {
            match (index_at(&msg.args, 0), string_at(&msg.args, 1)) {
                (Some(track), Some(name)) => c.remote_track_name(track, name),
                _ => malformed(msg),
            }
        });
        self.route(transport, "/live/track/*/name", |c, msg| {
            let name = msg.args.len().checked_sub(1).and_then(|i| string_at(&msg.args, i));
            match (address_index(&msg.addr, 2), name) {
                (Some(track), Some(name)) => c.remote_track_name(track, name),
                _ => malformed(msg),
            }
        });

        // [track, scene, status]
        self.route(transport, "/live/clip/get/playing_status", |c, msg| {
            match (
                index_at(&msg.args, 0),
                index_at(&msg.args, 1),
                clip_status_at(&msg.args, 2),
            ) {
                (Some(track), Some(scene), Some(status)) => {
                    c.remote_clip_status(track, scene, status);
                }
                _ => malformed(msg),
            }
        });
        // Push: /live/clip/<track>/<scene>/status [status]
        self.route(transport, "/live/clip/*/*/status", |c, msg| {
            let status = msg
                .args
                .len()
                .checked_sub(1)
                .and_then(|i| clip_status_at(&msg.args, i));
            match (address_index(&msg.addr, 2), address_index(&msg.addr, 3), status) {
                (Some(track), Some(scene), Some(status)) => {
                    if c.remote_clip_status(track, scene, status) {
                        c.refresh_clip_meta(track, scene, status);
                    }
                }
                _ => malformed(msg),
            }
        });

        self.route(transport, "/live/clip/get/name", |c, msg| {
            match (
                index_at(&msg.args, 0),
                index_at(&msg.args, 1),
                string_at(&msg.args, 2),
            ) {
                (Some(track), Some(scene), Some(name)) => c.remote_clip_name(track, scene, name),
                _ => malformed(msg),
            }
        });

        self.route(transport, "/live/clip/get/length", |c, msg| {
            match (
                index_at(&msg.args, 0),
                index_at(&msg.args, 1),
                float_at(&msg.args, 2),
            ) {
                (Some(track), Some(scene), Some(length)) => {
                    if c.clip_known(track, scene) {
                        c.clip_cache.update((track, scene), |m| m.length = Some(length));
                    }
                }
                _ => malformed(msg),
            }
        });

        self.route(transport, "/live/clip_slot/get/has_clip", |c, msg| {
            match (
                index_at(&msg.args, 0),
                index_at(&msg.args, 1),
                bool_at(&msg.args, 2),
            ) {
                (Some(track), Some(scene), Some(has_clip)) => {
                    c.remote_has_clip(track, scene, has_clip)
                }
                _ => malformed(msg),
            }
        });

        self.route(transport, "/live/song/get/tempo", |c, msg| match float_at(&msg.args, 0) {
            Some(bpm) => c.apply_remote(EntityKey::Tempo, bpm),
            None => malformed(msg),
        });

        self.route(transport, "/live/song/get/track_names", |c, msg| {
            let names: Option<Vec<String>> = (0..msg.args.len())
                .map(|i| string_at(&msg.args, i).map(str::to_string))
                .collect();
            // An empty listing is a fallback reply, never a zero-track session
            match names {
                Some(names) if !names.is_empty() => c.on_track_names(names),
                _ => malformed(msg),
            }
        });

        for (address, reason) in [
            ("/live/song/track_added", "track added"),
            ("/live/song/track_removed", "track removed"),
            ("/live/song/changed", "song changed"),
        ] {
            self.route(transport, address, move |c, _msg| c.on_structure_changed(reason));
        }

        debug!(
            "Sync handlers installed ({} patterns)",
            transport.handlers_count() - before
        );
    }

    fn track_known(&self, track: usize) -> bool {
        let known = track < self.store.track_count();
        if !known {
            trace!("Dropping update for unknown track {}", track);
        }
        known
    }

    fn clip_known(&self, track: usize, scene: usize) -> bool {
        let known = track < self.store.track_count() && scene < self.store.scene_count();
        if !known {
            trace!("Dropping update for unknown clip slot {}/{}", track, scene);
        }
        known
    }

    fn remote_track_param(&self, track: usize, param: TrackParam, value: f64) {
        if self.track_known(track) {
            self.apply_remote(EntityKey::Track(track, param), value);
        }
    }

    fn remote_track_name(&self, track: usize, name: &str) {
        if !self.track_known(track) {
            return;
        }

        let _guard = self.in_flight.enter(EntityKey::Track(track, TrackParam::Name));
        match self.store.set_track_name(track, name) {
            Ok(true) => self.bus.publish(Event::LiveTrackName(TrackName {
                track,
                name: name.to_string(),
            })),
            Ok(false) => {}
            Err(e) => error!("Session store rejected a bounds-checked update: {}", e),
        }
    }

    /// Returns true when the slot is known (whether or not it changed)
    fn remote_clip_status(&self, track: usize, scene: usize, status: ClipStatus) -> bool {
        if !self.clip_known(track, scene) {
            return false;
        }

        let _guard = self.in_flight.enter(EntityKey::Clip(track, scene));
        match self.store.set_clip_status(track, scene, status) {
            Ok(true) => self.bus.publish(Event::LiveClipStatus(ClipStatusUpdate {
                track,
                scene,
                status,
            })),
            Ok(false) => trace!("Clip {}/{} already {}", track, scene, status),
            Err(e) => error!("Session store rejected a bounds-checked update: {}", e),
        }
        if status != ClipStatus::Empty {
            self.clip_cache
                .update((track, scene), |m| m.has_content = Some(true));
        }
        true
    }

    fn remote_clip_name(&self, track: usize, scene: usize, name: &str) {
        if !self.clip_known(track, scene) {
            return;
        }

        self.clip_cache
            .update((track, scene), |m| m.name = Some(name.to_string()));

        let _guard = self.in_flight.enter(EntityKey::Clip(track, scene));
        match self.store.set_clip_name(track, scene, name) {
            Ok(true) => self.bus.publish(Event::LiveClipName(ClipName {
                track,
                scene,
                name: name.to_string(),
            })),
            Ok(false) => {}
            Err(e) => error!("Session store rejected a bounds-checked update: {}", e),
        }
    }

    fn remote_has_clip(&self, track: usize, scene: usize, has_clip: bool) {
        if !self.clip_known(track, scene) {
            return;
        }

        self.clip_cache
            .update((track, scene), |m| m.has_content = Some(has_clip));
        if let Err(e) = self.store.set_clip_has_content(track, scene, has_clip) {
            error!("Session store rejected a bounds-checked update: {}", e);
        }
    }

    /// A pushed status for a slot we hold no metadata for: fetch it
    fn refresh_clip_meta(&self, track: usize, scene: usize, status: ClipStatus) {
        let named = self
            .clip_cache
            .get(&(track, scene))
            .is_some_and(|m| m.name.is_some());
        if status == ClipStatus::Empty || named {
            return;
        }

        trace!("Fetching metadata for clip {}/{}", track, scene);
        let ids = vec![OscType::Int(track as i32), OscType::Int(scene as i32)];
        self.outbound.send("/live/clip/get/name", ids.clone());
        self.outbound.send("/live/clip/get/length", ids);
    }
}
