//! Synchronization controller
//!
//! Turns local intents into outbound messages and inbound messages into
//! store mutations plus `live:*` events, while keeping the two directions
//! from feeding each other.
//!
//! Per entity the lifecycle is Idle -> AwaitingRemote (local write sent) ->
//! Reconciled (matching inbound value, remote override after the grace
//! window, or confirm timeout).

mod inbound;
mod inflight;
mod outbound;

#[cfg(test)]
mod tests;

pub use inflight::{InFlight, InFlightGuard, PendingWrites, Verdict};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rosc::OscType;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ADDR_TRACK_NAMES};
use crate::error::SessionError;
use crate::events::{
    Event, EventBus, StructureChange, SyncComplete, Tempo, TrackLevel, TrackNames,
    TrackSendLevel, TrackToggle, Topic,
};
use crate::osc::{Endpoint, OscSink};
use crate::rate::{ClipCache, ClipMeta};
use crate::session::{EntityKey, SessionState, TrackParam};

pub const ADDR_GET_TEMPO: &str = "/live/song/get/tempo";

/// Per-track requests issued for every track during a resync
const TRACK_QUERIES: [&str; 6] = [
    "/live/track/get/volume",
    "/live/track/get/pan",
    "/live/track/get/mute",
    "/live/track/get/solo",
    "/live/track/get/arm",
    "/live/track/get/name",
];

/// Per-slot requests issued for every clip slot during a resync
const CLIP_QUERIES: [&str; 4] = [
    "/live/clip/get/playing_status",
    "/live/clip/get/name",
    "/live/clip/get/length",
    "/live/clip_slot/get/has_clip",
];

/// Status snapshot for display
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub connected: bool,
    pub syncing: bool,
    pub pending_writes: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub ping_age_ms: Option<u64>,
    pub connection_attempts: u64,
    pub handlers_count: usize,
}

pub struct SyncController {
    bus: EventBus,
    store: Arc<dyn SessionState>,
    /// Direct path for user-driven writes
    outbound: Arc<dyn OscSink>,
    /// Paced path for resync fan-out
    paced: Arc<dyn OscSink>,
    connection: Option<Arc<ConnectionManager>>,
    config: SyncConfig,
    in_flight: InFlight,
    pending: PendingWrites,
    clip_cache: ClipCache,
    resyncing: AtomicBool,
    resync_requested: AtomicBool,
}

impl SyncController {
    pub fn new(
        bus: EventBus,
        store: Arc<dyn SessionState>,
        outbound: Arc<dyn OscSink>,
        paced: Arc<dyn OscSink>,
        config: SyncConfig,
        clip_cache_ttl: Duration,
    ) -> Self {
        Self {
            bus,
            store,
            outbound,
            paced,
            connection: None,
            config,
            in_flight: InFlight::new(),
            pending: PendingWrites::new(),
            clip_cache: ClipCache::new(clip_cache_ttl),
            resyncing: AtomicBool::new(false),
            resync_requested: AtomicBool::new(false),
        }
    }

    /// Attach the connection manager used for status and settings changes
    pub fn with_connection(mut self, connection: Arc<ConnectionManager>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionState> {
        &self.store
    }

    /// Subscribe to the local intent topics on the bus
    pub fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let topics = [
            Topic::TrackVolume,
            Topic::TrackPan,
            Topic::TrackMute,
            Topic::TrackSolo,
            Topic::TrackArm,
            Topic::TrackSend,
            Topic::TrackStop,
            Topic::ClipTrigger,
            Topic::ClipStop,
            Topic::SceneLaunch,
            Topic::TempoSet,
            Topic::TransportPlay,
            Topic::TransportStop,
            Topic::TransportRecord,
            Topic::SettingsChanged,
        ];

        self.bus.subscribe_many(&topics, move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_intent(event);
            }
        });
        debug!("Sync controller attached to {} intent topics", topics.len());
    }

    fn handle_intent(self: &Arc<Self>, event: &Event) {
        match event {
            Event::TrackVolume(e) => {
                self.set_track_volume(e.track, e.value);
            }
            Event::TrackPan(e) => {
                self.set_track_pan(e.track, e.value);
            }
            Event::TrackMute(e) => {
                self.set_track_mute(e.track, e.value);
            }
            Event::TrackSolo(e) => {
                self.set_track_solo(e.track, e.value);
            }
            Event::TrackArm(e) => {
                self.set_track_arm(e.track, e.value);
            }
            Event::TrackSend(e) => {
                self.set_track_send(e.track, e.send, e.value);
            }
            Event::TrackStop(e) => {
                self.stop_track(e.track);
            }
            Event::ClipTrigger(e) => {
                self.trigger_clip(e.track, e.scene);
            }
            Event::ClipStop(e) => {
                self.stop_clip(e.track, e.scene);
            }
            Event::SceneLaunch(e) => {
                self.launch_scene(e.scene);
            }
            Event::TempoSet(e) => {
                self.set_tempo(e.bpm);
            }
            Event::TransportPlay => {
                self.play();
            }
            Event::TransportStop => {
                self.stop();
            }
            Event::TransportRecord => {
                self.record();
            }
            Event::SettingsChanged(e) => {
                self.change_endpoint(e.endpoint.clone());
            }
            other => trace!("Ignoring intent {}", other.topic()),
        }
    }

    /// Reconnect to a new endpoint, then resync
    ///
    /// Runs on the ambient tokio runtime; returns None when there is no
    /// connection manager or no runtime.
    pub fn change_endpoint(self: &Arc<Self>, endpoint: Endpoint) -> Option<JoinHandle<()>> {
        let Some(connection) = self.connection.clone() else {
            warn!("Settings changed but no connection manager is attached");
            return None;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Settings changed outside a tokio runtime, ignoring");
            return None;
        };

        info!("🔄 Endpoint changed, reconnecting to {}", endpoint.send_target());
        let weak: Weak<Self> = Arc::downgrade(self);
        Some(runtime.spawn(async move {
            match connection.connect(endpoint).await {
                Ok(()) => {
                    if let Some(controller) = weak.upgrade() {
                        controller.request_initial_sync();
                    }
                }
                Err(e) => warn!("Reconnect after settings change failed: {}", e),
            }
        }))
    }

    /// Ask the remote for the track directory and tempo; the directory reply
    /// triggers a full resync
    pub fn request_initial_sync(&self) {
        self.resync_requested.store(true, Ordering::SeqCst);
        self.outbound.send(ADDR_TRACK_NAMES, vec![]);
        self.outbound.send(ADDR_GET_TEMPO, vec![]);
    }

    /// Structural change announced by the remote
    pub(crate) fn on_structure_changed(&self, reason: &str) {
        info!("Live session structure changed ({}), requesting directory", reason);
        self.resync_requested.store(true, Ordering::SeqCst);
        self.outbound.send(ADDR_TRACK_NAMES, vec![]);
    }

    /// Directory listing arrived (poll reply or requested)
    pub(crate) fn on_track_names(&self, names: Vec<String>) {
        let requested = self.resync_requested.swap(false, Ordering::SeqCst);
        if !requested && names == self.store.track_names() {
            trace!("Track directory unchanged ({} tracks)", names.len());
            return;
        }
        self.resync(names);
    }

    /// Replace the local session and re-query every entity through the pacer
    ///
    /// Returns the number of requests queued.
    pub fn resync(&self, names: Vec<String>) -> usize {
        self.resyncing.store(true, Ordering::SeqCst);

        self.store.init_project_from_remote(&names);
        self.clip_cache.clear();
        self.pending.clear();

        let tracks = names.len();
        let scenes = self.store.scene_count();
        info!("🔁 Resyncing {} tracks x {} scenes", tracks, scenes);

        self.bus.publish(Event::LiveTrackNames(TrackNames { names }));
        self.bus
            .publish(Event::LiveStructureChanged(StructureChange { tracks, scenes }));

        let mut requests = 0;
        for track in 0..tracks {
            let id = OscType::Int(track as i32);
            for address in TRACK_QUERIES {
                self.paced.send(address, vec![id.clone()]);
                requests += 1;
            }
        }
        for track in 0..tracks {
            for scene in 0..scenes {
                for address in CLIP_QUERIES {
                    self.paced.send(
                        address,
                        vec![OscType::Int(track as i32), OscType::Int(scene as i32)],
                    );
                    requests += 1;
                }
            }
        }

        self.bus
            .publish(Event::LiveSyncComplete(SyncComplete { tracks, requests }));
        self.resyncing.store(false, Ordering::SeqCst);
        debug!("Resync queued {} requests", requests);
        requests
    }

    /// Apply a numeric/boolean remote value for `key`
    ///
    /// Goes through the pending-write check, then mutates the store and
    /// publishes under the in-flight guard for `key`.
    pub(crate) fn apply_remote(&self, key: EntityKey, value: f64) {
        let grace = self.grace_for(&key);
        match self.pending.check_inbound(key, value, Instant::now(), grace) {
            Verdict::Stale => {
                trace!("Ignoring stale remote value {:?} = {}", key, value);
            }
            Verdict::Apply { reconciled } => {
                if reconciled {
                    trace!("Local write confirmed for {:?}", key);
                }
                self.commit(key, value);
            }
        }
    }

    /// Store + publish under the in-flight guard
    fn commit(&self, key: EntityKey, value: f64) {
        let _guard = self.in_flight.enter(key);
        let flag = value != 0.0;

        let result: Result<Option<Event>, SessionError> = match key {
            EntityKey::Track(track, param) => {
                let changed = match param {
                    TrackParam::Volume => self.store.set_track_volume(track, value),
                    TrackParam::Pan => self.store.set_track_pan(track, value),
                    TrackParam::Mute => self.store.set_track_mute(track, flag),
                    TrackParam::Solo => self.store.set_track_solo(track, flag),
                    TrackParam::Arm => self.store.set_track_arm(track, flag),
                    TrackParam::Send(send) => self.store.set_track_send(track, send, value),
                    TrackParam::Name => Ok(false),
                };
                changed.map(|changed| changed.then(|| self.track_event(track, param)).flatten())
            }
            EntityKey::Tempo => Ok(self.store.set_tempo(value).then(|| {
                Event::LiveTempo(Tempo {
                    bpm: self.store.tempo().bpm,
                })
            })),
            EntityKey::Clip(..) => Ok(None),
        };

        match result {
            Ok(Some(event)) => self.bus.publish(event),
            Ok(None) => {}
            Err(e) => error!("Session store rejected a bounds-checked update: {}", e),
        }
    }

    /// Event carrying the stored (clamped) value of a track parameter
    fn track_event(&self, track: usize, param: TrackParam) -> Option<Event> {
        let t = self.store.track(track)?;
        let event = match param {
            TrackParam::Volume => Event::LiveTrackVolume(TrackLevel { track, value: t.volume }),
            TrackParam::Pan => Event::LiveTrackPan(TrackLevel { track, value: t.pan }),
            TrackParam::Mute => Event::LiveTrackMute(TrackToggle { track, value: t.mute }),
            TrackParam::Solo => Event::LiveTrackSolo(TrackToggle { track, value: t.solo }),
            TrackParam::Arm => Event::LiveTrackArm(TrackToggle { track, value: t.arm }),
            TrackParam::Send(send) => Event::LiveTrackSend(TrackSendLevel {
                track,
                send,
                value: t.sends[send.index()],
            }),
            TrackParam::Name => return None,
        };
        Some(event)
    }

    fn grace_for(&self, key: &EntityKey) -> Duration {
        if key.is_continuous() {
            self.config.grace_fader()
        } else {
            self.config.grace_toggle()
        }
    }

    /// Settle writes the remote never confirmed: assume they were applied
    ///
    /// Returns the number of writes settled.
    pub fn reconcile_expired(&self, now: Instant) -> usize {
        let expired = self.pending.take_expired(now, self.config.confirm_timeout());
        for (key, value) in &expired {
            debug!("No confirmation for {:?}, assuming {} applied", key, value);
            self.commit(*key, *value);
        }
        expired.len()
    }

    /// Periodically settle expired writes until `token` is cancelled
    pub fn spawn_reconciler(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = (self.config.confirm_timeout() / 4).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(controller) = weak.upgrade() else { break };
                        controller.reconcile_expired(Instant::now());
                    }
                }
            }
            debug!("Reconciler stopped");
        })
    }

    /// Cached clip metadata, None when missing or expired
    pub fn clip_meta(&self, track: usize, scene: usize) -> Option<ClipMeta> {
        self.clip_cache.get(&(track, scene))
    }

    /// True from the start of a resync until its paced requests have drained
    pub fn is_syncing(&self) -> bool {
        self.resyncing.load(Ordering::SeqCst)
            || self.paced.queued() > 0
            || !self.in_flight.is_empty()
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = SyncStatus {
            syncing: self.is_syncing(),
            pending_writes: self.pending_writes(),
            ..SyncStatus::default()
        };

        if let Some(connection) = &self.connection {
            let info = connection.get_connection_info();
            status.connected = info.connected;
            status.messages_sent = info.messages_sent;
            status.messages_received = info.messages_received;
            status.last_message_time = info.last_message_time;
            status.ping_age_ms = info.ping_age_ms;
            status.connection_attempts = info.connection_attempts;
            status.handlers_count = info.handlers_count;
        }

        status
    }
}
