//! Tests for the sync controller

use super::*;
use crate::config::{RateConfig, SyncConfig};
use crate::events::{ClipRef, SceneRef, TrackLevel, TrackToggle};
use crate::osc::{OscMessage, OscTransport};
use crate::rate::UiFeed;
use crate::session::{ClipStatus, SendSlot, SessionStore};
use parking_lot::Mutex;
use std::sync::atomic::AtomicUsize;

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, Vec<OscType>)>>,
    /// Reported as not yet delivered
    pending: AtomicUsize,
}

impl RecordingSink {
    fn addresses(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    fn count(&self) -> usize {
        self.sent.lock().len()
    }

    fn last(&self) -> Option<(String, Vec<OscType>)> {
        self.sent.lock().last().cloned()
    }
}

impl OscSink for RecordingSink {
    fn send(&self, address: &str, args: Vec<OscType>) -> bool {
        self.sent.lock().push((address.to_string(), args));
        true
    }

    fn queued(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct Fixture {
    bus: EventBus,
    controller: Arc<SyncController>,
    transport: OscTransport,
    outbound: Arc<RecordingSink>,
    paced: Arc<RecordingSink>,
}

impl Fixture {
    fn dispatch(&self, addr: &str, args: Vec<OscType>) {
        self.transport.dispatch(&OscMessage {
            addr: addr.to_string(),
            args,
        });
    }

    fn volume(&self, track: usize) -> f64 {
        self.controller.store().track(track).unwrap().volume
    }

    /// Count events published on `topic`
    fn count_events(&self, topic: Topic) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        self.bus.subscribe(topic, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }
}

fn make_test_fixture_with(tracks: usize, scenes: usize, config: SyncConfig) -> Fixture {
    let bus = EventBus::new();
    let store: Arc<dyn SessionState> = Arc::new(SessionStore::new(tracks, scenes));
    let outbound = Arc::new(RecordingSink::default());
    let paced = Arc::new(RecordingSink::default());

    let controller = Arc::new(SyncController::new(
        bus.clone(),
        store,
        outbound.clone(),
        paced.clone(),
        config,
        Duration::from_secs(30),
    ));
    controller.attach();

    let transport = OscTransport::new();
    controller.install_handlers(&transport);

    Fixture {
        bus,
        controller,
        transport,
        outbound,
        paced,
    }
}

fn make_test_fixture(tracks: usize, scenes: usize) -> Fixture {
    make_test_fixture_with(tracks, scenes, SyncConfig::default())
}

fn int(v: i32) -> OscType {
    OscType::Int(v)
}

fn float(v: f32) -> OscType {
    OscType::Float(v)
}

#[test]
fn test_local_write_is_clamped_and_pending() {
    let f = make_test_fixture(2, 2);

    assert!(f.controller.set_track_volume(0, 1.5));
    assert_eq!(
        f.outbound.last(),
        Some(("/live/track/0/volume".to_string(), vec![float(1.0)]))
    );

    // Store waits for the remote
    assert_eq!(f.volume(0), 0.8);
    assert_eq!(f.controller.pending_writes(), 1);

    assert!(f.controller.set_track_pan(1, -4.0));
    assert_eq!(f.outbound.last().unwrap().1, vec![float(-1.0)]);

    assert!(f.controller.set_track_mute(1, true));
    assert_eq!(
        f.outbound.last(),
        Some(("/live/track/1/mute".to_string(), vec![int(1)]))
    );

    assert!(f.controller.set_tempo(5000.0));
    assert_eq!(
        f.outbound.last(),
        Some(("/live/tempo".to_string(), vec![float(999.0)]))
    );
}

#[test]
fn test_unknown_track_intent_is_ignored() {
    let f = make_test_fixture(2, 2);

    assert!(!f.controller.set_track_volume(7, 0.5));
    assert!(!f.controller.trigger_clip(0, 9));
    assert!(!f.controller.launch_scene(2));
    assert_eq!(f.outbound.count(), 0);
    assert_eq!(f.controller.pending_writes(), 0);
}

#[test]
fn test_no_feedback_loop_on_remote_echo() {
    let f = make_test_fixture(2, 2);

    // A motorized fader: every confirmed value moves the fader, which
    // emits the same value again as a local intent
    let bus = f.bus.clone();
    f.bus.subscribe(Topic::LiveTrackVolume, move |event| {
        if let Event::LiveTrackVolume(level) = event {
            bus.publish(Event::TrackVolume(*level));
        }
    });

    f.bus.publish(Event::TrackVolume(TrackLevel { track: 0, value: 0.5 }));
    assert_eq!(f.outbound.count(), 1);

    f.dispatch("/live/track/get/volume", vec![int(0), float(0.5)]);

    assert_eq!(f.volume(0), 0.5);
    assert_eq!(f.outbound.count(), 1);
    assert_eq!(f.controller.pending_writes(), 0);
    assert!(!f.controller.is_syncing());
}

#[test]
fn test_remote_apply_does_not_suppress_other_tracks() {
    let f = make_test_fixture(2, 2);

    // Linked faders: track 0 drives track 1
    let bus = f.bus.clone();
    f.bus.subscribe(Topic::LiveTrackVolume, move |event| {
        if let Event::LiveTrackVolume(level) = event {
            if level.track == 0 {
                bus.publish(Event::TrackVolume(TrackLevel {
                    track: 1,
                    value: level.value,
                }));
            }
        }
    });

    f.dispatch("/live/track/0/volume", vec![float(0.25)]);

    assert_eq!(f.volume(0), 0.25);
    assert_eq!(f.outbound.addresses(), vec!["/live/track/1/volume"]);
}

#[test]
fn test_stale_remote_value_ignored_within_grace() {
    let config = SyncConfig {
        lww_grace_fader_ms: 30,
        ..SyncConfig::default()
    };
    let f = make_test_fixture_with(1, 1, config);
    let events = f.count_events(Topic::LiveTrackVolume);

    f.controller.set_track_volume(0, 0.5);
    f.dispatch("/live/track/get/volume", vec![int(0), float(0.2)]);

    assert_eq!(f.volume(0), 0.8);
    assert_eq!(events.load(Ordering::SeqCst), 0);

    std::thread::sleep(Duration::from_millis(50));
    f.dispatch("/live/track/get/volume", vec![int(0), float(0.2)]);

    // Remote wins after the grace window
    assert!((f.volume(0) - 0.2).abs() < 1e-6);
    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert_eq!(f.controller.pending_writes(), 0);
}

#[test]
fn test_unconfirmed_write_assumed_after_timeout() {
    let f = make_test_fixture(2, 2);
    let events = f.count_events(Topic::LiveTrackMute);

    f.controller.set_track_mute(1, true);
    assert_eq!(f.controller.reconcile_expired(Instant::now()), 0);

    let later = Instant::now() + Duration::from_secs(2);
    assert_eq!(f.controller.reconcile_expired(later), 1);

    assert!(f.controller.store().track(1).unwrap().mute);
    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert_eq!(f.controller.pending_writes(), 0);
}

#[test]
fn test_send_write_and_confirmation() {
    let f = make_test_fixture(2, 2);
    let events = f.count_events(Topic::LiveTrackSend);

    f.controller.set_track_send(0, SendSlot::B, 0.4);
    assert_eq!(f.outbound.addresses(), vec!["/live/track/0/send/b"]);

    f.dispatch("/live/track/get/send", vec![int(0), int(1), float(0.4)]);

    let sends = f.controller.store().track(0).unwrap().sends;
    assert!((sends[1] - 0.4).abs() < 1e-6);
    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert_eq!(f.controller.pending_writes(), 0);
}

#[test]
fn test_malformed_and_unknown_messages_are_dropped() {
    let f = make_test_fixture(2, 2);
    let events = f.count_events(Topic::LiveTrackVolume);

    f.dispatch("/live/track/get/volume", vec![OscType::String("x".into())]);
    f.dispatch("/live/track/get/volume", vec![int(0)]);
    f.dispatch("/live/track/get/volume", vec![int(99), float(0.1)]);
    f.dispatch("/live/track/get/send", vec![int(0), int(5), float(0.1)]);
    f.dispatch("/live/clip/get/playing_status", vec![int(0), int(9), int(1)]);
    f.dispatch("/live/song/get/track_names", vec![OscType::String("A".into()), int(3)]);

    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert_eq!(f.volume(0), 0.8);
    assert_eq!(f.controller.store().track_count(), 2);
    assert_eq!(f.paced.count(), 0);
}

#[test]
fn test_remote_tempo_and_names() {
    let f = make_test_fixture(2, 2);
    let tempo_events = f.count_events(Topic::LiveTempo);
    let name_events = f.count_events(Topic::LiveTrackName);

    f.dispatch("/live/song/get/tempo", vec![float(128.0)]);
    f.dispatch("/live/song/get/tempo", vec![float(128.0)]);
    assert_eq!(f.controller.store().tempo().bpm, 128.0);
    assert_eq!(tempo_events.load(Ordering::SeqCst), 1);

    f.dispatch("/live/track/get/name", vec![int(1), OscType::String("Bass".into())]);
    f.dispatch("/live/track/0/name", vec![OscType::String("Drums".into())]);
    assert_eq!(f.controller.store().track_names(), vec!["Drums", "Bass"]);
    assert_eq!(name_events.load(Ordering::SeqCst), 2);
}

#[test]
fn test_clip_status_is_idempotent() {
    let f = make_test_fixture(2, 2);
    let events = f.count_events(Topic::LiveClipStatus);

    f.dispatch("/live/clip/get/playing_status", vec![int(0), int(1), int(1)]);
    f.dispatch("/live/clip/get/playing_status", vec![int(0), int(1), int(1)]);

    assert_eq!(events.load(Ordering::SeqCst), 1);
    let clip = f.controller.store().clip(0, 1).unwrap();
    assert_eq!(clip.status, ClipStatus::Playing);
    assert!(clip.has_content);
}

#[tokio::test]
async fn test_duplicate_clip_status_yields_one_batch() {
    let f = make_test_fixture(2, 2);
    let mut feed = UiFeed::subscribe(&f.bus, &RateConfig::default());

    f.dispatch("/live/clip/0/0/status", vec![OscType::String("playing".into())]);
    f.dispatch("/live/clip/0/0/status", vec![OscType::String("playing".into())]);

    let batch = tokio::time::timeout(Duration::from_secs(1), feed.next_batch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert!(matches!(batch[0], Event::UiClipBatch(_)));

    assert!(tokio::time::timeout(Duration::from_millis(250), feed.next_batch())
        .await
        .is_err());
}

#[test]
fn test_pushed_status_fetches_missing_metadata() {
    let f = make_test_fixture(2, 2);

    f.dispatch("/live/clip/1/0/status", vec![int(3)]);
    assert_eq!(
        f.outbound.addresses(),
        vec!["/live/clip/get/name", "/live/clip/get/length"]
    );

    f.dispatch("/live/clip/get/name", vec![int(1), int(0), OscType::String("Take".into())]);
    f.dispatch("/live/clip/get/length", vec![int(1), int(0), float(8.0)]);

    let meta = f.controller.clip_meta(1, 0).unwrap();
    assert_eq!(meta.name.as_deref(), Some("Take"));
    assert_eq!(meta.length, Some(8.0));
    assert_eq!(meta.has_content, Some(true));
    assert_eq!(f.controller.store().clip(1, 0).unwrap().name, "Take");

    // Metadata is cached now, no second fetch
    f.dispatch("/live/clip/1/0/status", vec![int(1)]);
    assert_eq!(f.outbound.count(), 2);
}

#[test]
fn test_has_clip_response() {
    let f = make_test_fixture(2, 2);

    f.dispatch("/live/clip_slot/get/has_clip", vec![int(1), int(1), OscType::Bool(true)]);
    assert!(f.controller.store().clip(1, 1).unwrap().has_content);
    assert_eq!(f.controller.clip_meta(1, 1).unwrap().has_content, Some(true));
}

#[test]
fn test_resync_fan_out_counts() {
    let f = make_test_fixture(8, 12);
    let order = Arc::new(Mutex::new(Vec::new()));
    for topic in Topic::STRUCTURAL {
        let order = order.clone();
        f.bus.subscribe(topic, move |event| order.lock().push(event.topic()));
    }

    f.controller.request_initial_sync();
    assert_eq!(
        f.outbound.addresses(),
        vec!["/live/song/get/track_names", "/live/song/get/tempo"]
    );

    let names = ["Drums", "Bass", "Keys"];
    f.dispatch(
        "/live/song/get/track_names",
        names.iter().map(|n| OscType::String(n.to_string())).collect(),
    );

    // N x 6 track requests + N x S x 4 clip requests
    assert_eq!(f.paced.count(), 3 * 6 + 3 * 12 * 4);
    assert_eq!(f.controller.store().track_count(), 3);
    assert_eq!(f.controller.store().track_names(), names);
    assert_eq!(
        *order.lock(),
        vec![
            Topic::LiveTrackNames,
            Topic::LiveStructureChanged,
            Topic::LiveSyncComplete
        ]
    );
    assert!(!f.controller.is_syncing());

    // Unchanged poll listing: nothing happens
    f.dispatch(
        "/live/song/get/track_names",
        names.iter().map(|n| OscType::String(n.to_string())).collect(),
    );
    assert_eq!(f.paced.count(), 3 * 6 + 3 * 12 * 4);
}

#[test]
fn test_changed_listing_triggers_resync_without_request() {
    let f = make_test_fixture(2, 2);

    f.dispatch(
        "/live/song/get/track_names",
        vec![OscType::String("Only".into())],
    );

    assert_eq!(f.controller.store().track_names(), vec!["Only"]);
    assert_eq!(f.paced.count(), 6 + 2 * 4);
}

#[test]
fn test_structure_notification_requests_directory() {
    let f = make_test_fixture(2, 2);

    f.dispatch("/live/song/track_added", vec![]);
    assert_eq!(f.outbound.addresses(), vec!["/live/song/get/track_names"]);

    // Same names, but a resync was requested
    f.dispatch(
        "/live/song/get/track_names",
        vec![
            OscType::String("Track 1".into()),
            OscType::String("Track 2".into()),
        ],
    );
    assert_eq!(f.paced.count(), 2 * 6 + 2 * 2 * 4);
}

#[test]
fn test_resync_clears_pending_writes() {
    let f = make_test_fixture(2, 2);
    f.controller.set_track_volume(0, 0.3);
    assert_eq!(f.controller.pending_writes(), 1);

    f.controller.resync(vec!["A".into(), "B".into()]);
    assert_eq!(f.controller.pending_writes(), 0);
}

#[test]
fn test_command_addresses() {
    let f = make_test_fixture(4, 4);

    f.bus.publish(Event::ClipTrigger(ClipRef { track: 1, scene: 2 }));
    f.bus.publish(Event::ClipStop(ClipRef { track: 1, scene: 2 }));
    f.bus.publish(Event::TrackStop(crate::events::TrackRef { track: 3 }));
    f.bus.publish(Event::SceneLaunch(SceneRef { scene: 0 }));
    f.bus.publish(Event::TransportPlay);
    f.bus.publish(Event::TransportRecord);
    f.bus.publish(Event::TransportStop);
    f.controller.request_sync();

    assert_eq!(
        f.outbound.addresses(),
        vec![
            "/live/clip/1/2/trigger",
            "/live/clip/1/2/stop",
            "/live/track/3/stop",
            "/live/scene/0/launch",
            "/live/play",
            "/live/record",
            "/live/stop",
            "/live/sync/request",
        ]
    );

    let tempo = f.controller.store().tempo();
    assert!(!tempo.playing);
    assert!(!tempo.recording);
}

#[test]
fn test_toggle_intents_via_bus() {
    let f = make_test_fixture(2, 2);

    f.bus.publish(Event::TrackSolo(TrackToggle { track: 1, value: true }));
    f.bus.publish(Event::TrackArm(TrackToggle { track: 0, value: false }));

    assert_eq!(
        f.outbound.addresses(),
        vec!["/live/track/1/solo", "/live/track/0/arm"]
    );
    assert_eq!(f.controller.pending_writes(), 2);
}

#[test]
fn test_status_without_connection() {
    let f = make_test_fixture(2, 2);
    f.controller.set_track_volume(0, 0.1);

    let status = f.controller.status();
    assert!(!status.connected);
    assert!(!status.syncing);
    assert_eq!(status.pending_writes, 1);
    assert_eq!(status.messages_sent, 0);
}

#[test]
fn test_settings_change_without_connection_manager() {
    let f = make_test_fixture(1, 1);
    let endpoint = crate::config::OscConfig::default().endpoint();

    assert!(f.controller.change_endpoint(endpoint.clone()).is_none());
    // Through the bus as well
    f.bus.publish(Event::SettingsChanged(crate::events::SettingsChange { endpoint }));
    assert_eq!(f.outbound.count(), 0);
}

#[test]
fn test_empty_directory_reply_keeps_session() {
    let f = make_test_fixture(8, 12);
    let events = f.count_events(Topic::LiveStructureChanged);

    f.controller.request_initial_sync();
    f.dispatch("/live/song/get/track_names", vec![]);

    assert_eq!(f.controller.store().track_count(), 8);
    assert_eq!(f.paced.count(), 0);
    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert!(f.controller.set_track_volume(0, 0.5));

    // The requested resync still happens on the next real listing
    f.dispatch(
        "/live/song/get/track_names",
        (1..=8).map(|i| OscType::String(format!("Track {}", i))).collect(),
    );
    assert_eq!(f.paced.count(), 8 * 6 + 8 * 12 * 4);
}

#[test]
fn test_trigger_queues_clip_and_releases_active_slot() {
    let f = make_test_fixture(2, 3);
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_clone = order.clone();
    f.bus.subscribe(Topic::LiveClipStatus, move |event| {
        if let Event::LiveClipStatus(update) = event {
            order_clone.lock().push((update.scene, update.status));
        }
    });

    f.dispatch("/live/clip/get/playing_status", vec![int(1), int(0), int(1)]);
    order.lock().clear();

    assert!(f.controller.trigger_clip(1, 2));

    assert_eq!(f.outbound.last().unwrap().0, "/live/clip/1/2/trigger");
    let store = f.controller.store();
    assert_eq!(store.clip(1, 2).unwrap().status, ClipStatus::Queued);
    assert_eq!(store.clip(1, 0).unwrap().status, ClipStatus::Empty);
    // Other tracks are untouched
    assert_eq!(store.clip(0, 0).unwrap().status, ClipStatus::Empty);
    assert_eq!(
        *order.lock(),
        vec![(0, ClipStatus::Empty), (2, ClipStatus::Queued)]
    );

    // Live confirms the launch
    f.dispatch("/live/clip/get/playing_status", vec![int(1), int(2), int(1)]);
    assert_eq!(
        f.controller.store().clip(1, 2).unwrap().status,
        ClipStatus::Playing
    );
}

#[test]
fn test_trigger_on_playing_clip_stops_track() {
    let f = make_test_fixture(2, 2);
    let events = f.count_events(Topic::LiveClipStatus);

    f.dispatch("/live/clip/get/playing_status", vec![int(0), int(1), int(1)]);
    assert_eq!(events.load(Ordering::SeqCst), 1);

    f.bus.publish(Event::ClipTrigger(ClipRef { track: 0, scene: 1 }));

    assert_eq!(f.outbound.addresses(), vec!["/live/track/0/stop"]);
    // Store waits for Live to report the stop
    assert_eq!(
        f.controller.store().clip(0, 1).unwrap().status,
        ClipStatus::Playing
    );
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn test_syncing_until_paced_requests_drain() {
    let f = make_test_fixture(2, 2);
    assert!(!f.controller.is_syncing());

    f.controller.resync(vec!["A".into(), "B".into()]);
    f.paced.pending.store(f.paced.count(), Ordering::SeqCst);
    assert!(f.controller.is_syncing());
    assert!(f.controller.status().syncing);

    f.paced.pending.store(0, Ordering::SeqCst);
    assert!(!f.controller.is_syncing());
}
