//! UiFeed - throttled, batched view of the `live:*` event stream
//!
//! The feed subscribes to the bus and only queues events from the
//! publisher's side. Throttle and batch timers run inside `next_batch`, on
//! the consumer's own task, so rendering never races the timers.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::batch::Batcher;
use super::throttle::Throttle;
use crate::config::{RateConfig, ThrottleConfig};
use crate::events::{Event, EventBus, SubscriptionId, Topic};

/// Throttle key: topic plus the entity it concerns
type FeedKey = (Topic, usize, usize);

pub struct UiFeed {
    bus: EventBus,
    subscriptions: Vec<SubscriptionId>,
    rx: mpsc::UnboundedReceiver<Event>,
    closed: bool,
    intervals: ThrottleConfig,
    throttle: Throttle<FeedKey, Event>,
    batcher: Batcher,
    /// Structural events waiting to be handed out
    passthrough: VecDeque<Event>,
}

impl UiFeed {
    /// Subscribe a new feed to the state and structural `live:*` topics
    pub fn subscribe(bus: &EventBus, config: &RateConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let topics: Vec<Topic> = Topic::LIVE_STATE
            .iter()
            .chain(Topic::STRUCTURAL.iter())
            .copied()
            .collect();
        let subscriptions = bus.subscribe_many(&topics, move |event| {
            let _ = tx.send(event.clone());
        });

        Self {
            bus: bus.clone(),
            subscriptions,
            rx,
            closed: false,
            intervals: config.throttle.clone(),
            throttle: Throttle::new(),
            batcher: Batcher::new(config.batch_window()),
            passthrough: VecDeque::new(),
        }
    }

    fn classify(&self, event: &Event) -> Option<(FeedKey, Duration)> {
        let ms = |v: u64| Duration::from_millis(v);
        let t = &self.intervals;
        let topic = event.topic();

        let (track, sub, interval) = match event {
            Event::LiveTrackVolume(e) | Event::LiveTrackPan(e) => (e.track, 0, ms(t.fader_ms)),
            Event::LiveTrackSend(e) => (e.track, e.send.index(), ms(t.fader_ms)),
            Event::LiveTempo(_) => (0, 0, ms(t.fader_ms)),
            Event::LiveTrackMute(e) | Event::LiveTrackSolo(e) | Event::LiveTrackArm(e) => {
                (e.track, 0, ms(t.default_ms))
            }
            Event::LiveTrackName(e) => (e.track, 0, ms(t.name_ms)),
            Event::LiveClipName(e) => (e.track, e.scene, ms(t.name_ms)),
            Event::LiveClipStatus(e) => (e.track, e.scene, ms(t.clip_status_ms)),
            _ => return None,
        };

        Some(((topic, track, sub), interval))
    }

    /// Feed one event in at `now`
    pub fn ingest(&mut self, event: Event, now: Instant) {
        if Topic::STRUCTURAL.contains(&event.topic()) {
            if !self.batcher.is_empty() || self.throttle.pending() > 0 {
                debug!("{} discards buffered UI updates", event.topic());
            }
            self.batcher.clear();
            self.throttle.clear();
            self.passthrough.push_back(event);
            return;
        }

        let Some((key, interval)) = self.classify(&event) else {
            trace!("UiFeed ignoring {}", event.topic());
            return;
        };
        if let Some(event) = self.throttle.offer(key, event, interval, now) {
            self.batcher.push(&event, now);
        }
    }

    /// Run the timers at `now` and collect whatever is ready
    pub fn poll_due(&mut self, now: Instant) -> Vec<Event> {
        for event in self.throttle.drain_due(now) {
            self.batcher.push(&event, now);
        }

        let mut out: Vec<Event> = self.passthrough.drain(..).collect();
        if self.batcher.is_due(now) {
            out.extend(self.batcher.flush());
        }
        out
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.throttle.next_deadline(), self.batcher.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Wait for the next group of UI events
    ///
    /// Returns `None` once the bus side is gone and nothing is buffered.
    pub async fn next_batch(&mut self) -> Option<Vec<Event>> {
        loop {
            let out = self.poll_due(Instant::now());
            if !out.is_empty() {
                return Some(out);
            }

            let deadline = self.next_deadline();
            if self.closed && deadline.is_none() {
                return None;
            }

            tokio::select! {
                event = self.rx.recv(), if !self.closed => match event {
                    Some(event) => self.ingest(event, Instant::now()),
                    None => self.closed = true,
                },
                _ = sleep_until_opt(deadline) => {}
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Drop for UiFeed {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}
