//! EventBus - synchronous topic-based publish/subscribe
//!
//! Subscribers run on the publisher's task, in subscription order. The
//! subscriber list is cloned out of the lock before delivery, so a callback
//! may publish or subscribe without deadlocking.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::{Event, Topic};

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<(SubscriptionId, Subscriber)>>>>,
    next_id: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Subscribe one listener to several topics
    pub fn subscribe_many<F>(&self, topics: &[Topic], listener: F) -> Vec<SubscriptionId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let listener: Subscriber = Arc::new(listener);
        topics
            .iter()
            .map(|topic| {
                let listener = listener.clone();
                self.subscribe(*topic, move |event| listener(event))
            })
            .collect()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let mut removed = false;
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let listeners: Vec<Subscriber> = match self.subscribers.read().get(&topic) {
            Some(list) => list.iter().map(|(_, s)| s.clone()).collect(),
            None => return,
        };

        trace!("Publishing {} to {} subscriber(s)", topic, listeners.len());
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers.read().get(&topic).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Tempo, TrackRef};
    use parking_lot::Mutex;

    #[test]
    fn test_publish_reaches_topic_subscribers_only() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        bus.subscribe(Topic::LiveTempo, move |event| {
            seen_clone.lock().push(event.clone());
        });

        bus.publish(Event::LiveTempo(Tempo { bpm: 128.0 }));
        bus.publish(Event::TrackStop(TrackRef { track: 0 }));

        assert_eq!(*seen.lock(), vec![Event::LiveTempo(Tempo { bpm: 128.0 })]);
    }

    #[test]
    fn test_unsubscribe_and_reentrant_publish() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        // A subscriber that republishes on another topic
        let inner_bus = bus.clone();
        bus.subscribe(Topic::TransportPlay, move |_| {
            inner_bus.publish(Event::TransportStop);
        });
        let count_clone = count.clone();
        let id = bus.subscribe(Topic::TransportStop, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::TransportPlay);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(Event::TransportPlay);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(Topic::TransportStop), 0);
    }

    #[test]
    fn test_subscribe_many() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let ids = bus.subscribe_many(&[Topic::TransportPlay, Topic::TransportStop], move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::TransportPlay);
        bus.publish(Event::TransportStop);
        bus.publish(Event::TransportRecord);

        assert_eq!(ids.len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
