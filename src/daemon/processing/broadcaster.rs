use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock, Weak,
    },
};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::daemon::events::TrackerEvent;

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("subscriber is closed")]
    Closed,
    #[error("failed to deliver event: {0}")]
    Delivery(String),
}

/// Anything able to receive live events, e.g. a websocket session.
pub trait Subscriber: Send + Sync {
    fn send(&self, event: &TrackerEvent) -> Result<(), SubscriberError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

/// Fan-out publisher. Subscribers are referenced weakly, whoever subscribed keeps them alive.
/// Dead or failing subscribers are dropped on the next publish.
#[derive(Default)]
pub struct EventBroadcaster {
    subscribers: RwLock<BTreeMap<SubscriberId, Weak<dyn Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<S: Subscriber + 'static>(&self, subscriber: &Arc<S>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let weak = Arc::downgrade(subscriber);
        let weak: Weak<dyn Subscriber> = weak;
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, weak);
        debug!("Registered subscriber {id:?}");
        id
    }

    /// Returns whether the subscriber was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` to every live subscriber and returns how many accepted it. Never fails.
    pub fn publish(&self, event: &TrackerEvent) -> usize {
        // Sending happens outside of the lock, so subscribers can't stall (un)subscribing.
        let targets = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, weak)| (*id, weak.upgrade()))
            .collect::<Vec<_>>();

        let mut delivered = 0;
        let mut dead = vec![];
        for (id, subscriber) in targets {
            match subscriber {
                Some(subscriber) => match subscriber.send(event) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        debug!("Subscriber {id:?} failed: {e}");
                        dead.push(id);
                    }
                },
                None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for id in &dead {
                subscribers.remove(id);
            }
            info!("Pruned {} subscribers", dead.len());
        }

        delivered
    }
}

/// Forwards events into a bounded queue. A full queue loses the event for this subscriber only,
/// a closed one unsubscribes it.
pub struct ChannelSubscriber {
    sender: mpsc::Sender<TrackerEvent>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<TrackerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Arc::new(Self { sender }), receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn send(&self, event: &TrackerEvent) -> Result<(), SubscriberError> {
        match self.sender.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!("Subscriber queue is full, dropping {}", event.name());
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SubscriberError::Closed),
        }
    }
}

/// Writes every event into the log. The daemon has no other observers.
pub struct LogSubscriber;

impl Subscriber for LogSubscriber {
    fn send(&self, event: &TrackerEvent) -> Result<(), SubscriberError> {
        let payload =
            serde_json::to_string(event).map_err(|e| SubscriberError::Delivery(e.to_string()))?;
        info!(event = event.name(), "{payload}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use chrono::{Duration, TimeZone, Utc};

    use crate::{daemon::events::TrackerEvent, utils::clock::test_clock::TEST_START_DATE};

    use super::{
        ChannelSubscriber, EventBroadcaster, LogSubscriber, Subscriber, SubscriberError,
    };

    #[derive(Default)]
    struct CountingSubscriber {
        received: AtomicUsize,
        failing: bool,
    }

    impl Subscriber for CountingSubscriber {
        fn send(&self, _: &TrackerEvent) -> Result<(), SubscriberError> {
            self.received.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                Err(SubscriberError::Delivery("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    fn event() -> TrackerEvent {
        TrackerEvent::idle(Duration::seconds(180), Utc.from_utc_datetime(&TEST_START_DATE))
    }

    #[test]
    fn test_failing_subscriber_does_not_affect_others() {
        let broadcaster = EventBroadcaster::new();
        let subscribers = (0..5)
            .map(|i| {
                Arc::new(CountingSubscriber {
                    failing: i == 2,
                    ..Default::default()
                })
            })
            .collect::<Vec<_>>();
        for s in &subscribers {
            broadcaster.subscribe(s);
        }

        assert_eq!(broadcaster.publish(&event()), 4);
        assert_eq!(broadcaster.subscriber_count(), 4);

        assert_eq!(broadcaster.publish(&event()), 4);
        let received = subscribers
            .iter()
            .map(|s| s.received.load(Ordering::SeqCst))
            .collect::<Vec<_>>();
        assert_eq!(received, vec![2, 2, 1, 2, 2]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let broadcaster = EventBroadcaster::new();
        let kept = Arc::new(CountingSubscriber::default());
        let dropped = Arc::new(CountingSubscriber::default());
        broadcaster.subscribe(&kept);
        broadcaster.subscribe(&dropped);
        drop(dropped);

        assert_eq!(broadcaster.publish(&event()), 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let broadcaster = EventBroadcaster::new();
        let subscriber = Arc::new(CountingSubscriber::default());
        let id = broadcaster.subscribe(&subscriber);

        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        assert_eq!(broadcaster.publish(&event()), 0);
        assert_eq!(subscriber.received.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_channel_subscriber() {
        let broadcaster = EventBroadcaster::new();
        let (subscriber, mut receiver) = ChannelSubscriber::new(1);
        broadcaster.subscribe(&subscriber);

        assert_eq!(broadcaster.publish(&event()), 1);
        // Queue is full, the event is lost but the subscriber stays.
        assert_eq!(broadcaster.publish(&event()), 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(receiver.try_recv().ok(), Some(event()));
        assert!(receiver.try_recv().is_err());

        drop(receiver);
        assert_eq!(broadcaster.publish(&event()), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_log_subscriber_accepts_everything() {
        assert!(LogSubscriber.send(&event()).is_ok());
    }
}
