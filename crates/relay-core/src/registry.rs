//! The subscriber registry.
//!
//! The registry is the only shared mutable state of the relay. It holds
//! connections, never messages. Broadcasting takes a snapshot first and
//! writes to every subscriber outside the map's locks.

use crate::subscriber::{DeliveryError, Subscriber, SubscriberHandle, SubscriberId};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Frames buffered per subscriber before new frames are dropped.
    pub subscriber_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers in the snapshot.
    pub recipients: usize,
    /// Frames queued successfully.
    pub delivered: usize,
    /// Frames dropped because the subscriber was closed.
    pub closed: usize,
    /// Frames dropped because the subscriber's queue was full.
    pub lagging: usize,
}

impl BroadcastReport {
    /// Total frames not delivered.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.closed + self.lagging
    }
}

/// Concurrent set of connected subscribers.
pub struct Registry {
    subscribers: DashMap<SubscriberId, Subscriber>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    ///
    /// A zero `subscriber_buffer` is raised to one.
    #[must_use]
    pub fn with_config(mut config: RegistryConfig) -> Self {
        config.subscriber_buffer = config.subscriber_buffer.max(1);
        info!("Creating registry with config: {:?}", config);
        Self {
            subscribers: DashMap::new(),
            config,
        }
    }

    /// Add a subscriber to the live set.
    pub fn register(&self, subscriber: Subscriber) -> SubscriberHandle {
        let handle = subscriber.handle();
        self.subscribers.insert(subscriber.id(), subscriber);
        debug!(subscriber = %handle, subscribers = self.subscribers.len(), "Registered");
        handle
    }

    /// Remove a subscriber.
    ///
    /// Unknown or already-removed handles are ignored. Returns `true` if the
    /// subscriber was present.
    pub fn unregister(&self, handle: SubscriberHandle) -> bool {
        let removed = self.subscribers.remove(&handle.id()).is_some();
        if removed {
            debug!(subscriber = %handle, subscribers = self.subscribers.len(), "Unregistered");
        }
        removed
    }

    /// Create a subscriber, register it and return the scoped subscription.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (subscriber, receiver) = Subscriber::channel(self.config.subscriber_buffer);
        let handle = self.register(subscriber);
        Subscription {
            registry: Arc::clone(self),
            handle,
            receiver,
        }
    }

    /// Point-in-time copy of the live subscribers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.subscribers.iter().map(|e| e.value().clone()).collect()
    }

    /// Write one pre-encoded frame to every subscriber in a snapshot.
    ///
    /// Each write is independent. Failures are counted in the report and
    /// never interrupt delivery to the others.
    pub fn broadcast(&self, frame: Bytes) -> BroadcastReport {
        let snapshot = self.snapshot();
        let mut report = BroadcastReport {
            recipients: snapshot.len(),
            ..BroadcastReport::default()
        };

        for subscriber in &snapshot {
            match subscriber.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Closed) => {
                    report.closed += 1;
                    debug!(subscriber = %subscriber.handle(), "Skipped closed subscriber");
                }
                Err(DeliveryError::Full) => {
                    report.lagging += 1;
                    warn!(subscriber = %subscriber.handle(), "Dropped frame for lagging subscriber");
                }
            }
        }

        trace!(
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed(),
            "Broadcast frame"
        );
        report
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns `true` if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Drop every subscriber so their streams end after draining.
    pub fn close_all(&self) {
        let count = self.subscribers.len();
        self.subscribers.clear();
        info!(subscribers = count, "Closed all subscribers");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// A live registration that is removed from the registry when dropped.
pub struct Subscription {
    registry: Arc<Registry>,
    handle: SubscriberHandle,
    receiver: mpsc::Receiver<Bytes>,
}

impl Subscription {
    /// The handle of this subscription.
    #[must_use]
    pub fn handle(&self) -> SubscriberHandle {
        self.handle
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the registry has dropped this subscriber and every
    /// queued frame has been read.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Take the next frame if one is queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &'static str) -> Bytes {
        Bytes::from_static(text.as_bytes())
    }

    #[test]
    fn test_register_unregister() {
        let registry = Registry::new();
        let (sub, _rx) = Subscriber::channel(4);

        let handle = registry.register(sub);
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(handle));
        assert!(registry.is_empty());

        // Unregistering again is a no-op
        assert!(!registry.unregister(handle));
    }

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let registry = Arc::new(Registry::new());
        let mut subs: Vec<_> = (0..3).map(|_| registry.subscribe()).collect();

        let report = registry.broadcast(frame("data: hi\n\n"));
        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed(), 0);

        for sub in &mut subs {
            assert_eq!(sub.try_recv(), Some(frame("data: hi\n\n")));
            assert_eq!(sub.try_recv(), None);
        }
    }

    #[test]
    fn test_broadcast_preserves_order_per_subscriber() {
        let registry = Arc::new(Registry::new());
        let mut sub = registry.subscribe();

        registry.broadcast(frame("one"));
        registry.broadcast(frame("two"));
        registry.broadcast(frame("three"));

        assert_eq!(sub.try_recv(), Some(frame("one")));
        assert_eq!(sub.try_recv(), Some(frame("two")));
        assert_eq!(sub.try_recv(), Some(frame("three")));
    }

    #[test]
    fn test_subscription_drop_unregisters() {
        let registry = Arc::new(Registry::new());
        let sub = registry.subscribe();
        let handle = sub.handle();
        assert_eq!(registry.len(), 1);

        drop(sub);
        assert!(registry.is_empty());
        assert!(!registry.unregister(handle));
        assert_eq!(registry.broadcast(frame("x")).recipients, 0);
    }

    #[test]
    fn test_closed_subscriber_does_not_abort_broadcast() {
        let registry = Registry::new();
        let (dead, dead_rx) = Subscriber::channel(4);
        let (live, mut live_rx) = Subscriber::channel(4);
        registry.register(dead);
        registry.register(live);
        drop(dead_rx);

        let report = registry.broadcast(frame("x"));
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(live_rx.try_recv().unwrap(), frame("x"));
    }

    #[test]
    fn test_lagging_subscriber_drops_frames() {
        let registry = Arc::new(Registry::with_config(RegistryConfig {
            subscriber_buffer: 1,
        }));
        let mut sub = registry.subscribe();

        assert_eq!(registry.broadcast(frame("one")).delivered, 1);
        assert_eq!(registry.broadcast(frame("two")).lagging, 1);
        assert_eq!(sub.try_recv(), Some(frame("one")));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_changes() {
        let registry = Arc::new(Registry::new());
        let first = registry.subscribe();
        let snapshot = registry.snapshot();

        let _second = registry.subscribe();
        drop(first);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let registry = Arc::new(Registry::new());
        let mut sub = registry.subscribe();

        registry.broadcast(frame("last"));
        registry.close_all();

        assert_eq!(sub.recv().await, Some(frame("last")));
        assert_eq!(sub.recv().await, None);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_and_broadcast() {
        let registry = Arc::new(Registry::new());

        let churn: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        let sub = registry.subscribe();
                        tokio::task::yield_now().await;
                        drop(sub);
                    }
                })
            })
            .collect();

        let publisher = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let report = registry.broadcast(frame("tick"));
                    assert_eq!(report.recipients, report.delivered + report.failed());
                    tokio::task::yield_now().await;
                }
            })
        };

        for task in churn {
            task.await.unwrap();
        }
        publisher.await.unwrap();
        assert!(registry.is_empty());
    }
}
