//! Per-key change fan-out.
//!
//! Every topic (one per document key) gets its own tokio broadcast channel,
//! so sending is O(1) regardless of observer count and topics are isolated
//! from each other. Each observer holds an independent receiver buffering up
//! to `capacity` events; a slow observer lags and is told how many events it
//! missed rather than slowing down writers.
//!
//! Events carry no content. Observers re-run their query on receipt.
//!
//! A topic lives as long as it has observers: dropping the last
//! [`Subscription`] removes it from the map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::broadcast;
use trellis_core::{DocumentId, ProjectKey, WorkspaceKey};

/// Broadcast scope of a document key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Canvas(ProjectKey),
    Workflow(WorkspaceKey),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Canvas(key) => write!(f, "canvas:{key}"),
            Topic::Workflow(key) => write!(f, "workflow:{key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Version advanced
    Content,
    /// View state only (viewport); version unchanged
    View,
}

/// "The document under `topic` changed."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub topic: Topic,
    pub document_id: DocumentId,
    pub version: u64,
    pub kind: ChangeKind,
}

/// What an observer sees next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Changed(ChangeEvent),
    /// The observer fell behind and `n` events were dropped
    Lagged(u64),
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub events_published: u64,
    pub deliveries: u64,
    pub active_topics: usize,
}

struct AtomicBroadcastStats {
    events_published: AtomicU64,
    deliveries: AtomicU64,
}

/// One topic's channel.
struct TopicChannel {
    sender: broadcast::Sender<ChangeEvent>,
}

impl TopicChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

type TopicMap = RwLock<HashMap<Topic, Arc<TopicChannel>>>;

/// An observer's registration on one topic.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<ChangeEvent>,
    channel: Weak<TopicChannel>,
    topics: Weak<TopicMap>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next event. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        match self.receiver.recv().await {
            Ok(event) => Some(Notification::Changed(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Observer on {} lagged by {n} events", self.topic);
                Some(Notification::Lagged(n))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking poll; `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<Notification> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Notification::Changed(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Notification::Lagged(n)),
            Err(_) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let mut topics = topics.write().unwrap_or_else(PoisonError::into_inner);
        // Our receiver is still alive here, so "last observer" means a count of one.
        let last = topics.get(&self.topic).is_some_and(|channel| {
            std::ptr::eq(Arc::as_ptr(channel), self.channel.as_ptr())
                && channel.observer_count() <= 1
        });
        if last {
            topics.remove(&self.topic);
            log::debug!("Topic {} removed (last observer left)", self.topic);
        }
    }
}

/// Maps topics to channels and fans committed changes out to observers.
pub struct ChangeBroadcaster {
    topics: Arc<TopicMap>,
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl ChangeBroadcaster {
    /// `capacity` bounds how many events an observer may fall behind by
    /// before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            stats: AtomicBroadcastStats {
                events_published: AtomicU64::new(0),
                deliveries: AtomicU64::new(0),
            },
        }
    }

    fn read_topics(&self) -> RwLockReadGuard<'_, HashMap<Topic, Arc<TopicChannel>>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topics(&self) -> RwLockWriteGuard<'_, HashMap<Topic, Arc<TopicChannel>>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, topic: Topic, channel: &Arc<TopicChannel>) -> Subscription {
        Subscription {
            receiver: channel.sender.subscribe(),
            channel: Arc::downgrade(channel),
            topics: Arc::downgrade(&self.topics),
            topic,
        }
    }

    /// Register an observer on `topic`.
    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        // Fast path: read lock
        {
            let topics = self.read_topics();
            if let Some(channel) = topics.get(&topic) {
                return self.attach(topic, channel);
            }
        }

        let mut topics = self.write_topics();
        let channel = topics
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(TopicChannel::new(self.capacity)))
            .clone();
        drop(topics);
        log::debug!("Observer registered on {topic}");
        self.attach(topic, &channel)
    }

    /// Deliver `event` to every current observer of its topic.
    ///
    /// Returns the number of observers reached. Topics found without
    /// observers are dropped.
    pub async fn publish(&self, event: ChangeEvent) -> usize {
        self.stats.events_published.fetch_add(1, Ordering::Relaxed);

        let channel = self.read_topics().get(&event.topic).cloned();
        let Some(channel) = channel else {
            return 0;
        };

        let topic = event.topic.clone();
        match channel.sender.send(event) {
            Ok(count) => {
                self.stats.deliveries.fetch_add(count as u64, Ordering::Relaxed);
                count
            }
            Err(_) => {
                self.remove_if_idle(&topic).await;
                0
            }
        }
    }

    /// Drop the topic if nobody observes it.
    pub async fn remove_if_idle(&self, topic: &Topic) -> bool {
        let mut topics = self.write_topics();
        if let Some(channel) = topics.get(topic) {
            if channel.observer_count() == 0 {
                topics.remove(topic);
                log::debug!("Topic {topic} removed (no observers)");
                return true;
            }
        }
        false
    }

    pub async fn observer_count(&self, topic: &Topic) -> usize {
        self.read_topics().get(topic).map_or(0, |c| c.observer_count())
    }

    pub async fn topic_count(&self) -> usize {
        self.read_topics().len()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_published: self.stats.events_published.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            active_topics: self.read_topics().len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn canvas(key: &str) -> Topic {
        Topic::Canvas(ProjectKey::from(key))
    }

    fn event(topic: Topic, version: u64) -> ChangeEvent {
        ChangeEvent {
            topic,
            document_id: Uuid::new_v4(),
            version,
            kind: ChangeKind::Content,
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_all_observers() {
        let hub = ChangeBroadcaster::new(16);
        let mut a = hub.subscribe(canvas("p1")).await;
        let mut b = hub.subscribe(canvas("p1")).await;

        assert_eq!(hub.publish(event(canvas("p1"), 1)).await, 2);

        for sub in [&mut a, &mut b] {
            match sub.recv().await.unwrap() {
                Notification::Changed(e) => assert_eq!(e.version, 1),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_topics_isolated() {
        let hub = ChangeBroadcaster::new(16);
        let mut p1 = hub.subscribe(canvas("p1")).await;
        let mut global = hub.subscribe(Topic::Workflow(WorkspaceKey::global())).await;

        hub.publish(event(canvas("p2"), 1)).await;
        hub.publish(event(Topic::Workflow(WorkspaceKey::named("ws")), 1)).await;

        assert!(p1.try_recv().is_none());
        assert!(global.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = ChangeBroadcaster::new(16);
        let mut sub = hub.subscribe(canvas("p")).await;
        for v in 1..=5 {
            hub.publish(event(canvas("p"), v)).await;
        }
        let mut seen = Vec::new();
        while let Some(Notification::Changed(e)) = sub.try_recv() {
            seen.push(e.version);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_lagging_observer_is_told() {
        let hub = ChangeBroadcaster::new(2);
        let mut sub = hub.subscribe(canvas("p")).await;
        for v in 1..=5 {
            hub.publish(event(canvas("p"), v)).await;
        }
        assert!(matches!(sub.recv().await, Some(Notification::Lagged(3))));
        assert!(matches!(sub.recv().await, Some(Notification::Changed(e)) if e.version == 4));
    }

    #[tokio::test]
    async fn test_publish_without_observers() {
        let hub = ChangeBroadcaster::new(16);
        assert_eq!(hub.publish(event(canvas("nobody"), 1)).await, 0);
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_topic_removed_when_last_observer_drops() {
        let hub = ChangeBroadcaster::new(16);
        let sub = hub.subscribe(canvas("p")).await;
        assert_eq!(hub.observer_count(&canvas("p")).await, 1);
        drop(sub);

        assert_eq!(hub.topic_count().await, 0);
        assert_eq!(hub.publish(event(canvas("p"), 1)).await, 0);
    }

    #[tokio::test]
    async fn test_topic_kept_while_observers_remain() {
        let hub = ChangeBroadcaster::new(16);
        let a = hub.subscribe(canvas("p")).await;
        let mut b = hub.subscribe(canvas("p")).await;
        drop(a);

        assert_eq!(hub.topic_count().await, 1);
        assert_eq!(hub.publish(event(canvas("p"), 1)).await, 1);
        assert!(matches!(b.try_recv(), Some(Notification::Changed(e)) if e.version == 1));

        drop(b);
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_many_short_lived_observers_leave_no_topics() {
        let hub = ChangeBroadcaster::new(16);
        for i in 0..100 {
            let _sub = hub.subscribe(canvas(&format!("p{i}"))).await;
        }
        assert_eq!(hub.topic_count().await, 0);
        assert_eq!(hub.stats().await.active_topics, 0);
    }

    #[tokio::test]
    async fn test_subscription_outlives_broadcaster() {
        let hub = ChangeBroadcaster::new(16);
        let mut sub = hub.subscribe(canvas("p")).await;
        drop(hub);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let hub = ChangeBroadcaster::new(16);
        let _a = hub.subscribe(canvas("p")).await;
        let _b = hub.subscribe(canvas("p")).await;
        hub.publish(event(canvas("p"), 1)).await;
        hub.publish(event(canvas("p"), 2)).await;

        let stats = hub.stats().await;
        assert_eq!(stats.events_published, 2);
        assert_eq!(stats.deliveries, 4);
        assert_eq!(stats.active_topics, 1);
        assert_eq!(hub.capacity(), 16);
    }

    #[test]
    fn test_topic_display() {
        assert_eq!(canvas("p1").to_string(), "canvas:p1");
        assert_eq!(Topic::Workflow(WorkspaceKey::global()).to_string(), "workflow:<global>");
    }
}
