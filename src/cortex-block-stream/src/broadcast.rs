//! Broadcasting finished blocks.
//!
//! Blocks leave the orchestrator as [`BlockEvent`]s published on a topic
//! derived from the session id. Delivery to viewers is the broadcaster's
//! business: [`ChannelBroadcaster`] is the in-process implementation, other
//! transports implement [`BlockBroadcaster`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::BlockStreamResult;

/// Default per-topic channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// One block handed to the pub/sub layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    /// Session the run belongs to.
    pub session_id: String,
    /// Run that produced the block.
    pub run_id: String,
    /// Zero-based index of the block within the run.
    pub block_index: usize,
    /// Display-ready block text.
    pub content: String,
}

impl BlockEvent {
    /// Serialize as a JSON payload.
    pub fn to_json(&self) -> BlockStreamResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Topic that all block events for a session are published on.
pub fn topic_for_session(session_id: &str) -> String {
    format!("session:{}:blocks", session_id)
}

/// Receives finished blocks from orchestrators.
#[async_trait::async_trait]
pub trait BlockBroadcaster: Send + Sync {
    /// Publish an event on `topic`.
    async fn publish(&self, topic: &str, event: BlockEvent) -> BlockStreamResult<()>;
}

/// In-process broadcaster with one `tokio::sync::broadcast` channel per topic.
///
/// Channels exist only while someone subscribes. Publishing to a topic
/// nobody listens on is not an error; the event is dropped and the topic
/// forgotten.
pub struct ChannelBroadcaster {
    channels: DashMap<String, broadcast::Sender<BlockEvent>>,
    capacity: usize,
}

impl ChannelBroadcaster {
    /// Create a broadcaster with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a broadcaster whose per-topic channels hold `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to every block published for a session.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<BlockEvent> {
        self.subscribe_topic(&topic_for_session(session_id))
    }

    /// Subscribe to a raw topic.
    pub fn subscribe_topic(&self, topic: &str) -> broadcast::Receiver<BlockEvent> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of topics with a live channel.
    pub fn topic_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Forget a topic. Existing receivers see the channel close.
    pub fn remove_topic(&self, topic: &str) {
        self.channels.remove(topic);
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlockBroadcaster for ChannelBroadcaster {
    async fn publish(&self, topic: &str, event: BlockEvent) -> BlockStreamResult<()> {
        // Clone out of the map so no shard guard is held during remove_if.
        let Some(sender) = self.channels.get(topic).map(|sender| sender.clone()) else {
            debug!(topic = %topic, "No subscribers for block event");
            return Ok(());
        };

        if sender.send(event).is_err() {
            self.channels
                .remove_if(topic, |_, sender| sender.receiver_count() == 0);
            debug!(topic = %topic, "Last subscriber gone, dropped topic");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(index: usize) -> BlockEvent {
        BlockEvent {
            session_id: "s-1".to_string(),
            run_id: "r-1".to_string(),
            block_index: index,
            content: format!("block {}", index),
        }
    }

    #[test]
    fn test_topic_is_deterministic() {
        assert_eq!(topic_for_session("abc"), "session:abc:blocks");
        assert_eq!(topic_for_session("abc"), topic_for_session("abc"));
    }

    #[test]
    fn test_event_json() {
        let json = event(2).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["run_id"], "r-1");
        assert_eq!(value["block_index"], 2);
        assert_eq!(value["content"], "block 2");
    }

    #[tokio::test]
    async fn test_channel_broadcaster_delivers_to_subscribers() {
        let broadcaster = ChannelBroadcaster::new();
        let mut rx = broadcaster.subscribe("s-1");
        assert_eq!(broadcaster.subscriber_count(&topic_for_session("s-1")), 1);

        broadcaster
            .publish(&topic_for_session("s-1"), event(0))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), event(0));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broadcaster = ChannelBroadcaster::new();
        assert!(broadcaster.publish("session:x:blocks", event(0)).await.is_ok());
        assert_eq!(broadcaster.subscriber_count("session:x:blocks"), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_keeps_no_topics() {
        let broadcaster = ChannelBroadcaster::new();
        for i in 0..100 {
            broadcaster
                .publish(&topic_for_session(&format!("s-{}", i)), event(0))
                .await
                .unwrap();
        }
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_topic_dropped_after_last_subscriber_leaves() {
        let broadcaster = ChannelBroadcaster::new();
        let topic = topic_for_session("s-1");
        let rx = broadcaster.subscribe("s-1");
        assert_eq!(broadcaster.topic_count(), 1);

        drop(rx);
        broadcaster.publish(&topic, event(0)).await.unwrap();

        assert_eq!(broadcaster.topic_count(), 0);
        assert_eq!(broadcaster.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let broadcaster = ChannelBroadcaster::new();
        let mut other = broadcaster.subscribe("s-2");

        broadcaster
            .publish(&topic_for_session("s-1"), event(0))
            .await
            .unwrap();

        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
