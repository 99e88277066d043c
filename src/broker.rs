//! In-process event broker
//!
//! Topic-based pub/sub decoupling the capture sources from the analyzer and
//! the WebSocket fan-out. Each subscriber owns a bounded FIFO queue;
//! publishing never blocks and drops per-subscriber on overflow, so one
//! slow consumer cannot stall the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{Alert, BlocklistEntry, FlowEvent};

/// Flow telemetry topic
pub const TOPIC_TRAFFIC: &str = "sh.telemetry.traffic.v1";
/// Emitted alerts topic
pub const TOPIC_ALERTS: &str = "sh.alerts.v1";
/// Graph change hints topic
pub const TOPIC_GRAPH: &str = "sh.graph_changes.v1";
/// Response manager feedback topic
pub const TOPIC_RESPONSES: &str = "sh.responses.v1";

/// Default per-subscriber queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 4096;

/// Messages carried on the bus
#[derive(Debug, Clone)]
pub enum BusMessage {
    Flow(Box<FlowEvent>),
    Alert(Box<Alert>),
    /// Node/edge upsert notification; consumers re-poll the store.
    GraphChanged,
    /// Blocklist insertion or expiry published by the response manager.
    Response(ResponseEvent),
}

/// Response manager feedback, consumed by the analyzer to maintain
/// quarantine state without a direct reference cycle.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    Blocked(BlocklistEntry),
    Unblocked(std::net::IpAddr),
}

struct Subscriber {
    token: u64,
    tx: mpsc::Sender<BusMessage>,
    dropped: Arc<AtomicU64>,
}

/// Handle returned by [`Broker::subscribe`]. Receives messages for one
/// (topic, subscriber) pair in publication order.
pub struct Subscription {
    pub token: SubscriptionToken,
    pub rx: mpsc::Receiver<BusMessage>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Messages dropped for this subscriber because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Opaque unsubscribe token
#[derive(Debug, Clone)]
pub struct SubscriptionToken {
    topic: String,
    id: u64,
}

/// Topic-based broker with per-subscriber bounded queues.
pub struct Broker {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_token: AtomicU64,
    total_dropped: AtomicU64,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber on a topic with the default queue depth.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.subscribe_with_depth(topic, DEFAULT_QUEUE_DEPTH)
    }

    pub fn subscribe_with_depth(&self, topic: &str, depth: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));

        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                token: id,
                tx,
                dropped: dropped.clone(),
            });

        Subscription {
            token: SubscriptionToken {
                topic: topic.to_string(),
                id,
            },
            rx,
            dropped,
        }
    }

    /// Remove a subscription. Its queue is dropped along with the sender,
    /// which closes the receiver after it drains.
    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        let mut topics = self.topics.write();
        if let Some(subs) = topics.get_mut(&token.topic) {
            subs.retain(|s| s.token != token.id);
            if subs.is_empty() {
                topics.remove(&token.topic);
            }
        }
    }

    /// Enqueue a message to every current subscriber of the topic. Never
    /// blocks; a full subscriber queue drops the message for that
    /// subscriber only.
    pub fn publish(&self, topic: &str, message: BusMessage) {
        let topics = self.topics.read();
        let Some(subs) = topics.get(topic) else {
            return;
        };

        for sub in subs {
            if sub.tx.try_send(message.clone()).is_err() {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                let total = self.total_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total % 1000 == 0 {
                    debug!(topic, total, "broker dropped messages on full subscriber queues");
                }
            }
        }
    }

    /// Total messages dropped across all subscribers.
    pub fn dropped_total(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;
    use std::net::IpAddr;

    fn flow(src: &str, dst: &str) -> BusMessage {
        BusMessage::Flow(Box::new(FlowEvent {
            timestamp: Utc::now(),
            source_ip: src.parse::<IpAddr>().unwrap(),
            destination_ip: dst.parse::<IpAddr>().unwrap(),
            source_port: 50000,
            destination_port: 443,
            protocol: crate::models::Protocol::Https,
            bytes_sent: 1,
            bytes_received: 1,
            ja3_hash: None,
            metadata: StdHashMap::new(),
        }))
    }

    #[tokio::test]
    async fn delivery_preserves_publication_order() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(TOPIC_TRAFFIC);

        for i in 0..10u8 {
            broker.publish(TOPIC_TRAFFIC, flow(&format!("10.0.0.{i}"), "1.1.1.1"));
        }

        for i in 0..10u8 {
            match sub.rx.recv().await.unwrap() {
                BusMessage::Flow(event) => {
                    assert_eq!(event.source_ip.to_string(), format!("10.0.0.{i}"));
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_publisher() {
        let broker = Broker::new();
        let sub = broker.subscribe_with_depth(TOPIC_TRAFFIC, 2);

        for _ in 0..5 {
            broker.publish(TOPIC_TRAFFIC, flow("10.0.0.1", "1.1.1.1"));
        }

        assert_eq!(sub.dropped(), 3);
        assert_eq!(broker.dropped_total(), 3);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let broker = Broker::new();
        let slow = broker.subscribe_with_depth(TOPIC_TRAFFIC, 1);
        let mut fast = broker.subscribe_with_depth(TOPIC_TRAFFIC, 16);

        for _ in 0..8 {
            broker.publish(TOPIC_TRAFFIC, flow("10.0.0.1", "1.1.1.1"));
        }

        let mut received = 0;
        while fast.rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 8);
        assert_eq!(slow.dropped(), 7);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = Broker::new();
        let sub = broker.subscribe(TOPIC_ALERTS);
        assert_eq!(broker.subscriber_count(TOPIC_ALERTS), 1);

        broker.unsubscribe(&sub.token);
        assert_eq!(broker.subscriber_count(TOPIC_ALERTS), 0);
    }
}
