//! In-process + cross-instance pub/sub.
//!
//! Local delivery rides per-channel broadcast rings: subscribers get a
//! bounded cursor (capacity 256) into the ring, so a slow session never
//! blocks the publisher or its siblings — it just loses the oldest events
//! and the loss is counted. Cross-instance delivery goes through Redis
//! pub/sub; a broker outage degrades to local-only delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::metrics::Metrics;

/// Per-subscription ring capacity. Overflow drops the oldest events.
const SUBSCRIBER_QUEUE: usize = 256;

/// Remote publish ids are remembered this long for duplicate suppression.
const SEEN_TTL_MS: u64 = 60_000;

/// Prefix for broker channel names, so one Redis can serve other tenants.
const BROKER_PREFIX: &str = "safehorizon.";

pub const CH_ALERTS_AUTHORITY: &str = "alerts.authority";
pub const CH_BROADCASTS_ALL: &str = "broadcasts.all";
pub const CH_ADMIN_SYSTEM: &str = "admin.system";

pub fn tourist_channel(tourist_id: &str) -> String {
    format!("alerts.tourist.{tourist_id}")
}

pub fn zone_channel(zone_id: i64) -> String {
    format!("broadcasts.zone.{zone_id}")
}

/// Self-describing message. Everything a remote instance needs to dispatch
/// and dedup rides inside.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub publish_id: u64,
    pub origin: String,
    pub payload: serde_json::Value,
}

pub struct Hub {
    instance_id: String,
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    next_publish_id: AtomicU64,
    seen_remote: DashMap<String, u64>,
    broker: Option<redis::aio::ConnectionManager>,
    metrics: Arc<Metrics>,
}

pub struct Subscription {
    pub channel: String,
    receiver: broadcast::Receiver<Envelope>,
    dropped: u64,
    metrics: Arc<Metrics>,
}

impl Subscription {
    /// Next event, skipping over any overflow gap. Returns None when the hub
    /// is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(env) => return Some(env),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    Metrics::add(&self.metrics.hub_dropped, n);
                    warn!(channel = %self.channel, lost = n, "subscriber_overflow_dropped_oldest");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events lost to overflow on this subscription.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Hub {
    pub fn new(broker: Option<redis::aio::ConnectionManager>, metrics: Arc<Metrics>) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            channels: Mutex::new(HashMap::new()),
            next_publish_id: AtomicU64::new(1),
            seen_remote: DashMap::new(),
            broker,
            metrics,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Register interest in a channel. Dropping the returned subscription
    /// unsubscribes; the hub will not deliver to it afterwards.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let mut map = self.channels.lock().expect("hub channel table poisoned");
        let sender = map
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE).0);
        Subscription {
            channel: channel.to_string(),
            receiver: sender.subscribe(),
            dropped: 0,
            metrics: self.metrics.clone(),
        }
    }

    /// Publish to local subscribers and (when configured) the broker.
    /// At-most-once: no subscriber, no delivery, no queueing.
    pub fn publish(&self, channel: &str, event_type: &str, payload: serde_json::Value) {
        let envelope = Envelope {
            channel: channel.to_string(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            publish_id: self.next_publish_id.fetch_add(1, Ordering::Relaxed),
            origin: self.instance_id.clone(),
            payload,
        };
        Metrics::bump(&self.metrics.hub_published);
        self.dispatch_local(&envelope);
        self.forward_to_broker(envelope);
    }

    fn dispatch_local(&self, envelope: &Envelope) {
        let sender = {
            let map = self.channels.lock().expect("hub channel table poisoned");
            map.get(&envelope.channel).cloned()
        };
        if let Some(sender) = sender {
            if sender.send(envelope.clone()).is_err() {
                // Last receiver is gone; drop the ring so the table stays small.
                let mut map = self.channels.lock().expect("hub channel table poisoned");
                if let Some(s) = map.get(&envelope.channel) {
                    if s.receiver_count() == 0 {
                        map.remove(&envelope.channel);
                    }
                }
            }
        }
    }

    fn forward_to_broker(&self, envelope: Envelope) {
        let Some(broker) = self.broker.clone() else { return };
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut conn = broker;
            let broker_channel = format!("{BROKER_PREFIX}{}", envelope.channel);
            let body = match serde_json::to_string(&envelope) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "envelope_encode_failed");
                    return;
                }
            };
            match conn.publish::<_, _, ()>(&broker_channel, body).await {
                Ok(()) => Metrics::bump(&metrics.hub_remote_out),
                Err(e) => {
                    Metrics::bump(&metrics.broker_failures);
                    warn!(error = %e, channel = %envelope.channel,
                          "broker_publish_failed — local delivery only");
                }
            }
        });
    }

    /// Feed an envelope received from the broker into local dispatch.
    /// Suppresses our own publishes echoed back and remote duplicates.
    pub fn accept_remote(&self, envelope: Envelope) {
        if envelope.origin == self.instance_id {
            Metrics::bump(&self.metrics.hub_echo_suppressed);
            return;
        }
        let key = format!("{}:{}", envelope.origin, envelope.publish_id);
        let now_ms = Utc::now().timestamp_millis() as u64;
        if self.seen_remote.insert(key, now_ms).is_some() {
            Metrics::bump(&self.metrics.hub_echo_suppressed);
            return;
        }
        Metrics::bump(&self.metrics.hub_remote_in);
        self.dispatch_local(&envelope);
    }

    /// Drop remembered remote publish ids older than the TTL. Called from
    /// the shared eviction task.
    pub fn evict_seen(&self) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.seen_remote
            .retain(|_, &mut ts| now_ms.saturating_sub(ts) < SEEN_TTL_MS);
    }

    pub fn seen_remote_len(&self) -> usize {
        self.seen_remote.len()
    }
}

/// Broker inbound loop: pattern-subscribe to the namespace and dispatch
/// whatever arrives to channels with local subscribers. Reconnects with a
/// fixed backoff; the hub serves local-only while disconnected.
pub async fn broker_listener(hub: Arc<Hub>, broker_url: String) {
    loop {
        match listen_once(&hub, &broker_url).await {
            Ok(()) => info!("broker_connection_closed"),
            Err(e) => {
                Metrics::bump(&hub.metrics.broker_failures);
                warn!(error = %e, "broker_listener_error — retrying in 5s");
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn listen_once(hub: &Arc<Hub>, broker_url: &str) -> Result<(), redis::RedisError> {
    let client = redis::Client::open(broker_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(format!("{BROKER_PREFIX}*")).await?;
    info!("broker_subscribed");

    use futures_util::StreamExt;
    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "broker_payload_unreadable");
                continue;
            }
        };
        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) => hub.accept_remote(envelope),
            Err(e) => warn!(error = %e, "broker_envelope_malformed"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local_hub() -> Hub {
        Hub::new(None, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub = local_hub();
        let mut sub = hub.subscribe(CH_ALERTS_AUTHORITY);
        for i in 0..5 {
            hub.publish(CH_ALERTS_AUTHORITY, "alert_created", json!({ "seq": i }));
        }
        for i in 0..5 {
            let env = sub.recv().await.unwrap();
            assert_eq!(env.payload["seq"], i);
            assert_eq!(env.event_type, "alert_created");
        }
    }

    #[tokio::test]
    async fn no_subscriber_means_drop_not_queue() {
        let hub = local_hub();
        hub.publish(CH_ALERTS_AUTHORITY, "alert_created", json!({}));
        // Subscribing afterwards sees nothing from before.
        let mut sub = hub.subscribe(CH_ALERTS_AUTHORITY);
        hub.publish(CH_ALERTS_AUTHORITY, "alert_created", json!({ "fresh": true }));
        let env = sub.recv().await.unwrap();
        assert_eq!(env.payload["fresh"], true);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = local_hub();
        let mut a = hub.subscribe(&tourist_channel("T1"));
        let _b = hub.subscribe(&tourist_channel("T2"));
        hub.publish(&tourist_channel("T1"), "broadcast", json!({ "for": "T1" }));
        let env = a.recv().await.unwrap();
        assert_eq!(env.payload["for"], "T1");
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let hub = local_hub();
        let mut sub = hub.subscribe(CH_ALERTS_AUTHORITY);
        // Overfill the ring by 10 without draining.
        for i in 0..(SUBSCRIBER_QUEUE as i64 + 10) {
            hub.publish(CH_ALERTS_AUTHORITY, "alert_created", json!({ "seq": i }));
        }
        let first = sub.recv().await.unwrap();
        // The oldest 10 are gone; delivery resumes at seq 10.
        assert_eq!(first.payload["seq"], 10);
        assert_eq!(sub.dropped(), 10);
    }

    #[tokio::test]
    async fn echo_and_duplicate_suppression() {
        let hub = local_hub();
        let mut sub = hub.subscribe("alerts.authority");

        let mut envelope = Envelope {
            channel: "alerts.authority".into(),
            event_type: "alert_created".into(),
            timestamp: Utc::now(),
            publish_id: 7,
            origin: "other-instance".into(),
            payload: json!({ "n": 1 }),
        };

        // Own echo: dropped.
        let own = Envelope { origin: hub.instance_id().to_string(), ..envelope.clone() };
        hub.accept_remote(own);

        // Remote original: delivered once, duplicate suppressed.
        hub.accept_remote(envelope.clone());
        hub.accept_remote(envelope.clone());
        let got = sub.recv().await.unwrap();
        assert_eq!(got.payload["n"], 1);

        // Different publish id from the same origin is new.
        envelope.publish_id = 8;
        hub.accept_remote(envelope);
        let got = sub.recv().await.unwrap();
        assert_eq!(got.publish_id, 8);

        assert_eq!(hub.metrics.snapshot().hub_remote_in, 2);
        assert_eq!(hub.metrics.snapshot().hub_echo_suppressed, 2);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_delivery() {
        let hub = local_hub();
        let sub = hub.subscribe(CH_ALERTS_AUTHORITY);
        drop(sub);
        // Publish after the drop prunes the ring; nothing panics, nothing queues.
        hub.publish(CH_ALERTS_AUTHORITY, "alert_created", json!({}));
        let map = hub.channels.lock().unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope {
            channel: "broadcasts.all".into(),
            event_type: "broadcast".into(),
            timestamp: Utc::now(),
            publish_id: 42,
            origin: "i-1".into(),
            payload: json!({ "title": "storm" }),
        };
        let s = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&s).unwrap();
        assert_eq!(back.publish_id, 42);
        assert_eq!(back.channel, "broadcasts.all");
        assert_eq!(back.payload["title"], "storm");
    }

    #[test]
    fn channel_name_helpers() {
        assert_eq!(tourist_channel("T9"), "alerts.tourist.T9");
        assert_eq!(zone_channel(3), "broadcasts.zone.3");
    }
}
