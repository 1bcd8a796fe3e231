//! Live update fan-out to dashboard subscribers.

use crate::models::{Domain, Record};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// One push message: a flushed batch of a single domain.
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    pub domain: Domain,
    pub count: usize,
    pub records: Vec<Value>,
    pub emitted_at: DateTime<Utc>,
}

impl LiveUpdate {
    /// Build an update from a batch, keeping record order.
    pub fn from_batch<R: Record>(batch: &[R]) -> Result<Self> {
        let records = batch
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to serialize {} batch", R::DOMAIN))?;

        Ok(Self {
            domain: R::DOMAIN,
            count: records.len(),
            records,
            emitted_at: Utc::now(),
        })
    }
}

/// Cloneable handle to the live channel.
#[derive(Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<LiveUpdate>,
}

impl Broadcaster {
    /// `capacity` is how many updates a slow subscriber may lag behind
    /// before it starts missing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Push an update to every current subscriber. Returns how many
    /// received it; having no subscribers is not an error.
    pub fn publish(&self, update: LiveUpdate) -> usize {
        let domain = update.domain;
        match self.sender.send(update) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No live subscribers for {} update", domain);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveUpdate> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::Severity;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let broadcaster = Broadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        let batch = vec![
            anomaly("an-1", "pump-1", Severity::High, 0),
            anomaly("an-2", "pump-2", Severity::Low, 1),
        ];
        let update = LiveUpdate::from_batch(&batch).unwrap();
        assert_eq!(broadcaster.publish(update), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.domain, Domain::Anomalies);
        assert_eq!(received.count, 2);
        assert_eq!(received.records[0]["id"], "an-1");
        assert_eq!(received.records[1]["id"], "an-2");
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let broadcaster = Broadcaster::new(8);
        let update = LiveUpdate::from_batch(&[sample("pump-1", "temperature", 1.0, 0)]).unwrap();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.publish(update), 0);
    }
}
