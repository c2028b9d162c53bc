//! Fire-and-forget JSON publisher.
//!
//! Publishing never waits on the network: the payload is queued on the
//! client's request channel with `try_publish`, and the connection kernel
//! sends it when it can. A full queue or a stopped kernel is reported as an
//! error straight away.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tracing::trace;

use super::error::TransferError;

#[derive(Debug, Clone)]
pub struct Publisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    retain: bool,
}

impl Publisher {
    pub fn new(client: AsyncClient, topic: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Self {
            client,
            topic: topic.into(),
            qos,
            retain,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serializes `data` as JSON and queues it for the configured topic.
    pub fn publish_json<T: Serialize + ?Sized>(&self, data: &T) -> Result<(), TransferError> {
        let payload = serde_json::to_vec(data)?;
        self.publish_bytes(payload)
    }

    pub fn publish_bytes(&self, payload: Vec<u8>) -> Result<(), TransferError> {
        let len = payload.len();
        self.client
            .try_publish(self.topic.as_str(), self.qos, self.retain, payload)?;
        trace!("Queued {} bytes for topic {}", len, self.topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{client::ClientBuilder, config::Config};

    #[tokio::test]
    async fn test_publish_queues_json_payload() {
        // No broker needed: the request only sits in the client queue.
        let (client, _event_loop) = ClientBuilder::from_config(&Config::default())
            .unwrap()
            .build();
        let publisher = Publisher::new(client, "DATA/WEIGHT", QoS::AtMostOnce, false);

        assert!(publisher.publish_json(&json!({ "weight": "12.50" })).is_ok());
        assert_eq!(publisher.topic(), "DATA/WEIGHT");
    }

    #[tokio::test]
    async fn test_publish_fails_when_queue_full() {
        let config = Config {
            request_channel_capacity: 1,
            ..Default::default()
        };
        let (client, _event_loop) = ClientBuilder::from_config(&config).unwrap().build();
        let publisher = Publisher::new(client, "DATA/WEIGHT", QoS::AtMostOnce, false);

        publisher.publish_bytes(b"first".to_vec()).unwrap();
        let second = publisher.publish_bytes(b"second".to_vec());
        assert!(matches!(second, Err(TransferError::ClientTransfer(_))));
    }

    #[tokio::test]
    async fn test_publish_fails_when_event_loop_dropped() {
        let (client, event_loop) = ClientBuilder::from_config(&Config::default())
            .unwrap()
            .build();
        drop(event_loop);
        let publisher = Publisher::new(client, "DATA/WEIGHT", QoS::AtMostOnce, false);

        assert!(publisher.publish_json(&json!({ "weight": "1.00" })).is_err());
    }
}
