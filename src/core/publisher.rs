//! Delivery of stable events to the messaging transport.

use tracing::info;

use super::tracker::{StableEvent, WeightPayload};

pub type PublishError = Box<dyn std::error::Error + Send + Sync>;

/// Hands confirmed weights to the outside world.
///
/// Implementations must not retry: a failed publish is reported back, logged
/// by the caller, and the event is dropped.
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &StableEvent) -> Result<(), PublishError>;
}

/// Queues `{"weight": "..."}` on the configured topic.
#[async_trait::async_trait]
impl EventPublisher for scalebridge_mqtt::Publisher {
    async fn publish(&self, event: &StableEvent) -> Result<(), PublishError> {
        let payload: WeightPayload = event.payload();
        self.publish_json(&payload).map_err(|e| Box::new(e) as _)
    }
}

/// Logs events instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait::async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &StableEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&event.payload())?;
        info!("Dry run, not publishing {}", payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rumqttc::QoS;
    use scalebridge_mqtt::{ClientBuilder, Config};
    use tracing_test::traced_test;

    use super::*;
    use crate::core::tracker::EventAction;

    fn event(weight: f64) -> StableEvent {
        StableEvent {
            action: EventAction::Stable,
            weight,
            count: 3,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_noop_publisher_logs_payload() {
        NoopPublisher.publish(&event(12.5)).await.unwrap();
        assert!(logs_contain(r#"{"weight":"12.50"}"#));
    }

    #[tokio::test]
    async fn test_mqtt_publisher_queues_event() {
        let (client, _event_loop) = ClientBuilder::from_config(&Config::default())
            .unwrap()
            .build();
        let publisher =
            scalebridge_mqtt::Publisher::new(client, "DATA/WEIGHT", QoS::AtMostOnce, false);
        assert!(publisher.publish(&event(1.0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_mqtt_publisher_reports_stopped_transport() {
        let (client, event_loop) = ClientBuilder::from_config(&Config::default())
            .unwrap()
            .build();
        drop(event_loop);
        let publisher: Arc<dyn EventPublisher> = Arc::new(scalebridge_mqtt::Publisher::new(
            client,
            "DATA/WEIGHT",
            QoS::AtMostOnce,
            false,
        ));
        assert!(publisher.publish(&event(1.0)).await.is_err());
    }
}
