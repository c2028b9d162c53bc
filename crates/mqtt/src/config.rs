//! Broker connection and publish settings.
//!
//! All fields carry `validator` constraints so a bad value is rejected when the
//! configuration is loaded rather than when the first connection is attempted.
//!
//! ```toml
//! [transport]
//! host = "localhost"
//! port = 1883
//! topic = "DATA/WEIGHT"
//! qos = 0
//! ```

use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// MQTT transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker hostname or IP address. DNS resolution happens at connect time.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port.
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Client identifier. An empty string is replaced by a random UUID when
    /// the client is built.
    #[validate(length(max = 36, message = "Client ID must not exceed 36 characters"))]
    pub client_id: String,

    /// Broker login. `password` requires `username`.
    pub username: Option<String>,
    pub password: Option<String>,

    /// Topic every weight event is published to.
    #[validate(custom(function = "validate_topic"))]
    pub topic: String,

    /// QoS used for weight events (0, 1 or 2).
    #[validate(range(max = 2, message = "QoS must be 0, 1 or 2"))]
    pub qos: u8,

    /// Whether the broker should retain the last weight event.
    pub retain: bool,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Request a clean session from the broker.
    pub clean_session: bool,

    /// Capacity of the client's outbound request queue. When it is full,
    /// publishes fail immediately instead of waiting.
    #[validate(range(
        min = 1,
        max = 1024,
        message = "Request channel capacity must be between 1 and 1024"
    ))]
    pub request_channel_capacity: usize,

    /// Initial delay before reconnecting to the broker, in seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Upper bound for the reconnect delay, in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Max reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub max_reconnect_delay: u64,

    /// Growth factor applied to the reconnect delay after each failure.
    #[validate(range(
        min = 1.0,
        max = 10.0,
        message = "Reconnect multiplier must be between 1.0 and 10.0"
    ))]
    pub reconnect_multiplier: f64,

    /// Give up after this many consecutive failed attempts. 0 retries forever.
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            username: None,
            password: None,
            topic: "DATA/WEIGHT".to_string(),
            qos: 0,
            retain: false,
            keep_alive: 60,
            clean_session: true,
            request_channel_capacity: 64,
            reconnect_delay: 1,
            max_reconnect_delay: 60,
            reconnect_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl Config {
    /// Returns the configured client id, or a fresh UUID when none is set.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            format!("scalebridge-{}", &Uuid::new_v4().simple().to_string()[..8])
        } else {
            self.client_id.clone()
        }
    }

    /// QoS as the rumqttc enum. Out-of-range values fall back to at-most-once.
    pub fn qos(&self) -> QoS {
        match self.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay.max(self.reconnect_delay))
    }

    /// `host:port`, as shown in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Publish topics must be non-empty and must not contain wildcards.
fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        let mut err = ValidationError::new("empty_topic");
        err.message = Some("Publish topic must not be empty".into());
        return Err(err);
    }
    if topic.contains('+') || topic.contains('#') {
        let mut err = ValidationError::new("wildcard_topic");
        err.message = Some(format!("Publish topic must not contain wildcards: {}", topic).into());
        return Err(err);
    }
    Ok(())
}
