//! Error type for the MQTT transport.
//!
//! Setup errors (`ClientSetup`, `ConfigError`) are expected to stop the
//! application at startup. Everything else happens at runtime and is either
//! retried by the connection kernel or reported to the caller, who decides
//! whether to keep going.

use thiserror::Error;

use super::backoff::BackoffError;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The client could not be constructed from the configuration.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// Payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request could not be queued on the client (queue full or the
    /// event loop is gone).
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Network-level failure reported by the event loop. Boxed to keep the
    /// enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// The reconnect policy ran out of attempts.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] BackoffError),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
