//! # scalebridge-mqtt
//!
//! Fire-and-forget MQTT transport built on `rumqttc`:
//!
//! - **Automatic reconnection** with exponential backoff (`ConnectionKernel`)
//! - **State monitoring** through a `watch` channel of [`ConnectionState`]
//! - **Non-blocking publishing** of JSON payloads ([`Publisher`])
//! - **Graceful shutdown** via a `CancellationToken`
//!
//! ```text
//! application ──> Publisher ──try_publish──> AsyncClient request queue
//!                                                   │
//!                          ConnectionKernel (own task) polls EventLoop
//!                                                   │
//!                                               broker (TCP)
//! ```
//!
//! The publisher never awaits the network, so a slow or unreachable broker
//! cannot stall the caller.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod state;

pub use backoff::{Backoff, BackoffError};
pub use client::ClientBuilder;
pub use config::Config;
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager};
pub use publisher::Publisher;
pub use state::ConnectionState;

pub type Result<T> = std::result::Result<T, TransferError>;
