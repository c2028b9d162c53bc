//! Broker connection state, broadcast by the connection kernel over a
//! `watch` channel.
//!
//! ```text
//! Connecting ──(CONNACK)──> Connected ──(error)──> Reconnecting(delay) ──> Connecting
//!                                  └──(broker DISCONNECT / fatal)──> Disconnected(reason)
//! ```

use std::{fmt, time::Duration};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent or about to be sent, no CONNACK yet.
    Connecting,
    /// CONNACK accepted. Publishes go out immediately.
    Connected,
    /// Connection lost or given up on, with the reason.
    Disconnected(String),
    /// Waiting this long before the next attempt.
    Reconnecting(Duration),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(reason) => write!(f, "Disconnected ({reason})"),
            ConnectionState::Reconnecting(delay) => {
                write!(f, "Reconnecting (in {:.1}s)", delay.as_secs_f64())
            }
            other => f.write_str(other.as_str()),
        }
    }
}
