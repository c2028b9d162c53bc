//! Broker reachability as seen by the observation loop.
//!
//! The MQTT kernel reports its [`ConnectionState`] on a `watch` channel. A
//! listener task folds that into a simpler [`ReadinessState`] and writes the
//! operator-facing connect/disconnect lines. The loop only reads the current
//! value; it never waits for readiness, since publishing is fire-and-forget.

use std::fmt;

use scalebridge_mqtt::ConnectionState;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Ready,
    NotReady(String),
    Unknown,
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn reason(&self) -> &str {
        match self {
            ReadinessState::NotReady(reason) => reason,
            _ => "",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Ready => write!(f, "Ready"),
            ReadinessState::NotReady(reason) => write!(f, "NotReady: {}", reason),
            ReadinessState::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<&ConnectionState> for ReadinessState {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => ReadinessState::Ready,
            ConnectionState::Connecting => ReadinessState::NotReady("connecting".to_string()),
            ConnectionState::Disconnected(reason) => {
                ReadinessState::NotReady(format!("disconnected: {}", reason))
            }
            ConnectionState::Reconnecting(delay) => {
                ReadinessState::NotReady(format!("reconnecting in {:.1}s", delay.as_secs_f64()))
            }
        }
    }
}

/// Shared, cloneable readiness flag.
#[derive(Debug, Clone)]
pub struct Readiness {
    state_tx: watch::Sender<ReadinessState>,
    state_rx: watch::Receiver<ReadinessState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ReadinessState::Unknown);
        Self { state_tx, state_rx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ReadinessState {
        self.state_rx.borrow().clone()
    }

    pub fn set_state(&self, state: ReadinessState) {
        let old = self.current_state();
        self.state_tx.send_replace(state.clone());
        debug!("Readiness changed: {} -> {}", old, state);
    }

    /// Follows `connection_rx` until the kernel drops its sender.
    ///
    /// `broker` is only used in log lines.
    pub fn start_listening(
        &self,
        connection_rx: watch::Receiver<ConnectionState>,
        broker: String,
    ) -> JoinHandle<()> {
        let readiness = self.clone();
        tokio::spawn(async move { readiness.listen(connection_rx, broker).await })
    }

    async fn listen(&self, mut connection_rx: watch::Receiver<ConnectionState>, broker: String) {
        loop {
            let conn_state = connection_rx.borrow_and_update().clone();
            self.apply(&conn_state, &broker);

            if connection_rx.changed().await.is_err() {
                break;
            }
        }
        debug!("Connection state channel closed, readiness listener stopped");
    }

    fn apply(&self, conn_state: &ConnectionState, broker: &str) {
        let next = ReadinessState::from(conn_state);
        let was_ready = self.current_state().is_ready();

        match (was_ready, next.is_ready()) {
            (false, true) => info!("MQTT connected to {}", broker),
            (true, false) => warn!("MQTT disconnected from {} ({})", broker, next.reason()),
            _ => debug!("MQTT state: {}", conn_state),
        }
        self.set_state(next);
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}
