//! Connection kernel: drives the rumqttc event loop, reconnects with backoff
//! and broadcasts [`ConnectionState`].
//!
//! The kernel runs on its own task. The application never waits on it; it
//! only holds a cloned `AsyncClient` and a `watch::Receiver` of the state.

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet, StateError,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{backoff::Backoff, error::TransferError, state::ConnectionState};

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    backoff: Backoff,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            backoff,
            cancel,
            state_tx,
        }
    }

    /// A receiver that sees the current state immediately and every change
    /// after it.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            debug!("Connection state changed to: {}", state);
        }
    }

    /// Runs until cancelled, a fatal error occurs, or the retry policy gives
    /// up.
    ///
    /// Transient errors (refused, reset, lost session, missed ping) are
    /// retried after the next backoff delay. Fatal ones (bad credentials, protocol violations) end
    /// the kernel, since retrying cannot fix them.
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        self.backoff.reset();
        info!("Starting MQTT connection event loop...");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting from broker");
                    self.disconnect().await;
                    self.update_state(ConnectionState::Disconnected("shutdown".into()));
                    return Ok(());
                }

                event = self.event_loop.poll() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        if is_fatal_error(&e) {
                            error!("Fatal MQTT error, giving up: {}", get_error_message(&e));
                            self.update_state(ConnectionState::Disconnected(e.to_string()));
                            return Err(e.into());
                        }

                        let delay = match self.backoff.next_sleep() {
                            Ok(delay) => delay,
                            Err(e) => {
                                error!("MQTT reconnect attempts exhausted: {}", e);
                                self.update_state(ConnectionState::Disconnected(e.to_string()));
                                return Err(e.into());
                            }
                        };

                        warn!(
                            "MQTT connection error: {}. Reconnecting in {:.1}s",
                            get_error_message(&e),
                            delay.as_secs_f64()
                        );
                        self.update_state(ConnectionState::Reconnecting(delay));

                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                self.update_state(ConnectionState::Disconnected("shutdown".into()));
                                return Ok(());
                            }
                            _ = tokio::time::sleep(delay) => {
                                self.update_state(ConnectionState::Connecting);
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    self.backoff.reset();
                    self.update_state(ConnectionState::Connected);
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.update_state(ConnectionState::Disconnected("Disconnected by broker".into()));
            }
            Event::Incoming(packet) => trace!("Incoming packet: {:?}", packet),
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {:?}", outgoing),
        }
    }

    /// Best effort: the socket closes either way.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Error sending disconnect packet: {}", e);
            return;
        }
        // Drive the loop briefly so the DISCONNECT actually leaves the socket.
        let flush = async {
            while let Ok(event) = self.event_loop.poll().await {
                if let Event::Outgoing(rumqttc::Outgoing::Disconnect) = event {
                    break;
                }
            }
        };
        if tokio::time::timeout(std::time::Duration::from_millis(500), flush)
            .await
            .is_err()
        {
            debug!("Timed out flushing DISCONNECT packet");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Read failures on an established session surface as state errors.
        ConnectionError::MqttState(
            StateError::Io(_) | StateError::AwaitPingResp | StateError::CollisionTimeout,
        ) => Reconnect,
        ConnectionError::MqttState(_) | ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,
        ConnectionError::Io(e) => match e.kind() {
            // Local misconfiguration, not a transient condition.
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput => Fatal,
            _ => Reconnect,
        },
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    classify_connection_error(err) == Disposition::Fatal
}

/// Innermost message of an error chain, without surrounding quotes.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
