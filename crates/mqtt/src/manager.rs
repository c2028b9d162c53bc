//! Entry point: turns a [`Config`] into a running [`MqttInstance`].
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?.build_and_start()?;
//! let publisher = instance.publisher();
//! publisher.publish_json(&payload)?;
//! instance.shutdown().await;
//! ```

use std::time::Duration;

use rumqttc::AsyncClient;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backoff::Backoff, client::ClientBuilder, config::Config, connection::ConnectionKernel,
    error::TransferError, publisher::Publisher, state::ConnectionState,
};

/// How long `shutdown` waits for the kernel to send DISCONNECT and exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct MqttManager {
    config: Config,
    cancel_token: CancellationToken,
}

impl MqttManager {
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        Ok(Self {
            config,
            cancel_token: CancellationToken::new(),
        })
    }

    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, TransferError> {
        Self::from_config(Config {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Builds the client and spawns the connection kernel.
    ///
    /// Returns as soon as the kernel task is running; the connection itself
    /// is established in the background. Must be called inside a tokio
    /// runtime.
    pub fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        info!("Connecting to broker {}...", self.config.address());

        let (client, event_loop) = ClientBuilder::from_config(&self.config)?.build();
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            Backoff::from_config(&self.config),
            self.cancel_token.clone(),
        );
        let state_rx = kernel.subscribe_state();

        let kernel_handle = tokio::spawn(async move {
            if let Err(e) = kernel.run().await {
                error!("MQTT connection kernel stopped: {}", e);
            }
        });

        Ok(MqttInstance {
            client,
            config: self.config,
            state_rx,
            cancel_token: self.cancel_token,
            kernel_handle,
        })
    }
}

/// Handle to a running MQTT connection.
pub struct MqttInstance {
    client: AsyncClient,
    config: Config,
    state_rx: watch::Receiver<ConnectionState>,
    cancel_token: CancellationToken,
    kernel_handle: JoinHandle<()>,
}

impl MqttInstance {
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Receiver for connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Publisher bound to the configured topic, QoS and retain flag.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            self.client.clone(),
            self.config.topic.clone(),
            self.config.qos(),
            self.config.retain,
        )
    }

    /// Stops the kernel (which sends DISCONNECT) and waits a bounded time for
    /// it to finish.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        debug!("Cancellation token triggered, MQTT disconnecting...");

        match tokio::time::timeout(SHUTDOWN_GRACE, self.kernel_handle).await {
            Ok(Ok(())) => info!("MQTT connection closed"),
            Ok(Err(e)) => warn!("MQTT kernel task failed: {}", e),
            Err(_) => warn!("MQTT kernel did not stop within {:?}", SHUTDOWN_GRACE),
        }
    }
}
