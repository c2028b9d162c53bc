//! Builds the rumqttc client and event loop from [`Config`].

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use validator::Validate;

use super::{config::Config, error::TransferError};

/// Fluent builder around `MqttOptions`.
///
/// The returned `AsyncClient` is cloneable and used to queue publishes; the
/// `EventLoop` must be driven by exactly one task (see `ConnectionKernel`).
pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
}

impl ClientBuilder {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
        }
    }

    /// Validates the configuration and applies every connection option.
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        config.validate()?;

        let mut builder = Self::new(
            config.effective_client_id(),
            config.host.clone(),
            config.port,
            config.request_channel_capacity,
        )
        .keep_alive(config.keep_alive)
        .clean_session(config.clean_session);

        match (&config.username, &config.password) {
            (Some(user), password) => {
                builder = builder.credentials(user.clone(), password.clone().unwrap_or_default());
            }
            (None, Some(_)) => {
                return Err(TransferError::ClientSetup(
                    "password is set but username is missing".into(),
                ))
            }
            (None, None) => {}
        }

        Ok(builder)
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn build(self) -> (AsyncClient, EventLoop) {
        AsyncClient::new(self.opts, self.cap)
    }
}
