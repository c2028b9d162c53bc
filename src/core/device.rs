//! Physical link to the scale.

use std::io;

use tokio::{io::AsyncReadExt, time::timeout};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use super::framing::FrameBuffer;
use crate::config::serial::SerialConfig;

const READ_CHUNK: usize = 256;

/// The link is down and must be reopened.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("serial read failed: {0}")]
    Io(#[from] io::Error),

    #[error("serial port closed by device")]
    Closed,

    #[error("serial port is not open")]
    NotOpen,
}

/// Source of raw frames.
///
/// `try_read` returns `Ok(None)` when no complete frame arrived within the
/// read window; an `Err` means the handle is unusable.
#[async_trait::async_trait]
pub trait DeviceReader: Send {
    async fn open(&mut self) -> Result<(), LinkError>;

    fn is_open(&self) -> bool;

    async fn try_read(&mut self) -> Result<Option<Vec<u8>>, LinkError>;

    async fn close(&mut self);

    /// Human-readable name of the link, used in log lines.
    fn describe(&self) -> String;
}

pub struct SerialDevice {
    config: SerialConfig,
    port: Option<SerialStream>,
    framer: FrameBuffer,
}

impl SerialDevice {
    pub fn new(config: SerialConfig) -> Self {
        let framer = FrameBuffer::new(config.end_of_frame, config.max_frame_len);
        Self {
            config,
            port: None,
            framer,
        }
    }
}

#[async_trait::async_trait]
impl DeviceReader for SerialDevice {
    async fn open(&mut self) -> Result<(), LinkError> {
        let port = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .timeout(self.config.read_timeout())
            .open_native_async()
            .map_err(|source| LinkError::Open {
                port: self.config.port.clone(),
                source,
            })?;

        self.framer.reset();
        self.port = Some(port);
        info!("Connected to {}", self.describe());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn try_read(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        if let Some(frame) = self.framer.next_frame() {
            return Ok(Some(frame));
        }

        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        let mut chunk = [0u8; READ_CHUNK];

        let read = timeout(self.config.read_timeout(), port.read(&mut chunk)).await;
        match read {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(LinkError::Closed),
            Ok(Ok(n)) => {
                self.framer.push(&chunk[..n]);
                Ok(self.framer.next_frame())
            }
            Ok(Err(e)) => Err(LinkError::Io(e)),
        }
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.describe());
        }
        self.framer.reset();
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.config.port, self.config.baud_rate)
    }
}
