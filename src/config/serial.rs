//! Serial link and loop timing settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// End-of-frame control byte emitted by the scale (ETX).
pub const DEFAULT_END_OF_FRAME: u8 = 0x03;

#[cfg(windows)]
const DEFAULT_PORT: &str = "COM1";
#[cfg(not(windows))]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM1`.
    #[validate(length(min = 1, message = "Serial port must not be empty"))]
    pub port: String,

    #[validate(range(
        min = 50,
        max = 4000000,
        message = "Baud rate must be between 50 and 4000000"
    ))]
    pub baud_rate: u32,

    pub end_of_frame: u8,

    /// Bytes buffered without an end-of-frame marker before the buffer is
    /// treated as noise and dropped.
    #[validate(range(
        min = 16,
        max = 65536,
        message = "Max frame length must be between 16 and 65536"
    ))]
    pub max_frame_len: usize,

    /// How long a single read waits for bytes.
    #[validate(range(
        min = 1,
        max = 10000,
        message = "Read timeout must be between 1 and 10000 ms"
    ))]
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: 9600,
            end_of_frame: DEFAULT_END_OF_FRAME,
            max_frame_len: 1024,
            read_timeout_ms: 100,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Timing of the observation loop.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Sleep when no frame is pending.
    #[validate(range(
        min = 1,
        max = 10000,
        message = "Poll interval must be between 1 and 10000 ms"
    ))]
    pub poll_interval_ms: u64,

    /// Wait before reopening a lost serial link.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub reconnect_delay_secs: u64,

    /// Pause after an iteration fails unexpectedly.
    #[validate(range(
        min = 1,
        max = 60000,
        message = "Fault delay must be between 1 and 60000 ms"
    ))]
    pub fault_delay_ms: u64,

    /// Upper bound for handing one event to the publisher.
    #[validate(range(
        min = 1,
        max = 60000,
        message = "Publish timeout must be between 1 and 60000 ms"
    ))]
    pub publish_timeout_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            reconnect_delay_secs: 5,
            fault_delay_ms: 1000,
            publish_timeout_ms: 1000,
        }
    }
}
