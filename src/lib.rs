//! scalebridge — serial weighing scale to MQTT bridge
//!
//! Reads ASCII frames from a scale on a serial port, extracts the settled
//! flag and the weight, suppresses the noisy readings of a load that is still
//! moving, and publishes one `{"weight": "12.50"}` message per confirmed
//! weight.
//!
//! ## Modules
//!
//! * `config` — TOML configuration with environment variable overrides,
//!   validated with the `validator` crate.
//!
//! * `core` — the runtime:
//!   - frame decoding (`frame`) and stream splitting (`framing`)
//!   - the stabilization state machine (`tracker`)
//!   - device and publisher boundaries (`device`, `publisher`)
//!   - broker readiness tracking (`readiness`)
//!   - the observation loop (`bridge`)
//!
//! * `logger` — `tracing` subscriber setup: console (compact, pretty, JSON),
//!   log file and systemd journald.
//!
//! The MQTT transport lives in the `scalebridge-mqtt` workspace crate.

pub mod config;
pub mod core;
pub mod logger;
