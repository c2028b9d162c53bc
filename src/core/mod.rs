//! Frame decoding, stabilization and the observation loop.

pub mod bridge;
pub mod device;
pub mod frame;
pub mod framing;
pub mod publisher;
pub mod readiness;
pub mod tracker;
