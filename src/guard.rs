//! Traffic guards wrapped around the forwarder.
//!
//! Both guards keep all their state behind a single `parking_lot` mutex and read time from
//! [`tokio::time::Instant`], so they never spawn timers and paused-clock tests can drive them.

pub mod circuit;
pub mod rate_limit;

pub use circuit::*;
pub use rate_limit::*;
