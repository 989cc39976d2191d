//! Upstream-facing descriptors.
//!
//! `descriptor` exposes validated metadata (`UpstreamDescriptor`) covering HTTPS-only
//! endpoints (loopback excepted), the OAuth client identifier and scope used for device
//! authorization, and the editor identification headers sent with every upstream call.

pub mod descriptor;

pub use descriptor::*;
