//! Integration test binary -- all integration tests consolidated into a single
//! binary to reduce link time.
//!
//! See the matklad pattern: <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod broadcast_fanout;
mod concurrent_scan;
mod endpoint_hygiene;
mod host_bridge_e2e;
mod recurrence_chain;
