#![deny(unsafe_code)]

//! Shared test utilities for the lnprototest workspace.
//!
//! Provides an in-process BOLT 8 [`MockPeer`](mock_peer::MockPeer), a
//! [`TestDaemon`](daemon::TestDaemon) serving on a temporary socket and a
//! config builder, so that individual crate tests stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! lnprototest-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod mock_peer;

pub use config::TestConfigBuilder;
pub use daemon::TestDaemon;
pub use mock_peer::{Behavior, MockPeer};
