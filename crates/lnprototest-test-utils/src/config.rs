//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use lnprototest_config::{AppConfig, Network};

/// Fluent builder for [`AppConfig`] in tests.
///
/// Defaults to regtest with short timeouts so failing tests fail fast.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .data_dir(dir.path())
///     .read_timeout_ms(200)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.peer.network = Network::Regtest;
        config.peer.handshake_timeout_ms = 1_000;
        config.peer.read_timeout_ms = 1_000;
        Self { config }
    }

    pub fn data_dir(mut self, dir: &Path) -> Self {
        self.config.daemon.data_dir = Some(dir.display().to_string());
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.peer.read_timeout_ms = ms;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
