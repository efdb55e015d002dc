//! Daemon test helpers.
//!
//! [`TestDaemon`] runs a real [`Daemon`] on a control socket inside a
//! temporary data directory and hands out connected [`RpcClient`]s.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lnprototest_core::{Daemon, DaemonError, RpcClient};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::config::TestConfigBuilder;

/// A running daemon with an owned temp data directory.
///
/// The temp directory is deleted when this value is dropped, guaranteeing
/// cleanup even on panic.
pub struct TestDaemon {
    pub daemon: Arc<Daemon>,
    handle: JoinHandle<Result<(), DaemonError>>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon with the test defaults.
    pub async fn start() -> Self {
        Self::with_builder(TestConfigBuilder::new()).await
    }

    /// Start a daemon from `builder`; its data dir is replaced by a temp dir.
    pub async fn with_builder(builder: TestConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = builder.data_dir(temp_dir.path()).build();
        let daemon = Arc::new(Daemon::new(config).expect("failed to create daemon"));

        let handle = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run().await })
        };

        let socket = daemon.socket_path().to_path_buf();
        for _ in 0..200 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(socket.exists(), "daemon never bound {}", socket.display());

        Self {
            daemon,
            handle,
            _temp_dir: temp_dir,
        }
    }

    pub fn socket_path(&self) -> &Path {
        self.daemon.socket_path()
    }

    /// Open a new control session.
    pub async fn client(&self) -> RpcClient {
        RpcClient::connect(self.socket_path())
            .await
            .expect("failed to connect to test daemon")
    }

    /// Wait for the daemon to exit after `stop` was sent over RPC.
    pub async fn join(self) -> Result<(), DaemonError> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("daemon did not stop in time")
            .expect("daemon task panicked")
    }

    /// Signal shutdown and wait for the daemon to exit.
    pub async fn shutdown(self) -> Result<(), DaemonError> {
        self.daemon.shutdown();
        self.join().await
    }
}
