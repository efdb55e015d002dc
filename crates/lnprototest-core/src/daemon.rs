//! Daemon process: startup, control socket lifetime, and shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use lnprototest_config::{AppConfig, ConfigError};

use crate::identity::IdentityError;
use crate::peer::PeerSettings;
use crate::proxy::ConnectionProxy;
use crate::rpc::server::{self, Dispatcher};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The lnprototest daemon.
pub struct Daemon {
    config: AppConfig,
    socket_path: PathBuf,
    proxy: Arc<ConnectionProxy>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Daemon {
    /// Validate the configuration, resolve the socket path and generate the
    /// node identity. Fails if no identity key can be generated.
    pub fn new(config: AppConfig) -> Result<Self, DaemonError> {
        config.validate()?;
        let socket_path = server::socket_path_from_config(&config)?;
        let proxy = ConnectionProxy::new(config.peer.network, PeerSettings::from(&config.peer))?;
        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Self {
            config,
            socket_path,
            proxy: Arc::new(proxy),
            shutdown_tx,
        })
    }

    /// Serve the control socket until `stop` is requested or Ctrl-C is
    /// received, then drop the peer connection and remove the socket file.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let listener = server::bind(&self.socket_path).map_err(|source| DaemonError::Bind {
            path: self.socket_path.clone(),
            source,
        })?;

        info!(
            node_id = %self.proxy.node_id(),
            network = %self.proxy.network(),
            socket = %self.socket_path.display(),
            version = %crate::build_info::version_string(),
            "lnprototest daemon starting"
        );

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.proxy),
            self.socket_path.clone(),
            self.shutdown_tx.clone(),
        ));

        tokio::select! {
            _ = server::serve(listener, dispatcher, shutdown_rx) => {
                info!("Shutdown signal received, stopping daemon");
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                let _ = self.shutdown_tx.send(ShutdownSignal);
            }
        }

        if self.proxy.destroy().await {
            info!("Closed peer connection");
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!(error = %e, path = %self.socket_path.display(), "Failed to remove control socket");
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Request a graceful shutdown of a running daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn proxy(&self) -> &Arc<ConnectionProxy> {
        &self.proxy
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Errors from daemon startup.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot create node identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("cannot bind control socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
}
