//! Control socket client used by the CLI and the integration tests.
//!
//! Holds one persistent session, so a sequence of calls on the same client
//! is handled strictly in order by the daemon.

use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

use super::codec::{CodecError, JsonCodec};
use super::types::*;

/// Errors from the control client.
#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Codec(#[from] CodecError),

    #[error("daemon closed the connection before replying")]
    Closed,

    #[error("reply id {got} does not match request id {expected}")]
    IdMismatch { expected: Value, got: Value },

    #[error("failed to parse reply: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("daemon returned error: {0}")]
    Rpc(#[from] RpcError),
}

/// Client for one session with the lnprototest daemon.
pub struct RpcClient {
    socket_path: PathBuf,
    framed: Framed<UnixStream, JsonCodec>,
    next_id: u64,
}

impl RpcClient {
    /// Open a session on the daemon's control socket.
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self, RpcClientError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if !socket_path.exists() {
            return Err(RpcClientError::NotRunning(socket_path));
        }

        let stream =
            UnixStream::connect(&socket_path)
                .await
                .map_err(|e| RpcClientError::Connect {
                    path: socket_path.clone(),
                    source: e,
                })?;

        Ok(Self {
            socket_path,
            framed: Framed::new(stream, JsonCodec::new()),
            next_id: 0,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and wait for its reply.
    pub async fn call_raw(&mut self, method: &str, params: Value) -> Result<Value, RpcClientError> {
        self.next_id += 1;
        let id = Value::String(format!("lnprototest/{}", self.next_id));
        debug!(method, id = %id, "RPC request");

        self.framed
            .send(Request::new(id.clone(), method, params))
            .await?;

        let reply = self.framed.next().await.ok_or(RpcClientError::Closed)??;
        let reply: Response = serde_json::from_value(reply)?;
        if reply.id != id {
            return Err(RpcClientError::IdMismatch {
                expected: id,
                got: reply.id,
            });
        }
        Ok(reply.into_result()?)
    }

    /// Typed variant of [`call_raw`](Self::call_raw).
    pub async fn call<P, R>(&mut self, method: &str, params: &P) -> Result<R, RpcClientError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call_raw(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a request without an id. The daemon writes no reply.
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<(), RpcClientError> {
        self.framed
            .send(Request::notification(method, params))
            .await?;
        Ok(())
    }

    // ── Typed API methods ──────────────────────────────────────────────

    /// Dial the node `node_id` on `127.0.0.1:<port>` and return its greeting.
    pub async fn connect_peer(
        &mut self,
        node_id: &str,
        port: u32,
    ) -> Result<ConnectResult, RpcClientError> {
        let params = ConnectParams {
            node_id: node_id.to_string(),
            port,
        };
        self.call(Method::Connect.as_str(), &params).await
    }

    pub async fn send(&mut self, msg: &str) -> Result<FrameResult, RpcClientError> {
        let params = SendParams {
            msg: msg.to_string(),
        };
        self.call(Method::Send.as_str(), &params).await
    }

    pub async fn receive(&mut self) -> Result<FrameResult, RpcClientError> {
        self.call(Method::Receive.as_str(), &Value::Null).await
    }

    pub async fn disconnect(&mut self) -> Result<DisconnectResult, RpcClientError> {
        self.call(Method::Disconnect.as_str(), &Value::Null).await
    }

    pub async fn getinfo(&mut self) -> Result<GetInfoResult, RpcClientError> {
        self.call(Method::GetInfo.as_str(), &Value::Null).await
    }

    /// Ask the daemon to shut down.
    pub async fn stop(&mut self) -> Result<StopResult, RpcClientError> {
        self.call(Method::Stop.as_str(), &Value::Null).await
    }
}
