//! Control socket server: accepts harness connections on a Unix socket and
//! dispatches their requests into the shared [`ConnectionProxy`].
//!
//! Each accepted connection gets its own session task. A session handles one
//! request at a time, writing the reply before decoding the next request.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use lnprototest_config::{AppConfig, ConfigError};

use super::codec::{CodecError, JsonCodec};
use super::types::*;
use crate::build_info;
use crate::daemon::ShutdownSignal;
use crate::proxy::ConnectionProxy;

/// File name of the control socket inside the data directory.
pub const SOCKET_FILE_NAME: &str = "lnprototest.sock";

/// `<data_dir>/lnprototest.sock`.
pub fn socket_path_from_config(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    Ok(config.data_dir()?.join(SOCKET_FILE_NAME))
}

/// Bind the control socket, replacing a stale socket file left by an
/// earlier instance and creating the parent directory if needed.
///
/// Anything at the path that is not a socket is left alone and the bind
/// fails with `AlreadyExists`.
pub fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
    match std::fs::symlink_metadata(socket_path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %socket_path.display(), "Removing stale control socket");
            std::fs::remove_file(socket_path)?;
        }
        Ok(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket", socket_path.display()),
            ));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "Control socket listening");
    Ok(listener)
}

/// What a session should do after handling one request.
#[derive(Debug)]
pub struct Outcome {
    /// Reply to write, absent for notifications.
    pub reply: Option<Response>,
    /// Set by `stop`; the session signals shutdown once the reply is out.
    pub stop_requested: bool,
}

impl Outcome {
    fn reply(reply: Response) -> Self {
        Self {
            reply: Some(reply),
            stop_requested: false,
        }
    }
}

/// Maps decoded requests onto proxy operations.
pub struct Dispatcher {
    proxy: Arc<ConnectionProxy>,
    socket_path: PathBuf,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Dispatcher {
    pub fn new(
        proxy: Arc<ConnectionProxy>,
        socket_path: PathBuf,
        shutdown_tx: broadcast::Sender<ShutdownSignal>,
    ) -> Self {
        Self {
            proxy,
            socket_path,
            shutdown_tx,
        }
    }

    pub fn proxy(&self) -> &Arc<ConnectionProxy> {
        &self.proxy
    }

    /// Handle one decoded JSON value.
    pub async fn dispatch(&self, value: Value) -> Outcome {
        let request: Request = match serde_json::from_value(value.clone()) {
            Ok(request) => request,
            Err(e) => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                warn!(error = %e, "Rejecting invalid request");
                return Outcome::reply(Response::failure(id, RpcError::invalid_request(e)));
            }
        };

        let notification = request.is_notification();
        let id = request.id.unwrap_or(Value::Null);

        let method = match request.method.parse::<Method>() {
            Ok(method) => method,
            Err(err) => {
                warn!(method = %request.method, "Unknown method");
                return Outcome {
                    reply: (!notification).then(|| Response::failure(id, err)),
                    stop_requested: false,
                };
            }
        };

        debug!(%method, id = %id, "Dispatching request");
        let result = self.call(method, request.params).await;
        if let Err(err) = &result {
            warn!(%method, code = err.code, error = %err.message, "Request failed");
        }

        Outcome {
            reply: (!notification).then(|| match result {
                Ok(value) => Response::success(id, value),
                Err(err) => Response::failure(id, err),
            }),
            stop_requested: method == Method::Stop,
        }
    }

    async fn call(&self, method: Method, params: Value) -> Result<Value, RpcError> {
        match method {
            Method::Connect => {
                let params: ConnectParams = decode_params(params)?;
                let msg = self.proxy.connect(&params.node_id, params.port).await?;
                to_result(ConnectResult {
                    node_id: params.node_id,
                    port: params.port,
                    msg,
                })
            }
            Method::Send => {
                let params: SendParams = decode_params(params)?;
                let msg = self.proxy.send(&params.msg).await?;
                to_result(FrameResult { msg })
            }
            Method::Receive => {
                let msg = self.proxy.receive().await?;
                to_result(FrameResult { msg })
            }
            Method::Disconnect => {
                let disconnected = self.proxy.destroy().await;
                to_result(DisconnectResult { disconnected })
            }
            Method::GetInfo => {
                let peer = self.proxy.peer_info().await.map(|peer| PeerInfo {
                    node_id: peer.node_id_hex(),
                    address: peer.addr.to_string(),
                });
                to_result(GetInfoResult {
                    version: build_info::VERSION.to_string(),
                    git_hash: build_info::GIT_HASH.to_string(),
                    node_id: self.proxy.node_id(),
                    network: self.proxy.network().to_string(),
                    socket_path: self.socket_path.display().to_string(),
                    peer,
                })
            }
            Method::Stop => {
                info!("Stop requested via control socket");
                to_result(StopResult {
                    acknowledged: true,
                    message: "Shutdown initiated".to_string(),
                })
            }
        }
    }
}

fn decode_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

fn to_result<T: Serialize>(result: T) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|e| RpcError::new(codes::IO, e.to_string()))
}

/// Accept connections until a shutdown signal arrives.
///
/// Accept errors are logged and the loop continues. Sessions already
/// running are not waited for.
pub async fn serve(
    listener: UnixListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("Control client connected");
                    tokio::spawn(run_session(stream, Arc::clone(&dispatcher)));
                }
                Err(e) => warn!(error = %e, "Failed to accept control client"),
            },
            _ = shutdown_rx.recv() => {
                info!("Control socket shutting down");
                break;
            }
        }
    }
}

/// Drive one client session to completion.
///
/// A syntax error in the stream gets a parse-error reply, after which the
/// session closes since the stream cannot be resynchronised.
pub async fn run_session<S>(stream: S, dispatcher: Arc<Dispatcher>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, JsonCodec::new());

    while let Some(frame) = framed.next().await {
        let outcome = match frame {
            Ok(value) => dispatcher.dispatch(value).await,
            Err(CodecError::Io(e)) => {
                debug!(error = %e, "Control session I/O error");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Unparseable input, closing control session");
                let reply = Response::failure(Value::Null, RpcError::parse_error(&e));
                if let Err(e) = framed.send(reply).await {
                    debug!(error = %e, "Failed to write parse error reply");
                }
                break;
            }
        };

        if let Some(reply) = outcome.reply {
            if let Err(e) = framed.send(reply).await {
                debug!(error = %e, "Failed to write reply");
                break;
            }
        }
        if outcome.stop_requested {
            let _ = dispatcher.shutdown_tx.send(ShutdownSignal);
        }
    }
    debug!("Control client disconnected");
}
