//! Connection proxy: owns the one outbound peer connection shared by every
//! control session.
//!
//! All operations take the slot lock before touching the connection and hold
//! it until they return, so frames from concurrent callers never interleave
//! on the wire and every reply belongs to the request that produced it.
//! A connection whose read or write failed is closed and dropped, since a
//! late reply would otherwise be handed to the next request.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lnprototest_config::Network;

use crate::identity::{self, IdentityError, KeyPair, NodeIdError};
use crate::peer::{PeerAddress, PeerConnection, PeerError, PeerSettings};

/// Errors surfaced by proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    NodeId(#[from] NodeIdError),

    #[error("malformed message hex: {0}")]
    MalformedHex(#[from] hex::FromHexError),

    #[error("empty answer from the node")]
    EmptyReply,

    #[error(transparent)]
    Peer(#[from] PeerError),
}

/// Proxy between control sessions and a single peer connection.
pub struct ConnectionProxy {
    identity: KeyPair,
    network: Network,
    settings: PeerSettings,
    slot: Mutex<Option<PeerConnection>>,
}

impl ConnectionProxy {
    /// Create a proxy with a freshly generated identity.
    pub fn new(network: Network, settings: PeerSettings) -> Result<Self, IdentityError> {
        Ok(Self::with_identity(KeyPair::generate()?, network, settings))
    }

    pub fn with_identity(identity: KeyPair, network: Network, settings: PeerSettings) -> Self {
        info!(node_id = %identity.node_id(), network = %network, "Connection proxy ready");
        Self {
            identity,
            network,
            settings,
            slot: Mutex::new(None),
        }
    }

    /// Dial `127.0.0.1:<port>`, expecting the node `node_id`, and return the
    /// hex of the first frame the node sends.
    ///
    /// The previous connection, if any, is closed only once the new one has
    /// completed the handshake and delivered its greeting. On failure the
    /// slot is left exactly as it was.
    pub async fn connect(&self, node_id: &str, port: u32) -> Result<String, ProxyError> {
        let remote = identity::parse_node_id(node_id)?;
        let address = PeerAddress::loopback(remote, port, self.network)?;

        let mut slot = self.slot.lock().await;
        info!(node_id, port, "Connecting to peer");
        let mut conn = PeerConnection::dial(&self.identity, address, &self.settings).await?;

        let greeting = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                conn.close().await;
                return Err(ProxyError::EmptyReply);
            }
            Err(e) => {
                warn!(error = %e, "No greeting from peer");
                conn.close().await;
                return Err(e.into());
            }
        };

        if let Some(mut previous) = slot.replace(conn) {
            debug!(peer = %previous.address().node_id_hex(), "Closing superseded connection");
            previous.close().await;
        }

        let greeting = hex::encode(greeting);
        info!(msg = %greeting, "Connected, greeting received");
        Ok(greeting)
    }

    /// Write one frame and return the hex of the peer's next frame.
    pub async fn send(&self, frame_hex: &str) -> Result<String, ProxyError> {
        let frame = hex::decode(frame_hex)?;

        let mut slot = self.slot.lock().await;
        let conn = slot.as_mut().ok_or(PeerError::NotConnected)?;

        debug!(msg = frame_hex, "Sending frame");
        let result = match conn.write_frame(&frame).await {
            Ok(()) => next_reply(conn).await,
            Err(e) => Err(e.into()),
        };
        drop_if_desynced(&mut slot, result).await
    }

    /// Return the hex of the peer's next frame without writing anything.
    pub async fn receive(&self) -> Result<String, ProxyError> {
        let mut slot = self.slot.lock().await;
        let conn = slot.as_mut().ok_or(PeerError::NotConnected)?;
        let result = next_reply(conn).await;
        drop_if_desynced(&mut slot, result).await
    }

    /// Close and forget the current connection. Returns whether one was held.
    pub async fn destroy(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(mut conn) => {
                conn.close().await;
                true
            }
            None => false,
        }
    }

    /// Address of the held connection, if any.
    pub async fn peer_info(&self) -> Option<PeerAddress> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|conn| conn.address().clone())
    }

    /// Hex node id of the local identity.
    pub fn node_id(&self) -> String {
        self.identity.node_id()
    }

    pub fn network(&self) -> Network {
        self.network
    }
}

async fn drop_if_desynced(
    slot: &mut Option<PeerConnection>,
    result: Result<String, ProxyError>,
) -> Result<String, ProxyError> {
    match result {
        Err(ProxyError::Peer(err)) if err.desyncs_stream() => {
            if let Some(mut conn) = slot.take() {
                warn!(
                    peer = %conn.address().node_id_hex(),
                    error = %err,
                    "Dropping peer connection after failed exchange"
                );
                conn.close().await;
            }
            Err(err.into())
        }
        other => other,
    }
}

async fn next_reply(conn: &mut PeerConnection) -> Result<String, ProxyError> {
    match conn.read_frame().await? {
        Some(reply) if !reply.is_empty() => {
            let reply = hex::encode(reply);
            info!(msg = %reply, "Reply received");
            Ok(reply)
        }
        _ => Err(ProxyError::EmptyReply),
    }
}
