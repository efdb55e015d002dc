//! Peer connection handle for one encrypted BOLT 8 session to a remote node.
//!
//! A [`PeerConnection`] preserves the transport's "one read, one message"
//! contract: [`PeerConnection::read_frame`] hands out exactly one whole
//! application message and never buffers partial frames of its own.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use secp256k1::PublicKey;
use tokio::net::TcpStream;
use tracing::{debug, info};

use lnprototest_config::{Network, PeerConfig};

use crate::identity::KeyPair;
use crate::noise::{self, NoiseError, NoiseStream};

/// Errors from dialing and using a peer connection.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("cannot resolve peer address: {0}")]
    AddressResolution(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("no peer connection is open")]
    NotConnected,

    #[error("refusing to write an empty frame")]
    ZeroLengthWrite,

    #[error("frame of {0} bytes is too large for the transport")]
    FrameTooLarge(usize),

    #[error("peer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?} waiting for the peer")]
    Timeout(Duration),
}

impl PeerError {
    /// Whether the transport may be left mid-message, so that the next read
    /// would return a frame belonging to an earlier exchange.
    pub fn desyncs_stream(&self) -> bool {
        matches!(self, PeerError::Io(_) | PeerError::Timeout(_))
    }
}

impl From<NoiseError> for PeerError {
    fn from(err: NoiseError) -> Self {
        match err {
            NoiseError::Io(e) => PeerError::Io(e),
            NoiseError::MessageTooLarge(len) => PeerError::FrameTooLarge(len),
            other => PeerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                other,
            )),
        }
    }
}

/// Timeouts applied to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    /// Bound on TCP connect plus the handshake.
    pub handshake_timeout: Duration,
    /// Bound on each frame read, including the greeting.
    pub read_timeout: Duration,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self::from(&PeerConfig::default())
    }
}

impl From<&PeerConfig> for PeerSettings {
    fn from(config: &PeerConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            read_timeout: config.read_timeout(),
        }
    }
}

/// Where and whom to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub node_id: PublicKey,
    pub addr: SocketAddr,
    pub network: Network,
}

impl PeerAddress {
    /// Build a loopback address. Remote hosts are never accepted.
    pub fn loopback(node_id: PublicKey, port: u32, network: Network) -> Result<Self, PeerError> {
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                PeerError::AddressResolution(format!("port {port} is not a valid TCP port"))
            })?;
        Ok(Self {
            node_id,
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            network,
        })
    }

    pub fn node_id_hex(&self) -> String {
        hex::encode(self.node_id.serialize())
    }
}

/// A live encrypted connection. Closed connections reject reads and writes.
pub struct PeerConnection {
    address: PeerAddress,
    stream: Option<NoiseStream<TcpStream>>,
    read_timeout: Duration,
}

impl PeerConnection {
    /// Connect over TCP and run the initiator handshake, expecting the
    /// remote to prove ownership of `address.node_id`.
    pub async fn dial(
        local: &KeyPair,
        address: PeerAddress,
        settings: &PeerSettings,
    ) -> Result<Self, PeerError> {
        let attempt = async {
            let tcp = TcpStream::connect(address.addr).await?;
            tcp.set_nodelay(true)?;
            let stream = noise::initiate(tcp, local, &address.node_id)
                .await
                .map_err(|e| PeerError::Handshake(e.to_string()))?;
            Ok::<_, PeerError>(stream)
        };

        let stream = tokio::time::timeout(settings.handshake_timeout, attempt)
            .await
            .map_err(|_| {
                PeerError::Handshake(format!(
                    "no handshake completion within {:?}",
                    settings.handshake_timeout
                ))
            })??;

        info!(
            peer = %address.node_id_hex(),
            addr = %address.addr,
            network = %address.network,
            "Peer handshake complete"
        );

        Ok(Self {
            address,
            stream: Some(stream),
            read_timeout: settings.read_timeout,
        })
    }

    /// Write one whole frame.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), PeerError> {
        let stream = self.stream.as_mut().ok_or(PeerError::NotConnected)?;
        if frame.is_empty() {
            return Err(PeerError::ZeroLengthWrite);
        }
        match stream.write_message(frame).await? {
            0 => Err(PeerError::ZeroLengthWrite),
            written => {
                debug!(bytes = written, "Frame written");
                Ok(())
            }
        }
    }

    /// Wait for the next whole frame, bounded by the read timeout.
    ///
    /// `Ok(None)` means the peer closed the connection between frames.
    ///
    /// On `Timeout` the stream is unusable: a late reply would be read by the
    /// next call, and a read cut off mid-frame leaves the receive nonce out
    /// of step. Callers close the connection after either error.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, PeerError> {
        let timeout = self.read_timeout;
        let stream = self.stream.as_mut().ok_or(PeerError::NotConnected)?;
        let frame = tokio::time::timeout(timeout, stream.read_message())
            .await
            .map_err(|_| PeerError::Timeout(timeout))??;
        if let Some(bytes) = &frame {
            debug!(bytes = bytes.len(), "Frame read");
        }
        Ok(frame)
    }

    /// Close the connection. Calling this on a closed connection is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Error shutting down peer socket");
            }
            info!(peer = %self.address.node_id_hex(), "Peer connection closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }
}
