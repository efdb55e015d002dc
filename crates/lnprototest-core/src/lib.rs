#![deny(unsafe_code)]

//! lnprototest core: the test-control proxy daemon.
//!
//! The daemon owns one encrypted BOLT 8 connection to a Lightning node and
//! lets a test harness drive it over a local Unix socket. Frames are passed
//! through as opaque hex; no Lightning message semantics are implemented.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Daemon startup, control socket lifetime and shutdown.
pub mod daemon;
/// Local node key pair and node id parsing.
pub mod identity;
/// Tracing subscriber setup.
pub mod logging;
/// BOLT 8 Noise_XK transport.
pub mod noise;
/// A single encrypted peer connection.
pub mod peer;
/// The shared connection slot that serializes harness requests.
pub mod proxy;
/// Control socket protocol, server and client.
pub mod rpc;

pub use daemon::{Daemon, DaemonError};
pub use identity::KeyPair;
pub use peer::{PeerAddress, PeerConnection, PeerError, PeerSettings};
pub use proxy::{ConnectionProxy, ProxyError};
pub use rpc::{RpcClient, RpcClientError};
