//! Control socket: a JSON-RPC style request/response protocol over a Unix
//! domain socket, used by the test harness and the CLI to drive the proxy.
//!
//! ```text
//! ┌──────────┐        Unix socket        ┌──────────────┐
//! │ harness  │──────────────────────────▶│  Dispatcher  │
//! │   CLI    │  JSON request / reply     │  (sessions)  │
//! └──────────┘                           └──────┬───────┘
//!                                               │
//!                                        ┌──────▼───────┐    BOLT 8
//!                                        │    Proxy     │─────────────▶ peer
//!                                        └──────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod server;
pub mod types;

pub use client::{RpcClient, RpcClientError};
pub use codec::{CodecError, JsonCodec};
pub use server::{Dispatcher, SOCKET_FILE_NAME, socket_path_from_config};
pub use types::*;
