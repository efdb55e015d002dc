//! In-process Lightning peer for tests.
//!
//! A [`MockPeer`] listens on an ephemeral loopback port, completes the BOLT 8
//! responder handshake with its own key, optionally sends a greeting frame,
//! and then answers every frame according to a scripted [`Behavior`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use lnprototest_core::KeyPair;
use lnprototest_core::noise;

/// A minimal BOLT 1 `init` message: type 16, empty global and local features.
pub const INIT_GREETING: [u8; 6] = [0x00, 0x10, 0x00, 0x00, 0x00, 0x00];

/// How the peer answers each frame it receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Reply with the same bytes.
    Echo,
    /// Reply with the bytes in reverse order.
    Reverse,
    /// Reply with the prefix followed by the received bytes.
    TagEcho(Vec<u8>),
    /// Never reply.
    Silent,
    /// Reply with a zero-length frame.
    EmptyReply,
    /// Close the connection instead of replying.
    Close,
    /// Echo each frame after the given delay.
    Late(Duration),
}

impl Behavior {
    fn reply(&self, frame: &[u8]) -> Option<Vec<u8>> {
        match self {
            Behavior::Echo | Behavior::Late(_) => Some(frame.to_vec()),
            Behavior::Reverse => Some(frame.iter().rev().copied().collect()),
            Behavior::TagEcho(tag) => Some([tag.as_slice(), frame].concat()),
            Behavior::EmptyReply => Some(Vec::new()),
            Behavior::Silent | Behavior::Close => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicUsize,
    closed: AtomicUsize,
    frames: AtomicUsize,
}

/// Builder for [`MockPeer`].
pub struct MockPeerBuilder {
    greeting: Option<Vec<u8>>,
    behavior: Behavior,
}

impl MockPeerBuilder {
    /// Frame sent right after the handshake. `None` sends nothing.
    pub fn greeting(mut self, greeting: Option<&[u8]>) -> Self {
        self.greeting = greeting.map(<[u8]>::to_vec);
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Bind `127.0.0.1:0` and start accepting connections.
    pub async fn spawn(self) -> MockPeer {
        let key = Arc::new(KeyPair::generate().expect("mock peer key"));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock peer");
        let port = listener.local_addr().expect("mock peer addr").port();
        let node_id = key.node_id();
        let counters = Arc::new(Counters::default());

        let task = {
            let key = Arc::clone(&key);
            let counters = Arc::clone(&counters);
            let greeting = self.greeting;
            let behavior = self.behavior;
            tokio::spawn(async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    tokio::spawn(serve_connection(
                        tcp,
                        Arc::clone(&key),
                        greeting.clone(),
                        behavior.clone(),
                        Arc::clone(&counters),
                    ));
                }
            })
        };

        MockPeer {
            port,
            node_id,
            counters,
            task,
        }
    }
}

async fn serve_connection(
    tcp: TcpStream,
    key: Arc<KeyPair>,
    greeting: Option<Vec<u8>>,
    behavior: Behavior,
    counters: Arc<Counters>,
) {
    let mut stream = match noise::accept(tcp, &key).await {
        Ok((stream, remote)) => {
            debug!(remote = %hex::encode(remote.serialize()), "Mock peer handshake complete");
            stream
        }
        Err(e) => {
            debug!(error = %e, "Mock peer handshake failed");
            return;
        }
    };
    counters.accepted.fetch_add(1, Ordering::SeqCst);

    if let Some(greeting) = &greeting {
        if stream.write_message(greeting).await.is_err() {
            counters.closed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    }

    while let Ok(Some(frame)) = stream.read_message().await {
        counters.frames.fetch_add(1, Ordering::SeqCst);
        if behavior == Behavior::Close {
            break;
        }
        if let Behavior::Late(delay) = &behavior {
            tokio::time::sleep(*delay).await;
        }
        if let Some(reply) = behavior.reply(&frame) {
            if stream.write_message(&reply).await.is_err() {
                break;
            }
        }
    }

    let _ = stream.shutdown().await;
    counters.closed.fetch_add(1, Ordering::SeqCst);
}

/// A running mock peer. The accept loop stops when this is dropped.
pub struct MockPeer {
    port: u16,
    node_id: String,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl MockPeer {
    /// A peer that greets with [`INIT_GREETING`] and echoes.
    pub fn builder() -> MockPeerBuilder {
        MockPeerBuilder {
            greeting: Some(INIT_GREETING.to_vec()),
            behavior: Behavior::Echo,
        }
    }

    /// Shorthand for `builder().behavior(behavior).spawn()`.
    pub async fn start(behavior: Behavior) -> Self {
        Self::builder().behavior(behavior).spawn().await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hex node id of this peer's static key.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Connections that completed the handshake.
    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Handshaken connections that have since ended.
    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Frames received across all connections.
    pub fn frames_received(&self) -> usize {
        self.counters.frames.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` connections have ended. Returns whether that
    /// happened within `timeout`.
    pub async fn wait_closed(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.closed() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
