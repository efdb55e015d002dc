//! End-to-end tests: a real daemon on a temp control socket, driven over
//! RPC against mock peers.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use lnprototest_core::rpc::codes;
use lnprototest_core::{Daemon, KeyPair, RpcClient, RpcClientError};
use lnprototest_test_utils::mock_peer::INIT_GREETING;
use lnprototest_test_utils::{Behavior, MockPeer, TestConfigBuilder, TestDaemon};

fn rpc_code(err: RpcClientError) -> i64 {
    match err {
        RpcClientError::Rpc(e) => e.code,
        other => panic!("expected an RPC error, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_connect_returns_peer_greeting() {
    let peer = MockPeer::start(Behavior::Echo).await;
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let result = client
        .connect_peer(peer.node_id(), peer.port().into())
        .await
        .unwrap();
    assert_eq!(result.msg, hex::encode(INIT_GREETING));
    assert_eq!(result.node_id, peer.node_id());
    assert_eq!(result.port, u32::from(peer.port()));

    daemon.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_send_hello_to_reversing_peer() {
    let peer = MockPeer::start(Behavior::Reverse).await;
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    client
        .connect_peer(peer.node_id(), peer.port().into())
        .await
        .unwrap();
    let reply = client.send("48656c6c6f").await.unwrap();
    assert_eq!(reply.msg, "6f6c6c6548");
}

#[test_log::test(tokio::test)]
async fn test_send_before_connect_is_not_connected() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;
    let err = client.send("48656c6c6f").await.unwrap_err();
    assert_eq!(rpc_code(err), codes::NOT_CONNECTED);
}

#[test_log::test(tokio::test)]
async fn test_error_codes_for_bad_input() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let err = client.connect_peer("zz", 9735).await.unwrap_err();
    assert_eq!(rpc_code(err), codes::MALFORMED_HEX);

    let err = client.connect_peer(&"11".repeat(33), 9735).await.unwrap_err();
    assert_eq!(rpc_code(err), codes::KEY_FORMAT);

    let valid = KeyPair::generate().unwrap().node_id();
    let err = client.connect_peer(&valid, 0).await.unwrap_err();
    assert_eq!(rpc_code(err), codes::ADDRESS_RESOLUTION);

    let err = client.send("xyz").await.unwrap_err();
    assert_eq!(rpc_code(err), codes::MALFORMED_HEX);
}

#[test_log::test(tokio::test)]
async fn test_bad_params_and_unknown_method_keep_session_open() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    let err = client
        .call_raw("connect", json!({"nodeId": 42}))
        .await
        .unwrap_err();
    assert_eq!(rpc_code(err), codes::INVALID_PARAMS);

    let err = client.call_raw("send", Value::Null).await.unwrap_err();
    assert_eq!(rpc_code(err), codes::INVALID_PARAMS);

    let err = client.call_raw("fundchannel", Value::Null).await.unwrap_err();
    assert_eq!(rpc_code(err), codes::METHOD_NOT_FOUND);

    // Same session still answers.
    let info = client.getinfo().await.unwrap();
    assert_eq!(info.network, "regtest");
}

#[test_log::test(tokio::test)]
async fn test_notifications_get_no_reply() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    client.notify("getinfo", Value::Null).await.unwrap();
    client.notify("nosuchmethod", Value::Null).await.unwrap();
    // A stray reply would be read here and fail the id check.
    client.getinfo().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_silent_and_empty_peers_fail_send() {
    let silent = MockPeer::start(Behavior::Silent).await;
    let empty = MockPeer::start(Behavior::EmptyReply).await;
    let daemon =
        TestDaemon::with_builder(TestConfigBuilder::new().read_timeout_ms(200)).await;
    let mut client = daemon.client().await;

    client
        .connect_peer(silent.node_id(), silent.port().into())
        .await
        .unwrap();
    let err = client.send("0010").await.unwrap_err();
    assert_eq!(rpc_code(err), codes::TIMEOUT);

    client
        .connect_peer(empty.node_id(), empty.port().into())
        .await
        .unwrap();
    let err = client.send("0010").await.unwrap_err();
    assert_eq!(rpc_code(err), codes::EMPTY_REPLY);
}

#[test_log::test(tokio::test)]
async fn test_reconnect_holds_only_latest_connection() {
    let first = MockPeer::start(Behavior::Echo).await;
    let second = MockPeer::start(Behavior::Echo).await;
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client().await;

    client
        .connect_peer(first.node_id(), first.port().into())
        .await
        .unwrap();
    client
        .connect_peer(second.node_id(), second.port().into())
        .await
        .unwrap();

    assert!(first.wait_closed(1, Duration::from_secs(2)).await);
    let info = client.getinfo().await.unwrap();
    assert_eq!(info.peer.unwrap().node_id, second.node_id());

    assert!(client.disconnect().await.unwrap().disconnected);
    assert!(second.wait_closed(1, Duration::from_secs(2)).await);
    assert_eq!(client.getinfo().await.unwrap().peer, None);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_sessions_get_their_own_replies() {
    const SESSIONS: usize = 8;
    const ROUNDS: usize = 10;

    let peer = MockPeer::start(Behavior::TagEcho(b"re:".to_vec())).await;
    let daemon = TestDaemon::start().await;
    daemon
        .client()
        .await
        .connect_peer(peer.node_id(), peer.port().into())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for session in 0..SESSIONS {
        let mut client = daemon.client().await;
        tasks.push(tokio::spawn(async move {
            for round in 0..ROUNDS {
                let frame = format!("session-{session}-round-{round}").into_bytes();
                let reply = client.send(&hex::encode(&frame)).await.unwrap();
                let expected = [b"re:".as_slice(), &frame].concat();
                assert_eq!(reply.msg, hex::encode(expected));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(peer.frames_received(), SESSIONS * ROUNDS);
}

#[test_log::test(tokio::test)]
async fn test_harness_style_request_without_version() {
    let peer = MockPeer::start(Behavior::Echo).await;
    let daemon = TestDaemon::start().await;

    let stream = UnixStream::connect(daemon.socket_path()).await.unwrap();
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let request = json!({
        "id": 0,
        "method": "connect",
        "params": {"NodeId": peer.node_id(), "Port": peer.port()},
    });
    wr.write_all(request.to_string().as_bytes()).await.unwrap();

    let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["jsonrpc"], json!("2.0"));
    assert_eq!(reply["id"], json!(0));
    assert_eq!(reply["result"]["msg"], json!(hex::encode(INIT_GREETING)));
    assert_eq!(reply["result"]["nodeId"], json!(peer.node_id()));
}

#[test_log::test(tokio::test)]
async fn test_stop_over_rpc_removes_socket() {
    let daemon = TestDaemon::start().await;
    let socket = daemon.socket_path().to_path_buf();
    let mut client = daemon.client().await;

    let stop = client.stop().await.unwrap();
    assert!(stop.acknowledged);

    daemon.join().await.unwrap();
    assert!(!socket.exists());
}

#[test_log::test(tokio::test)]
async fn test_stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let stale = dir.path().join("lnprototest.sock");
    // A listener dropped without cleanup leaves its socket file behind.
    drop(std::os::unix::net::UnixListener::bind(&stale).unwrap());

    let config = TestConfigBuilder::new().data_dir(dir.path()).build();
    let daemon = std::sync::Arc::new(Daemon::new(config).unwrap());
    let runner = {
        let daemon = std::sync::Arc::clone(&daemon);
        tokio::spawn(async move { daemon.run().await })
    };

    let mut client = None;
    for _ in 0..200 {
        if let Ok(c) = RpcClient::connect(&stale).await {
            client = Some(c);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut client = client.expect("daemon never accepted on the replaced socket");
    assert_eq!(
        client.getinfo().await.unwrap().socket_path,
        stale.display().to_string()
    );

    client.stop().await.unwrap();
    runner.await.unwrap().unwrap();
    assert!(!stale.exists());
}

#[test_log::test(tokio::test)]
async fn test_regular_file_at_socket_path_is_not_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let occupied = dir.path().join("lnprototest.sock");
    std::fs::write(&occupied, b"not a socket").unwrap();

    let config = TestConfigBuilder::new().data_dir(dir.path()).build();
    let daemon = Daemon::new(config).unwrap();
    assert!(matches!(
        daemon.run().await,
        Err(lnprototest_core::DaemonError::Bind { .. })
    ));
    assert_eq!(std::fs::read(&occupied).unwrap(), b"not a socket");
}
