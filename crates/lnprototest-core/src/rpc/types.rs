//! Request/response envelopes and method payloads for the control socket.
//!
//! These types are serialized as JSON over the Unix socket. Both the
//! dispatcher (daemon) and [`RpcClient`](super::RpcClient) use them.
//! Field names on the wire are camelCase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::identity::NodeIdError;
use crate::peer::PeerError;
use crate::proxy::ProxyError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Stable numeric error codes carried in error replies.
pub mod codes {
    pub const IO: i64 = -1;
    pub const TIMEOUT: i64 = -2;
    pub const NOT_CONNECTED: i64 = -3;
    pub const MALFORMED_HEX: i64 = -4;
    pub const KEY_FORMAT: i64 = -5;
    pub const ADDRESS_RESOLUTION: i64 = -6;
    pub const HANDSHAKE: i64 = -7;
    pub const ZERO_LENGTH_WRITE: i64 = -8;
    pub const EMPTY_REPLY: i64 = -9;
    pub const FRAME_TOO_LARGE: i64 = -10;

    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
}

/// A request envelope.
///
/// `jsonrpc` is optional on input. A request without an `id` member is a
/// notification and gets no reply; an explicit `"id": null` is a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Maps a present member to `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A reply envelope. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the result value or the error object.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Structured error object: a stable code plus the error's display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl fmt::Display) -> Self {
        Self::new(codes::PARSE_ERROR, format!("parse error: {detail}"))
    }

    pub fn invalid_request(detail: impl fmt::Display) -> Self {
        Self::new(codes::INVALID_REQUEST, format!("invalid request: {detail}"))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: codes::METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: Some(Value::String(method.to_string())),
        }
    }

    pub fn invalid_params(detail: impl fmt::Display) -> Self {
        Self::new(codes::INVALID_PARAMS, format!("invalid params: {detail}"))
    }
}

fn peer_code(err: &PeerError) -> i64 {
    match err {
        PeerError::AddressResolution(_) => codes::ADDRESS_RESOLUTION,
        PeerError::Handshake(_) => codes::HANDSHAKE,
        PeerError::NotConnected => codes::NOT_CONNECTED,
        PeerError::ZeroLengthWrite => codes::ZERO_LENGTH_WRITE,
        PeerError::FrameTooLarge(_) => codes::FRAME_TOO_LARGE,
        PeerError::Io(_) => codes::IO,
        PeerError::Timeout(_) => codes::TIMEOUT,
    }
}

impl From<ProxyError> for RpcError {
    fn from(err: ProxyError) -> Self {
        let code = match &err {
            ProxyError::NodeId(NodeIdError::MalformedHex(_)) => codes::MALFORMED_HEX,
            ProxyError::NodeId(NodeIdError::KeyFormat(_)) => codes::KEY_FORMAT,
            ProxyError::MalformedHex(_) => codes::MALFORMED_HEX,
            ProxyError::EmptyReply => codes::EMPTY_REPLY,
            ProxyError::Peer(peer) => peer_code(peer),
        };
        Self::new(code, err.to_string())
    }
}

/// Control methods understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Connect,
    Send,
    Receive,
    Disconnect,
    GetInfo,
    Stop,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Connect,
        Method::Send,
        Method::Receive,
        Method::Disconnect,
        Method::GetInfo,
        Method::Stop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::Send => "send",
            Method::Receive => "receive",
            Method::Disconnect => "disconnect",
            Method::GetInfo => "getinfo",
            Method::Stop => "stop",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| RpcError::method_not_found(s))
    }
}

// ── Method payloads ─────────────────────────────────────────────────────

/// `connect` parameters. Positional `[nodeId, port]` arrays decode too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(alias = "NodeId", alias = "node_id")]
    pub node_id: String,
    #[serde(alias = "Port")]
    pub port: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub node_id: String,
    pub port: u32,
    /// Hex of the greeting frame.
    pub msg: String,
}

/// `send` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendParams {
    #[serde(alias = "Msg")]
    pub msg: String,
}

/// Result of `send` and `receive`: one hex frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameResult {
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectResult {
    pub disconnected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub node_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInfoResult {
    pub version: String,
    pub git_hash: String,
    pub node_id: String,
    pub network: String,
    pub socket_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResult {
    pub acknowledged: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_without_id_is_notification() {
        let req: Request = serde_json::from_value(json!({"method": "send"})).unwrap();
        assert!(req.is_notification());
        assert_eq!(req.params, Value::Null);
        assert_eq!(req.jsonrpc, None);
    }

    #[test]
    fn test_request_with_null_id_is_not_notification() {
        let req: Request = serde_json::from_value(json!({"id": null, "method": "send"})).unwrap();
        assert_eq!(req.id, Some(Value::Null));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_request_serializes_version_and_id() {
        let req = Request::new("lnprototest/1", "getinfo", Value::Null);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"jsonrpc": "2.0", "id": "lnprototest/1", "method": "getinfo"})
        );
    }

    #[test]
    fn test_response_shapes() {
        let ok = Response::success(json!(7), json!({"msg": "00"}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 7, "result": {"msg": "00"}})
        );

        let err = Response::failure(json!("a"), RpcError::new(codes::NOT_CONNECTED, "no"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"jsonrpc": "2.0", "id": "a", "error": {"code": -3, "message": "no"}})
        );
        assert_eq!(err.into_result().unwrap_err().code, -3);
    }

    #[test]
    fn test_connect_params_accept_aliases_and_arrays() {
        let node = "02".repeat(33);
        for params in [
            json!({"nodeId": node, "port": 9735}),
            json!({"NodeId": node, "Port": 9735}),
            json!({"node_id": node, "port": 9735}),
            json!([node, 9735]),
        ] {
            let parsed: ConnectParams = serde_json::from_value(params).unwrap();
            assert_eq!(parsed.port, 9735);
            assert_eq!(parsed.node_id, node);
        }
    }

    #[test]
    fn test_connect_params_reject_wrong_types() {
        assert!(serde_json::from_value::<ConnectParams>(json!({"nodeId": "02"})).is_err());
        assert!(
            serde_json::from_value::<ConnectParams>(json!({"nodeId": "02", "port": "x"})).is_err()
        );
        assert!(
            serde_json::from_value::<ConnectParams>(json!({"nodeId": "02", "port": -1})).is_err()
        );
    }

    #[test]
    fn test_send_params_alias() {
        let p: SendParams = serde_json::from_value(json!({"Msg": "0010"})).unwrap();
        assert_eq!(p.msg, "0010");
    }

    #[test]
    fn test_connect_result_is_camel_case() {
        let r = ConnectResult {
            node_id: "02ab".into(),
            port: 1,
            msg: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"nodeId": "02ab", "port": 1, "msg": ""})
        );
    }

    #[test]
    fn test_method_lookup() {
        assert_eq!("getinfo".parse::<Method>().unwrap(), Method::GetInfo);
        for m in Method::ALL {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), m);
        }
        let err = "listpeers".parse::<Method>().unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_proxy_errors_map_to_stable_codes() {
        let cases: Vec<(ProxyError, i64)> = vec![
            (ProxyError::EmptyReply, -9),
            (PeerError::NotConnected.into(), -3),
            (PeerError::ZeroLengthWrite.into(), -8),
            (PeerError::FrameTooLarge(70_000).into(), -10),
            (PeerError::Handshake("x".into()).into(), -7),
            (PeerError::AddressResolution("x".into()).into(), -6),
            (
                PeerError::Timeout(std::time::Duration::from_secs(1)).into(),
                -2,
            ),
            (
                PeerError::Io(std::io::Error::other("boom")).into(),
                -1,
            ),
            (hex::decode("zz").unwrap_err().into(), -4),
            (
                ProxyError::NodeId(crate::identity::parse_node_id("0").unwrap_err()),
                -4,
            ),
            (
                ProxyError::NodeId(crate::identity::parse_node_id("0011").unwrap_err()),
                -5,
            ),
        ];
        for (err, code) in cases {
            let message = err.to_string();
            let rpc = RpcError::from(err);
            assert_eq!(rpc.code, code, "{message}");
            assert_eq!(rpc.message, message);
        }
    }
}
