//! Stream codec for the control socket: a sequence of JSON values with no
//! length prefix or header. Replies are written as one JSON object followed
//! by a newline.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// Largest amount of input buffered while waiting for a value to complete.
pub const MAX_BUFFERED: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} bytes buffered without a complete JSON value")]
    TooLarge(usize),
}

#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_buffered: usize,
    scan: Scan,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::with_max_buffered(MAX_BUFFERED)
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            max_buffered,
            scan: Scan::default(),
        }
    }

    /// Numbers and literals have no closing delimiter; let serde find the end.
    fn decode_scalar(&self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        let (next, consumed) = {
            let mut values = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Value>();
            let next = values.next();
            (next, values.byte_offset())
        };

        match next {
            Some(Ok(value)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => self.incomplete(src),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn incomplete(&self, src: &BytesMut) -> Result<Option<Value>, CodecError> {
        if src.len() > self.max_buffered {
            Err(CodecError::TooLarge(src.len()))
        } else {
            Ok(None)
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress through the object, array or string at the front of the buffer.
/// Kept across `decode` calls so each buffered byte is examined once.
#[derive(Debug, Clone, Copy, Default)]
struct Scan {
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Continue scanning `buf` and return the length of the top-level value
    /// once its closing delimiter has been seen.
    fn find_end(&mut self, buf: &[u8]) -> Option<usize> {
        while let Some(&byte) = buf.get(self.offset) {
            self.offset += 1;
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        if self.scan.offset == 0 {
            match src.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(start) => src.advance(start),
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
            if !matches!(src[0], b'{' | b'[' | b'"') {
                return self.decode_scalar(src);
            }
        }

        match self.scan.find_end(&src[..]) {
            Some(end) => {
                self.scan = Scan::default();
                let value = serde_json::from_slice(&src[..end]);
                src.advance(end);
                Ok(Some(value?))
            }
            None => self.incomplete(src),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let encoded = serde_json::to_vec(&item)?;
        dst.reserve(encoded.len() + 1);
        dst.extend_from_slice(&encoded);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn decode_all(codec: &mut JsonCodec, buf: &mut BytesMut) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(v) = codec.decode(buf).unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_decodes_back_to_back_objects() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&br#"{"id":1,"method":"a"}{"id":2,"method":"b"}
 {"id":3}"#[..]);
        let values = decode_all(&mut codec, &mut buf);
        assert_eq!(
            values,
            vec![
                json!({"id": 1, "method": "a"}),
                json!({"id": 2, "method": "b"}),
                json!({"id": 3}),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_waits_for_split_object() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&br#"{"method":"se"#[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(br#"nd","params":{"msg":"00"}}"#);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(json!({"method": "send", "params": {"msg": "00"}}))
        );
    }

    #[test]
    fn test_whitespace_only_is_incomplete() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&b" \n\t"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&b"{\"method\": nope}"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_oversized_partial_value_is_rejected() {
        let mut codec = JsonCodec::with_max_buffered(16);
        let mut buf = BytesMut::from(&br#"{"msg":"0000000000000000000000"#[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::TooLarge(_))));
    }

    #[test]
    fn test_delimiters_inside_strings_do_not_end_value() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&br#"{"msg":"}]\"{"#[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(br#"[","id":[1,{"a":"\\"}]} {"id":2}"#);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(json!({"msg": "}]\"{[", "id": [1, {"a": "\\"}]}))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({"id": 2})));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_value_arriving_byte_by_byte() {
        let input = br#"  {"method":"send","params":{"msg":"0102"}}"#;
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in input {
            buf.extend_from_slice(&[*byte]);
            if let Some(value) = codec.decode(&mut buf).unwrap() {
                decoded.push(value);
            }
        }
        assert_eq!(
            decoded,
            vec![json!({"method": "send", "params": {"msg": "0102"}})]
        );
    }

    #[test]
    fn test_scalars_and_strings_at_top_level() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&br#""text" 42 "#[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!("text")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_unbalanced_close_is_a_syntax_error() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1]"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(json!({"ok": true}), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"ok\":true}\n");
    }
}
