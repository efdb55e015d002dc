//! Fuzz target for the control socket stream codec and request decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_rpc_codec
//!
//! Splits the input at an arbitrary point to exercise partial reads, then
//! decodes every complete value as a request envelope.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use lnprototest_core::rpc::{JsonCodec, Request};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let split = data[0] as usize % data.len();
    let (head, tail) = data[1..].split_at(split.min(data.len() - 1));

    let mut codec = JsonCodec::with_max_buffered(64 * 1024);
    let mut buf = BytesMut::from(head);
    for chunk in [None, Some(tail)] {
        if let Some(chunk) = chunk {
            buf.extend_from_slice(chunk);
        }
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(value)) => {
                    let _ = serde_json::from_value::<Request>(value);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
