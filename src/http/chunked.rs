//! Chunked range-scan encoder: `key '\n' value` per record, streamed off
//! a blocking thread so the synchronous engine never runs on the
//! `tokio` reactor.

use std::io;

use axum::body::{Body, Bytes};
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::Engine;

const CHANNEL_CAPACITY: usize = 32;

fn encode_record(key: &[u8], value: &[u8]) -> Bytes {
    let mut record = Vec::with_capacity(key.len() + 1 + value.len());
    record.extend_from_slice(key);
    record.push(b'\n');
    record.extend_from_slice(value);
    Bytes::from(record)
}

/// Streams every fresh `(key, value)` pair with `start <= key < end`
/// (`end` unbounded if `None`) as an HTTP chunked body.
pub fn range_body(engine: Engine, start: Vec<u8>, end: Option<Vec<u8>>) -> Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<io::Result<Bytes>>(CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let scan = match engine.range_scan(&start) {
            Ok(scan) => scan,
            Err(e) => {
                let _ = tx.blocking_send(Err(io::Error::other(e.to_string())));
                return;
            }
        };

        for item in scan {
            let (key, value) = match item {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = tx.blocking_send(Err(io::Error::other(e.to_string())));
                    break;
                }
            };
            if let Some(end) = &end {
                if key.as_slice() >= end.as_slice() {
                    break;
                }
            }
            if tx.blocking_send(Ok(encode_record(&key, &value))).is_err() {
                break;
            }
        }
    });

    Body::from_stream(ReceiverStream::new(rx))
}
