use bytes::Bytes;
use prost::Message;
use thiserror::Error;

use crate::batch::Entry;
use crate::proto::{EntryAdapter, PushRequest, StreamAdapter};
use crate::transport::SendError;

/// Build the push request for one batch: every entry goes into a single
/// stream identified by `labels`.
pub fn push_request(entries: &[Entry], labels: &str) -> PushRequest {
    let entries = entries
        .iter()
        .map(|e| EntryAdapter {
            timestamp: Some(e.timestamp.into()),
            line: e.line.clone(),
        })
        .collect();

    PushRequest {
        streams: vec![StreamAdapter {
            labels: labels.to_owned(),
            entries,
            hash: 0,
        }],
    }
}

/// Serialize and snappy-compress (raw block format) a batch.
pub fn encode_batch(entries: &[Entry], labels: &str) -> Result<Bytes, SendError> {
    let req = push_request(entries, labels);

    let mut buf = Vec::with_capacity(req.encoded_len());
    req.encode(&mut buf)?;

    let compressed = snap::raw::Encoder::new().compress_vec(&buf)?;
    Ok(Bytes::from(compressed))
}

/// Inverse of [`encode_batch`].
pub fn decode_push_request(payload: &[u8]) -> Result<PushRequest, DecodeError> {
    let raw = snap::raw::Decoder::new().decompress_vec(payload)?;
    Ok(PushRequest::decode(raw.as_slice())?)
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("snappy decompression failed: {0}")]
    Snappy(#[from] snap::Error),

    #[error("protobuf decode failed: {0}")]
    Protobuf(#[from] prost::DecodeError),
}
