//! Generated Loki push types (`proto/logproto/push.proto`).

#![allow(clippy::doc_markdown)]

include!(concat!(env!("OUT_DIR"), "/logproto.rs"));
