use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::Config;
use crate::encoder::decode_push_request;
use crate::proto::PushRequest;
use crate::transport::{Push, SendError};

/// Decodes every payload and keeps the push requests in arrival order.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub requests: Arc<Mutex<Vec<PushRequest>>>,
}

impl RecordingTransport {
    /// Lines of each received batch, one inner vec per push.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|req| {
                req.streams
                    .iter()
                    .flat_map(|s| s.entries.iter().map(|e| e.line.clone()))
                    .collect()
            })
            .collect()
    }

    pub fn total_entries(&self) -> usize {
        self.batches().iter().map(Vec::len).sum()
    }
}

impl Push for RecordingTransport {
    async fn push(&self, payload: Bytes) -> Result<(), SendError> {
        let req = decode_push_request(&payload).expect("payload must decode");
        self.requests.lock().unwrap().push(req);
        Ok(())
    }
}

/// Rejects every push with a fixed status and counts the attempts.
#[derive(Clone)]
pub struct FailingTransport {
    pub status: StatusCode,
    pub attempts: Arc<AtomicUsize>,
}

impl FailingTransport {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Push for FailingTransport {
    async fn push(&self, _payload: Bytes) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SendError::Rejected {
            status: self.status,
            body: "simulated failure".into(),
        })
    }
}

/// Records like `RecordingTransport`, but only after `delay`.
#[derive(Clone, Default)]
pub struct SlowTransport {
    pub delay: Duration,
    pub inner: RecordingTransport,
}

impl Push for SlowTransport {
    async fn push(&self, payload: Bytes) -> Result<(), SendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.push(payload).await
    }
}

/// In-memory sink for formatted tracing output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Scoped subscriber that writes plain-text events here.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + use<> {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Shared in-memory `Write` target, e.g. for a secondary output.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn test_config(max_batch_count: usize, max_batch_age: Duration) -> Config {
    Config::builder("http://127.0.0.1:3100")
        .label("app", "test")
        .max_batch_count(max_batch_count)
        .max_batch_age(max_batch_age)
        .check_json(false)
        .build()
        .unwrap()
}
