use std::io;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::batch::Entry;
use crate::config::{Config, ConfigError, Output};
use crate::layer::LokiLayer;
use crate::transport::{HttpTransport, Push, SendError};
use crate::worker::{BatchWorker, Command};
use crate::writer::LokiWriter;

/// Errors a producer sees synchronously. Delivery failures never show up
/// here.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("invalid json written")]
    InvalidJson,

    #[error("batch queue is full")]
    Full,

    #[error("batch worker has shut down")]
    Closed,
}

impl From<SubmitError> for io::Error {
    fn from(e: SubmitError) -> Self {
        let kind = match e {
            SubmitError::InvalidJson => io::ErrorKind::InvalidData,
            SubmitError::Full => io::ErrorKind::WouldBlock,
            SubmitError::Closed => io::ErrorKind::BrokenPipe,
        };
        io::Error::new(kind, e)
    }
}

/// Cloneable producer side of a running [`Shipper`].
#[derive(Debug, Clone)]
pub struct LokiHandle {
    tx: mpsc::Sender<Command>,
}

impl LokiHandle {
    /// Enqueue an entry, waiting for channel capacity if the worker is behind.
    pub async fn submit(&self, entry: Entry) -> Result<(), SubmitError> {
        self.tx
            .send(Command::Push(entry))
            .await
            .map_err(|_| SubmitError::Closed)
    }

    /// Enqueue an entry without waiting.
    pub fn try_submit(&self, entry: Entry) -> Result<(), SubmitError> {
        self.tx.try_send(Command::Push(entry)).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Enqueue from synchronous code.
    ///
    /// Outside a tokio runtime this blocks until the channel has room. On a
    /// runtime thread blocking could stall the worker itself, so a full
    /// channel is reported as [`SubmitError::Full`] instead.
    pub fn submit_blocking(&self, entry: Entry) -> Result<(), SubmitError> {
        if Handle::try_current().is_ok() {
            return self.try_submit(entry);
        }
        self.tx
            .blocking_send(Command::Push(entry))
            .map_err(|_| SubmitError::Closed)
    }

    /// Deliver whatever is buffered now and wait for the outcome.
    pub async fn flush(&self) -> Result<(), SendError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .await
            .map_err(|_| SendError::Closed)?;
        done.await.map_err(|_| SendError::Closed)?
    }
}

/// Owns the batch worker for one destination.
///
/// Dropping a `Shipper` without calling [`Shipper::close`] leaves the worker
/// running until every [`LokiHandle`] is gone; it still flushes on exit.
pub struct Shipper {
    handle: LokiHandle,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    check_json: bool,
    output: Option<Output>,
}

impl Shipper {
    /// Start a worker that pushes to `config.endpoint` over HTTP.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: Config) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(config.endpoint.clone())?;
        Ok(Self::with_transport(config, transport))
    }

    /// Start a worker that delivers through `transport`.
    pub fn with_transport<P>(config: Config, transport: P) -> Self
    where
        P: Push + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let cancel = CancellationToken::new();
        let worker = BatchWorker::new(&config, transport, rx, cancel.clone());

        Self {
            handle: LokiHandle { tx },
            cancel,
            worker: tokio::spawn(worker.run()),
            check_json: config.check_json,
            output: config.output,
        }
    }

    pub fn handle(&self) -> LokiHandle {
        self.handle.clone()
    }

    /// Byte-stream entry point, honouring `check_json` and the secondary output.
    pub fn writer(&self) -> LokiWriter {
        LokiWriter::new(self.handle(), self.check_json, self.output.clone())
    }

    /// `tracing` layer that ships every event as a JSON line.
    pub fn layer(&self) -> LokiLayer {
        LokiLayer::new(self.handle())
    }

    pub async fn flush(&self) -> Result<(), SendError> {
        self.handle.flush().await
    }

    /// Stop accepting entries, flush what is buffered, and wait for the
    /// worker to exit.
    ///
    /// Submissions racing with `close` may be rejected with
    /// [`SubmitError::Closed`]; sequence shutdown after the last producer.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.worker.await {
            error!(error = %e, "batch worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{RecordingTransport, test_config};

    #[tokio::test]
    async fn close_flushes_buffered_entries() {
        let transport = RecordingTransport::default();
        let shipper = Shipper::with_transport(
            test_config(5, Duration::from_secs(30)),
            transport.clone(),
        );
        let handle = shipper.handle();

        handle.submit(Entry::now("a")).await.unwrap();
        handle.submit(Entry::now("b")).await.unwrap();
        shipper.close().await;

        assert_eq!(transport.batches(), [vec!["a".to_owned(), "b".to_owned()]]);
        assert_eq!(
            handle.submit(Entry::now("c")).await,
            Err(SubmitError::Closed)
        );
    }

    #[tokio::test]
    async fn flush_delivers_immediately() {
        let transport = RecordingTransport::default();
        let shipper = Shipper::with_transport(
            test_config(100, Duration::from_secs(30)),
            transport.clone(),
        );

        shipper.handle().submit(Entry::now("x")).await.unwrap();
        shipper.flush().await.unwrap();
        assert_eq!(transport.total_entries(), 1);

        shipper.close().await;
        assert_eq!(transport.batches().len(), 1, "nothing left for the final flush");
    }

    #[tokio::test]
    async fn longest_accepted_batch_age_starts_cleanly() {
        let transport = RecordingTransport::default();
        let config = test_config(5, crate::config::MAX_BATCH_AGE);
        let shipper = Shipper::with_transport(config, transport.clone());

        shipper.handle().submit(Entry::now("a")).await.unwrap();
        shipper.flush().await.unwrap();
        shipper.close().await;
        assert_eq!(transport.total_entries(), 1);
    }

    #[tokio::test]
    async fn flush_after_close_reports_closed() {
        let shipper = Shipper::with_transport(
            test_config(5, Duration::from_secs(30)),
            RecordingTransport::default(),
        );
        let handle = shipper.handle();
        shipper.close().await;

        assert!(matches!(handle.flush().await, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn try_submit_reports_full_queue() {
        let config = Config::builder("http://127.0.0.1:3100")
            .label("app", "test")
            .queue_capacity(1)
            .build()
            .unwrap();
        let (tx, _rx) = mpsc::channel(config.queue_capacity);
        let handle = LokiHandle { tx };

        handle.try_submit(Entry::now("a")).unwrap();
        assert_eq!(handle.try_submit(Entry::now("b")), Err(SubmitError::Full));
    }

    #[tokio::test]
    async fn submit_blocking_never_blocks_a_runtime_thread() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = LokiHandle { tx };

        handle.submit_blocking(Entry::now("a")).unwrap();
        assert_eq!(
            handle.submit_blocking(Entry::now("b")),
            Err(SubmitError::Full)
        );
    }

    #[test]
    fn submit_blocking_waits_for_capacity_off_runtime() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = LokiHandle { tx };

        handle.submit_blocking(Entry::now("a")).unwrap();
        let consumer = std::thread::spawn(move || {
            let mut lines = Vec::new();
            while let Some(Command::Push(entry)) = rx.blocking_recv() {
                lines.push(entry.line);
            }
            lines
        });
        handle.submit_blocking(Entry::now("b")).unwrap();
        drop(handle);

        assert_eq!(consumer.join().unwrap(), ["a", "b"]);
    }

    #[test]
    fn submit_errors_map_to_io_kinds() {
        let err: io::Error = SubmitError::InvalidJson.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(
            err.get_ref().and_then(|e| e.downcast_ref::<SubmitError>()),
            Some(&SubmitError::InvalidJson)
        );
        assert_eq!(
            io::Error::from(SubmitError::Full).kind(),
            io::ErrorKind::WouldBlock
        );
    }
}
