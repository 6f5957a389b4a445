use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::batch::{Batch, Entry};
use crate::config::Config;
use crate::encoder;
use crate::flush_policy::FlushPolicy;
use crate::labels::format_labels;
use crate::transport::{Push, SendError};

/// Messages from producers to the batch worker.
#[derive(Debug)]
pub(crate) enum Command {
    Push(Entry),
    Flush(oneshot::Sender<Result<(), SendError>>),
}

/// Sole owner of the in-memory batch.
///
/// Producers only ever talk to it through the command channel, so the batch
/// and the flush timer need no locking. Delivery runs inline: a slow
/// endpoint delays the processing of queued commands by at most the
/// transport deadline.
pub(crate) struct BatchWorker<P> {
    batch: Batch,
    policy: FlushPolicy,
    labels: String,
    transport: P,
    rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

impl<P: Push> BatchWorker<P> {
    /// Must be called from within a tokio runtime (the flush timer starts here).
    pub(crate) fn new(
        config: &Config,
        transport: P,
        rx: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            batch: Batch::with_capacity(config.max_batch_count),
            policy: FlushPolicy::new(config.max_batch_age, config.max_batch_count),
            labels: format_labels(&config.labels),
            transport,
            rx,
            cancel,
        }
    }

    /// Process commands until cancelled or every sender is gone, then drain
    /// what is still queued and flush one last time.
    pub(crate) async fn run(mut self) {
        debug!(
            labels = %self.labels,
            max_batch_count = self.policy.max_count(),
            max_batch_age_ms = u64::try_from(self.policy.max_age().as_millis()).unwrap_or(u64::MAX),
            "batch worker started"
        );

        while let ControlFlow::Continue(()) = self.tick().await {}

        self.drain().await;
        debug!("batch worker stopped");
    }

    /// Run one step: a command, a timer expiry, or the shutdown signal,
    /// whichever comes first.
    async fn tick(&mut self) -> ControlFlow<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return ControlFlow::Break(()),
            cmd = self.rx.recv() => match cmd {
                Some(cmd) => self.handle(cmd).await,
                None => return ControlFlow::Break(()),
            },
            _ = self.policy.next_tick() => {
                if !self.batch.is_empty() {
                    debug!(entries = self.batch.len(), "max batch age reached");
                }
                let _ = self.flush().await;
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Push(entry) => {
                self.batch.push(entry);
                if self.policy.is_full(self.batch.len()) {
                    let _ = self.flush().await;
                }
            }
            Command::Flush(ack) => {
                let result = self.flush().await;
                let _ = ack.send(result);
            }
        }
    }

    /// Close the channel to new sends, process whatever was already
    /// accepted, then flush the remainder.
    async fn drain(&mut self) {
        self.rx.close();
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd).await;
        }
        let _ = self.flush().await;
    }

    /// Encode and send the current batch. No-op when empty.
    ///
    /// The batch is gone afterwards whether or not delivery succeeded.
    async fn flush(&mut self) -> Result<(), SendError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        self.policy.record_flush();
        let entries = self.batch.take();

        let result = self.deliver(&entries).await;
        match &result {
            Ok(()) => debug!(entries = entries.len(), "batch sent"),
            Err(e) => error!(error = %e, entries = entries.len(), "failed to send batch"),
        }
        result
    }

    async fn deliver(&self, entries: &[Entry]) -> Result<(), SendError> {
        let payload = encoder::encode_batch(entries, &self.labels)?;
        self.transport.push(payload).await
    }
}
