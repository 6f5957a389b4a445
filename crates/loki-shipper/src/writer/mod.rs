use std::io;

use serde::de::IgnoredAny;
use tracing_subscriber::fmt::MakeWriter;

use crate::batch::Entry;
use crate::config::Output;
use crate::shipper::{LokiHandle, SubmitError};

/// Byte-stream entry point. Each write becomes one log entry.
///
/// Plugs into `tracing_subscriber::fmt().json().with_writer(..)` or any
/// other formatter that emits one record per write.
#[derive(Debug, Clone)]
pub struct LokiWriter {
    handle: LokiHandle,
    check_json: bool,
    output: Option<Output>,
}

impl LokiWriter {
    pub fn new(handle: LokiHandle, check_json: bool, output: Option<Output>) -> Self {
        Self {
            handle,
            check_json,
            output,
        }
    }

    /// Async form of [`io::Write::write`]: waits for queue capacity instead
    /// of failing when the worker is behind.
    pub async fn write_line(&self, buf: &[u8]) -> io::Result<usize> {
        let entry = self.accept(buf)?;
        self.handle.submit(entry).await?;
        self.mirror(buf)
    }

    fn accept(&self, buf: &[u8]) -> Result<Entry, SubmitError> {
        if self.check_json && !is_valid_json(buf) {
            return Err(SubmitError::InvalidJson);
        }
        Ok(Entry::now(String::from_utf8_lossy(buf)))
    }

    fn mirror(&self, buf: &[u8]) -> io::Result<usize> {
        if let Some(out) = &self.output {
            out.write_all(buf)?;
        }
        Ok(buf.len())
    }
}

impl io::Write for LokiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let entry = self.accept(buf)?;
        self.handle.submit_blocking(entry)?;
        self.mirror(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &self.output {
            Some(out) => out.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LokiWriter {
    type Writer = LokiWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Whether `buf` holds exactly one JSON value (surrounding whitespace allowed).
pub fn is_valid_json(buf: &[u8]) -> bool {
    serde_json::from_slice::<IgnoredAny>(buf).is_ok()
}
