use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

/// Deadline for one push, measured from request start.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of an error response body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("format push request: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("compress push request: {0}")]
    Compress(#[from] snap::Error),

    #[error("send push request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP status {status} ({}): {body}", status.as_u16())]
    Rejected { status: StatusCode, body: String },

    #[error("batch worker has shut down")]
    Closed,
}

/// Delivers one encoded payload to the remote endpoint.
pub trait Push {
    fn push(&self, payload: Bytes) -> impl Future<Output = Result<(), SendError>> + Send + '_;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: Url) -> Result<Self, reqwest::Error> {
        Self::with_timeout(endpoint, SEND_TIMEOUT)
    }

    pub fn with_timeout(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Push for HttpTransport {
    async fn push(&self, payload: Bytes) -> Result<(), SendError> {
        let mut resp = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/x-protobuf")
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = read_body_prefix(&mut resp, ERROR_BODY_LIMIT).await;
        Err(SendError::Rejected { status, body })
    }
}

/// First line of at most `limit` bytes of the response body. Read errors
/// just cut the prefix short; the status is what matters.
async fn read_body_prefix(resp: &mut reqwest::Response, limit: usize) -> String {
    let mut buf = BytesMut::new();
    while buf.len() < limit {
        match resp.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    buf.truncate(limit);

    let text = String::from_utf8_lossy(&buf);
    text.lines().next().unwrap_or_default().to_owned()
}
