use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use loki_shipper::encoder::decode_push_request;
use loki_shipper::labels::{Labels, parse_labels};
use tokio::net::TcpListener;

/// One push request as seen by the mock Loki.
#[derive(Debug, Clone)]
pub struct PushedBatch {
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub labels: Labels,
    pub lines: Vec<String>,
}

/// Handle on a running mock Loki.
#[derive(Clone)]
pub struct Collector {
    pub addr: SocketAddr,
    store: Arc<Mutex<Vec<PushedBatch>>>,
    status: Arc<AtomicU16>,
}

impl Collector {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer every following request with `status`.
    pub fn respond_with(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::SeqCst);
    }

    /// Wait until at least `min_expected` batches arrived or `timeout`
    /// passes, then take everything received so far.
    pub async fn drain(&self, timeout: Duration, min_expected: usize) -> Vec<PushedBatch> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.store.lock().unwrap().len() >= min_expected {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        self.store.lock().unwrap().drain(..).collect()
    }
}

pub async fn start() -> Collector {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind collector listener");
    let collector = Collector {
        addr: listener.local_addr().unwrap(),
        store: Arc::default(),
        status: Arc::new(AtomicU16::new(StatusCode::NO_CONTENT.as_u16())),
    };

    let shared = collector.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let collector = shared.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(req, collector.clone()));
                let _ = Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    collector
}

async fn handle<B>(req: Request<B>, collector: Collector) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
{
    if req.method() != Method::POST {
        return Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Full::default())
            .unwrap());
    }

    let path = req.uri().path().to_owned();
    let query = req.uri().query().map(str::to_owned);
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let body = req
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();
    let push = decode_push_request(&body).expect("collector received an undecodable push");

    for stream in push.streams {
        collector.store.lock().unwrap().push(PushedBatch {
            path: path.clone(),
            query: query.clone(),
            content_type: content_type.clone(),
            labels: parse_labels(&stream.labels).expect("collector received malformed labels"),
            lines: stream.entries.into_iter().map(|e| e.line).collect(),
        });
    }

    let status = StatusCode::from_u16(collector.status.load(Ordering::SeqCst)).unwrap();
    let body = if status.is_success() {
        Bytes::new()
    } else {
        Bytes::from_static(b"ingester unavailable\nretry later")
    };
    Ok(Response::builder()
        .status(status)
        .body(Full::new(body))
        .unwrap())
}
