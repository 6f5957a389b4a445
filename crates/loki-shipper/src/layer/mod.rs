use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::batch::Entry;
use crate::shipper::LokiHandle;

/// Targets whose events never reach the pipeline. Shipping them would feed
/// delivery diagnostics back into the batch that produced them.
const IGNORED_TARGETS: &[&str] = &[
    "loki_shipper",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
];

/// Ships every `tracing` event as one JSON line.
#[derive(Debug, Clone)]
pub struct LokiLayer {
    handle: LokiHandle,
    dropped: Arc<AtomicU64>,
}

impl LokiLayer {
    pub fn new(handle: LokiHandle) -> Self {
        Self {
            handle,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Events that could not be enqueued since the layer was created.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<S: Subscriber> Layer<S> for LokiLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_ignored(meta.target()) {
            return;
        }

        let mut fields = JsonFields::default();
        event.record(&mut fields);
        fields
            .0
            .insert("level".into(), meta.level().as_str().to_lowercase().into());
        fields.0.insert("target".into(), meta.target().into());

        let line = Value::Object(fields.0).to_string();
        if self.handle.submit_blocking(Entry::now(line)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

#[derive(Debug, Default)]
struct JsonFields(Map<String, Value>);

impl JsonFields {
    fn insert(&mut self, field: &Field, value: Value) {
        // `level` and `target` belong to the event metadata.
        let key = match field.name() {
            "message" => "msg".to_owned(),
            name @ ("level" | "target") => format!("fields.{name}"),
            name => name.to_owned(),
        };
        self.0.insert(key, value);
    }
}

impl Visit for JsonFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}").into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }
}
