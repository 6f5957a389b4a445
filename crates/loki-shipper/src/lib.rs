//! Batching log shipper for Grafana Loki.
//!
//! Entries are accepted from any number of producers, grouped into batches
//! by a single worker task, and pushed to Loki's ingestion endpoint as
//! snappy-compressed protobuf. A batch is flushed when it reaches
//! `max_batch_count` entries, when `max_batch_age` elapses, or on shutdown.
//! Each batch gets exactly one delivery attempt.
//!
//! ```no_run
//! # async fn run() -> Result<(), loki_shipper::ConfigError> {
//! use loki_shipper::{Config, Shipper};
//! use tracing_subscriber::prelude::*;
//!
//! let config = Config::builder("http://loki:3100")
//!     .label("app", "billing")
//!     .build()?;
//! let shipper = Shipper::spawn(config)?;
//! tracing_subscriber::registry().with(shipper.layer()).init();
//!
//! tracing::info!(target: "billing", invoice = 17, "issued");
//! shipper.close().await;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod encoder;
mod flush_policy;
pub mod labels;
mod layer;
pub mod proto;
mod shipper;
pub mod transport;
mod worker;
mod writer;

#[cfg(test)]
mod testing;

pub use batch::Entry;
pub use config::{Config, ConfigBuilder, ConfigError};
pub use layer::LokiLayer;
pub use shipper::{LokiHandle, Shipper, SubmitError};
pub use transport::{HttpTransport, Push, SendError};
pub use writer::{LokiWriter, is_valid_json};
