use std::collections::HashMap;
use std::env;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::labels::Labels;

/// Ingestion path appended to endpoints that don't already carry it.
pub const PUSH_PATH: &str = "/api/prom/push";

pub const DEFAULT_MAX_BATCH_AGE: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BATCH_COUNT: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Longest accepted batch age. Loki rejects entries older than a week with
/// its default limits, and the flush timer must stay representable.
pub const MAX_BATCH_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const ENV_PREFIX: &str = "LOKI_SHIP_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("LOKI_SHIP_ENDPOINT is required but not set")]
    EndpointMissing,

    #[error("endpoint is not a valid URL: {0}")]
    EndpointInvalidUrl(String),

    #[error("at least one stream label must be set")]
    LabelsMissing,

    #[error("{0} has invalid value: {1}")]
    InvalidNumeric(String, String),

    #[error("{0} has invalid value: {1} (expected \"true\" or \"false\")")]
    InvalidBool(String, String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_batch_age of {0:?} exceeds the maximum of {max:?}", max = MAX_BATCH_AGE)]
    BatchAgeTooLarge(Duration),

    #[error("LOKI_SHIP_LABELS has malformed pair {0:?} (expected key=value)")]
    InvalidLabel(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Secondary sink that receives a raw copy of every accepted write.
#[derive(Clone)]
pub struct Output(Arc<Mutex<Box<dyn Write + Send>>>);

impl Output {
    pub fn new(w: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(w))))
    }

    pub(crate) fn write_all(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut w = self
            .0
            .lock()
            .map_err(|_| std::io::Error::other("output lock poisoned"))?;
        w.write_all(buf)
    }

    pub(crate) fn flush(&self) -> std::io::Result<()> {
        let mut w = self
            .0
            .lock()
            .map_err(|_| std::io::Error::other("output lock poisoned"))?;
        w.flush()
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Output(..)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    pub max_batch_age: Duration,
    pub max_batch_count: usize,
    pub labels: Labels,
    pub check_json: bool,
    pub queue_capacity: usize,
    pub output: Option<Output>,
}

impl Config {
    pub fn builder(endpoint: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            endpoint: endpoint.into(),
            max_batch_age: DEFAULT_MAX_BATCH_AGE,
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            labels: Labels::new(),
            check_json: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            output: None,
        }
    }

    /// Build a config from `LOKI_SHIP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::parse(&vars)
    }

    fn parse(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let endpoint = vars
            .get("LOKI_SHIP_ENDPOINT")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::EndpointMissing)?;

        let mut builder = Config::builder(endpoint.as_str())
            .labels(parse_pairs(vars, "LOKI_SHIP_LABELS")?)
            .max_batch_age(parse_duration_ms(
                vars,
                "LOKI_SHIP_MAX_BATCH_AGE_MS",
                DEFAULT_MAX_BATCH_AGE,
            )?)
            .max_batch_count(parse_usize(
                vars,
                "LOKI_SHIP_MAX_BATCH_COUNT",
                DEFAULT_MAX_BATCH_COUNT,
            )?)
            .queue_capacity(parse_usize(
                vars,
                "LOKI_SHIP_QUEUE_CAPACITY",
                DEFAULT_QUEUE_CAPACITY,
            )?)
            .check_json(parse_bool(vars, "LOKI_SHIP_CHECK_JSON", true)?);

        if parse_bool(vars, "LOKI_SHIP_ECHO", false)? {
            builder = builder.output(std::io::stdout());
        }

        builder.build()
    }
}

/// Ordered application of construction options. Later calls override
/// earlier ones, except labels which accumulate.
#[derive(Debug)]
pub struct ConfigBuilder {
    endpoint: String,
    max_batch_age: Duration,
    max_batch_count: usize,
    labels: Labels,
    check_json: bool,
    queue_capacity: usize,
    output: Option<Output>,
}

impl ConfigBuilder {
    /// Upper bound on the time an entry waits in a partial batch.
    pub fn max_batch_age(mut self, age: Duration) -> Self {
        self.max_batch_age = age;
        self
    }

    /// Number of entries that triggers an immediate flush.
    pub fn max_batch_count(mut self, count: usize) -> Self {
        self.max_batch_count = count;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Reject writes that are not a single valid JSON document.
    pub fn check_json(mut self, check: bool) -> Self {
        self.check_json = check;
        self
    }

    /// Capacity of the channel between producers and the batch worker.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Mirror every accepted write to `w`.
    pub fn output(mut self, w: impl Write + Send + 'static) -> Self {
        self.output = Some(Output::new(w));
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let endpoint = normalize_endpoint(&self.endpoint)?;
        if self.labels.is_empty() {
            return Err(ConfigError::LabelsMissing);
        }
        if self.max_batch_age.is_zero() {
            return Err(ConfigError::Zero("max_batch_age"));
        }
        if self.max_batch_age > MAX_BATCH_AGE {
            return Err(ConfigError::BatchAgeTooLarge(self.max_batch_age));
        }
        if self.max_batch_count == 0 {
            return Err(ConfigError::Zero("max_batch_count"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }

        Ok(Config {
            endpoint,
            max_batch_age: self.max_batch_age,
            max_batch_count: self.max_batch_count,
            labels: self.labels,
            check_json: self.check_json,
            queue_capacity: self.queue_capacity,
            output: self.output,
        })
    }
}

/// Parse `raw` and append [`PUSH_PATH`] unless the path already contains it.
/// Query parameters are preserved.
pub fn normalize_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|_| ConfigError::EndpointInvalidUrl(raw.to_owned()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::EndpointInvalidUrl(raw.to_owned()));
    }
    if !url.path().contains(PUSH_PATH) {
        let path = format!("{}{PUSH_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_duration_ms(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(val) => {
            let ms: u64 = val
                .parse()
                .map_err(|_| ConfigError::InvalidNumeric(name.to_owned(), val.clone()))?;
            Ok(Duration::from_millis(ms))
        }
        None => Ok(default),
    }
}

fn parse_usize(
    vars: &HashMap<String, String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match vars.get(name) {
        Some(val) => val
            .parse()
            .map_err(|_| ConfigError::InvalidNumeric(name.to_owned(), val.clone())),
        None => Ok(default),
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.as_str()) {
        None | Some("") => Ok(default),
        Some("true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidBool(name.to_owned(), other.to_owned())),
    }
}

fn parse_pairs(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Vec<(String, String)>, ConfigError> {
    let Some(raw) = vars.get(name).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_owned(), v.trim().to_owned())),
            _ => Err(ConfigError::InvalidLabel(pair.trim().to_owned())),
        })
        .collect()
}
