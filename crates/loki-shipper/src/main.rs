use std::io;

use loki_shipper::{Config, Shipper};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, warn};

/// Exceptional init failure: log and exit.
fn fatal(msg: &str, error: &dyn std::fmt::Display) -> ! {
    error!(%error, "{msg}");
    std::process::exit(1);
}

fn setup_logging() {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    let level = std::env::var("LOKI_SHIP_LOG_LEVEL")
        .ok()
        .and_then(|val| {
            val.parse::<LevelFilter>().ok().or_else(|| {
                eprintln!("invalid LOKI_SHIP_LOG_LEVEL: {val:?}, defaulting to WARN");
                None
            })
        })
        .unwrap_or(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(level)
        .with(tracing_microjson::JsonLayer::new(std::io::stderr).with_target(true))
        .init();
}

fn setup_rustls() {
    // Ignore the error: a provider may already be installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

#[tokio::main]
async fn main() {
    setup_logging();
    setup_rustls();

    let config = Config::from_env().unwrap_or_else(|e| fatal("config error", &e));
    debug!(endpoint = %config.endpoint, "shipping stdin");

    let shipper = Shipper::spawn(config).unwrap_or_else(|e| fatal("failed to start shipper", &e));
    let writer = shipper.writer();

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = Vec::new();
    loop {
        line.clear();
        match stdin.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match writer.write_line(&line).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "skipping line");
            }
            Err(e) => {
                error!(error = %e, "shipper stopped accepting lines");
                break;
            }
        }
    }

    shipper.close().await;
}
