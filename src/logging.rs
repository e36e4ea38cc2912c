//! # Structured Logging Module
//!
//! Tracing setup for the batch process scheduler. Output goes to the
//! console; embedders that install their own subscriber first win, since
//! initialization uses `try_init`.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize tracing output for the scheduler.
///
/// The filter comes from `RUST_LOG` when set, otherwise `info`. Setting
/// `CIVIC_BATCH_LOG_JSON=1` switches the console output to JSON lines for
/// log shippers.
pub fn init() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json_output = std::env::var("CIVIC_BATCH_LOG_JSON").is_ok_and(|v| v == "1");

        let result = if json_output {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(filter()),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(filter()),
                )
                .try_init()
        };

        // A subscriber installed by the embedder is fine; keep using it.
        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed");
        }
    });
}
