//! Centralised tracing initialisation for the promotion engine.
//!
//! Call [`init_tracing`] (or [`init_from_config`]) once at program start to
//! configure the global subscriber with an `EnvFilter` and optional JSON
//! formatting. Later calls leave the installed subscriber in place and
//! return `false`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::EngineConfig;

/// Install the global subscriber: an `EnvFilter` (falling back to `level`
/// when `RUST_LOG` is unset) and a text or JSON-lines formatter.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (text, json) = if json {
        (None, Some(fmt::layer().with_target(false).json()))
    } else {
        (Some(fmt::layer().with_target(false)), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok()
}

/// Install the subscriber described by `PROMOTER_LOG_FORMAT` and
/// `PROMOTER_LOG_LEVEL`, as read into `config`.
pub fn init_from_config(config: &EngineConfig) -> bool {
    init_tracing(config.log_json, config.log_level)
}
