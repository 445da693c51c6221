//! Logging setup
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level so a single run can be made more verbose without touching
//! config files.

use calsync_domain::{CalSyncError, LoggingConfig, Result};
use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install the global subscriber described by `config`.
///
/// Safe to call more than once; only the first call installs anything. A
/// subscriber installed elsewhere (for example by a host application) is left
/// in place.
///
/// # Errors
/// Returns `CalSyncError::Config` when the configured level is not a valid
/// filter directive.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true).flatten_event(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    let _ = INITIALIZED.set(());
    match installed {
        Ok(()) => tracing::info!(level = %config.level, json = config.json, "logging initialized"),
        Err(err) => tracing::debug!(error = %err, "global subscriber already installed"),
    }
    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level)
            .map_err(|err| CalSyncError::Config(format!("invalid log filter '{level}': {err}")))
    })
}
