//! Logging and error reporting setup for the binary.

use anyhow::Result;
use sentry::ClientInitGuard;
use tracing::info;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::log_format::TargetFirstFormat;

/// Deployment environment from `CONTRIBUTOR_ENV`, defaulting to development
pub fn environment() -> String {
    std::env::var("CONTRIBUTOR_ENV").unwrap_or_else(|_| "development".to_string())
}

/// Environment-aware Sentry trace sampling rate
fn trace_sample_rate(env: &str) -> f32 {
    if let Ok(rate) = std::env::var("SENTRY_TRACES_SAMPLE_RATE")
        && let Ok(rate) = rate.parse::<f32>()
    {
        return rate.clamp(0.0, 1.0);
    }

    match env {
        "production" => 0.01,
        "staging" => 0.10,
        _ => 1.0,
    }
}

/// Initialize Sentry when `SENTRY_DSN` is set. The guard must live until exit.
pub fn init_sentry(env: &str) -> Option<ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|d| !d.is_empty())?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: Some(env!("CARGO_PKG_VERSION").into()),
            environment: Some(env.to_string().into()),
            traces_sample_rate: trace_sample_rate(env),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));
    Some(guard)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` controls filtering (default `info`). Error events are forwarded
/// to Sentry when it is initialized.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(TargetFirstFormat::new(ansi)),
        )
        .with(sentry_tracing::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Tracing initialized");
    Ok(())
}
