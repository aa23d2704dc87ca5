//! Telemetry initialization: tracing-subscriber with console output.
//!
//! Log levels are controlled with the standard `RUST_LOG` environment variable,
//! defaulting to `info` when unset:
//!
//! ```bash
//! RUST_LOG=keyward=debug,sqlx=warn keyward
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the tracing subscriber for the process.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");

    Ok(())
}
