//! Tracing subscriber setup for the binary.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize structured logging. Defaults to `info`; `RUST_LOG`
/// overrides per the usual env-filter syntax.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
