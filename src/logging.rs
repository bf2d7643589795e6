//! Log subscriber setup.

use crate::error::{ErrorKind, Result};
use carcheck_config::LogConfig;
use exn::ResultExt;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the configured filter. Fails if
/// a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .or_raise(|| ErrorKind::Logging(format!("invalid filter {:?}", config.filter)))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json { builder.json().try_init() } else { builder.try_init() };
    installed.map_err(|e| exn::Exn::from(ErrorKind::Logging(e.to_string())))
}
