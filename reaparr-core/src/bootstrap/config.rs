use tracing::info;

use crate::config::Config;
use crate::{Error, Result};

/// Load and validate configuration. The optional path comes from the
/// command line; otherwise `reaparr.toml` and `REAPARR_*` env vars apply.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    let config =
        Config::load(path).map_err(|e| Error::Configuration(format!("failed to load config: {e}")))?;

    config.validate().map_err(|errors| {
        Error::Configuration(format!("invalid configuration:\n  - {}", errors.join("\n  - ")))
    })?;

    info!(backend = ?config.media_server.backend, "configuration loaded");
    Ok(config)
}
