//! Tracing setup
//!
//! One global subscriber: the configured level seeds an env filter
//! (`RUST_LOG` still wins), the format picks the human or JSON encoder,
//! and an optional file path redirects output from stderr to an
//! append-only log file.

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::{Error, Result};

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let writer = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    Error::Configuration(format!("cannot open log file {path}: {e}"))
                })?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(writer))
            .init();
    }

    Ok(())
}

fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Configuration(format!("unknown log level: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse_case_insensitively() {
        assert_eq!(parse_level("INFO").expect("level"), Level::INFO);
        assert_eq!(parse_level("Debug").expect("level"), Level::DEBUG);
        assert_eq!(parse_level("warning").expect("level"), Level::WARN);
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(parse_level("loud").is_err());
        assert!(parse_level("").is_err());
    }
}
