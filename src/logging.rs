//! Tracing subscriber setup: stderr plus an optional daily-rolling log file.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "versecache.log";

/// Keeps the non-blocking file writer alive. Drop it last.
pub struct LoggingGuard {
  _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Filter directive: `-v` forces debug, otherwise the configured level.
fn default_directive(config: &LoggingConfig, verbose: bool) -> String {
  if verbose {
    "debug".to_string()
  } else {
    config.level.clone()
  }
}

/// Install the global subscriber. `VERSECACHE_LOG` (or `RUST_LOG`) overrides the level.
pub fn init(config: &LoggingConfig, data_dir: &Path, verbose: bool) -> Result<LoggingGuard> {
  let directive = default_directive(config, verbose);
  let env = std::env::var("VERSECACHE_LOG")
    .or_else(|_| std::env::var("RUST_LOG"))
    .unwrap_or(directive);
  let filter = EnvFilter::try_new(&env).map_err(|e| eyre!("Invalid log filter {env:?}: {e}"))?;

  let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .boxed()];

  let mut file_guard = None;
  if config.file {
    let dir = data_dir.join("logs");
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
    file_guard = Some(guard);
  }

  tracing_subscriber::registry()
    .with(layers)
    .with(filter)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verbose_overrides_configured_level() {
    let config = LoggingConfig {
      level: "warn".into(),
      file: false,
    };
    assert_eq!(default_directive(&config, false), "warn");
    assert_eq!(default_directive(&config, true), "debug");
  }
}
