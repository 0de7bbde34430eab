use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global subscriber: stderr, plus a daily file when a directory is set.
///
/// `RUST_LOG` wins over the configured filter; `verbose` raises the crate to debug.
/// Keep the returned guard alive until exit so buffered file output is flushed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
  let directive = if verbose {
    format!("{},fintrack_sync=debug", config.filter)
  } else {
    config.filter.clone()
  };
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&directive))
    .map_err(|e| eyre!("Invalid log filter {:?}: {}", directive, e))?;

  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let (file, guard) = match &config.directory {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "fintrack.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(file)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(guard)
}
