use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub session: SessionConfig,
  pub search: SearchConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  /// Lifetime of a cached list page
  pub ttl_secs: u64,
  /// When false every lookup misses
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: 30,
      enabled: true,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
  /// Delay between a store change and the dashboard re-read
  pub refresh_delay_ms: u64,
  pub auto_refresh: bool,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      refresh_delay_ms: 100,
      auto_refresh: true,
    }
  }
}

impl SyncConfig {
  pub fn refresh_delay(&self) -> Duration {
    Duration::from_millis(self.refresh_delay_ms)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
  pub heartbeat_secs: u64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      heartbeat_secs: 300,
    }
  }
}

impl SessionConfig {
  pub fn heartbeat(&self) -> Duration {
    Duration::from_secs(self.heartbeat_secs)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
  pub table_debounce_ms: u64,
  pub inline_debounce_ms: u64,
  /// Result cap for autocomplete lookups
  pub autocomplete_limit: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      table_debounce_ms: 500,
      inline_debounce_ms: 300,
      autocomplete_limit: 10,
    }
  }
}

impl SearchConfig {
  pub fn table_debounce(&self) -> Duration {
    Duration::from_millis(self.table_debounce_ms)
  }

  pub fn inline_debounce(&self) -> Duration {
    Duration::from_millis(self.inline_debounce_ms)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
  /// `EnvFilter` directive, overridden by `RUST_LOG`
  pub filter: String,
  /// Write daily log files here in addition to stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      directory: None,
    }
  }
}

/// Looked up in the working directory before the user config directory.
const LOCAL_FILE: &str = "fintrack.yaml";

impl Config {
  /// Resolve the configuration for this process.
  ///
  /// A path given on the command line must exist. Without one, the first of
  /// `./fintrack.yaml` and `<config dir>/fintrack/config.yaml` that exists is
  /// read; when neither does the store layer runs on the built-in defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    match explicit_path {
      Some(path) if !path.is_file() => Err(eyre!("Config file not found: {}", path.display())),
      Some(path) => Self::load_from_path(path),
      None => Self::load_first(&Self::candidates(Path::new("."), dirs::config_dir())),
    }
  }

  /// Implicit config locations, most specific first.
  fn candidates(cwd: &Path, config_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths = vec![cwd.join(LOCAL_FILE)];
    paths.extend(config_dir.map(|dir| dir.join("fintrack").join("config.yaml")));
    paths
  }

  fn load_first(candidates: &[PathBuf]) -> Result<Self> {
    match candidates.iter().find(|path| path.is_file()) {
      Some(path) => Self::load_from_path(path),
      None => Ok(Self::default()),
    }
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty document deserializes as null.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.cache.ttl(), Duration::from_secs(30));
    assert!(config.cache.enabled);
    assert_eq!(config.sync.refresh_delay(), Duration::from_millis(100));
    assert_eq!(config.session.heartbeat(), Duration::from_secs(300));
    assert_eq!(config.search.table_debounce(), Duration::from_millis(500));
    assert_eq!(config.search.inline_debounce(), Duration::from_millis(300));
    assert_eq!(config.logging.filter, "info");
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let config = Config::parse("cache:\n  ttl_secs: 5\nsync:\n  auto_refresh: false\n").unwrap();
    assert_eq!(config.cache.ttl_secs, 5);
    assert!(config.cache.enabled);
    assert!(!config.sync.auto_refresh);
    assert_eq!(config.sync.refresh_delay_ms, 100);
    assert_eq!(config.search, SearchConfig::default());
  }

  #[test]
  fn test_empty_file_is_default() {
    assert_eq!(Config::parse("  \n").unwrap(), Config::default());
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "session:\n  heartbeat_secs: 60\nlogging:\n  directory: /tmp/fintrack").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.session.heartbeat_secs, 60);
    assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/fintrack")));
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }

  #[test]
  fn test_no_config_file_runs_on_defaults() {
    let cwd = tempfile::tempdir().unwrap();
    let user = tempfile::tempdir().unwrap();
    let candidates = Config::candidates(cwd.path(), Some(user.path().to_path_buf()));
    assert_eq!(Config::load_first(&candidates).unwrap(), Config::default());
  }

  #[test]
  fn test_local_file_shadows_user_config() {
    let cwd = tempfile::tempdir().unwrap();
    let user = tempfile::tempdir().unwrap();
    std::fs::create_dir(user.path().join("fintrack")).unwrap();
    std::fs::write(
      user.path().join("fintrack").join("config.yaml"),
      "cache:\n  ttl_secs: 90\n",
    )
    .unwrap();
    let candidates = Config::candidates(cwd.path(), Some(user.path().to_path_buf()));
    assert_eq!(Config::load_first(&candidates).unwrap().cache.ttl_secs, 90);

    std::fs::write(cwd.path().join(LOCAL_FILE), "cache:\n  ttl_secs: 5\n").unwrap();
    assert_eq!(Config::load_first(&candidates).unwrap().cache.ttl_secs, 5);
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache: [1, 2").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
  }
}
