use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub remote: Option<RemoteConfig>,
  pub download: DownloadConfig,
  pub logging: LoggingConfig,
  /// Directory for the databases and log files (defaults to $XDG_DATA_HOME/versecache)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Origin of the passage service, e.g. "https://bible.example.org"
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://127.0.0.1:8000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Disable the response cache entirely (every request goes to the network)
  pub enabled: bool,
  /// Maximum number of cached responses before the oldest are evicted
  pub max_responses: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_responses: 200,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the REST endpoint holding user notes and plans
  pub url: String,
  /// User id the access token belongs to
  pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
  /// Pause between consecutive requests of a bulk download
  pub delay_ms: u64,
  /// Highest Hebrew Strong's number fetched by a lexicon download
  pub hebrew_entries: u32,
  /// Highest Greek Strong's number fetched by a lexicon download
  pub greek_entries: u32,
}

impl Default for DownloadConfig {
  fn default() -> Self {
    Self {
      delay_ms: 50,
      hebrew_entries: 8674,
      greek_entries: 5624,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive when no env filter is set
  pub level: String,
  /// Also write a daily-rolling log file under the data directory
  pub file: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./versecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/versecache/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("versecache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("versecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not to an empty mapping.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Resolve the data directory, creating nothing.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("versecache"))
  }

  /// Get the remote access token from environment variables.
  ///
  /// Checks VERSECACHE_REMOTE_TOKEN.
  pub fn get_remote_token() -> Result<String> {
    std::env::var("VERSECACHE_REMOTE_TOKEN").map_err(|_| {
      eyre!("Remote access token not found. Set the VERSECACHE_REMOTE_TOKEN environment variable.")
    })
  }

  /// Get the remote project API key from environment variables.
  ///
  /// Checks VERSECACHE_REMOTE_KEY.
  pub fn get_remote_api_key() -> Result<String> {
    std::env::var("VERSECACHE_REMOTE_KEY").map_err(|_| {
      eyre!("Remote API key not found. Set the VERSECACHE_REMOTE_KEY environment variable.")
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_yields_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.cache.max_responses, 200);
    assert!(config.cache.enabled);
    assert_eq!(config.download.delay_ms, 50);
    assert!(config.remote.is_none());
  }

  #[test]
  fn partial_sections_keep_other_defaults() {
    let yaml = r#"
api:
  base_url: "https://bible.example.org"
cache:
  max_responses: 10
remote:
  url: "https://db.example.org"
  user_id: "u-1"
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.api.base_url, "https://bible.example.org");
    assert_eq!(config.cache.max_responses, 10);
    assert!(config.cache.enabled);
    assert_eq!(config.remote.unwrap().user_id, "u-1");
    assert_eq!(config.download.greek_entries, 5624);
  }

  #[test]
  fn explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn loads_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.yaml");
    std::fs::write(&path, "data_dir: /tmp/vc\ndownload:\n  delay_ms: 0\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.download.delay_ms, 0);
    assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/vc"));
  }
}
