use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base url every API path is resolved against (e.g. "https://dms.example.com/api")
  pub base_url: Url,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectivityConfig {
  /// Always-served static resource used to confirm reachability.
  /// Defaults to `<base_url>/favicon.ico`.
  pub probe_url: Option<Url>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Database file (default: <data_dir>/dms-sync/cache.db)
  pub path: Option<PathBuf>,
  #[serde(default)]
  pub ttl: TtlConfig,
}

/// Freshness windows in minutes. `0` means never expire.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TtlConfig {
  pub outlets_minutes: u64,
  pub sales_minutes: u64,
  pub dashboard_stats_minutes: u64,
}

impl Default for TtlConfig {
  fn default() -> Self {
    Self {
      outlets_minutes: 24 * 60,
      sales_minutes: 60,
      dashboard_stats_minutes: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Attempts before a failing operation is dropped
  pub max_retries: u32,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_retries: crate::sync::DEFAULT_MAX_RETRIES,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive, overridden by RUST_LOG
  pub level: String,
  /// Log file (default: <data_dir>/dms-sync/dms-sync.log)
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dms-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dms-sync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/dms-sync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("dms-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dms-sync").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Probe target, defaulting to the favicon next to the API.
  pub fn probe_url(&self) -> Result<Url> {
    match &self.connectivity.probe_url {
      Some(url) => Ok(url.clone()),
      None => crate::sync::join_url(&self.api.base_url, "favicon.ico")
        .map_err(|e| eyre!("Invalid probe url: {}", e)),
    }
  }

  /// Get the API bearer token from `DMS_API_TOKEN`, if set.
  pub fn api_token() -> Option<String> {
    std::env::var("DMS_API_TOKEN").ok().filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://dms.example.com/api\n").unwrap();

    assert_eq!(config.cache.ttl, TtlConfig::default());
    assert_eq!(config.queue.max_retries, 3);
    assert_eq!(config.log.level, "info");
    assert_eq!(
      config.probe_url().unwrap().as_str(),
      "https://dms.example.com/api/favicon.ico"
    );
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  base_url: http://localhost:8080/
connectivity:
  probe_url: http://localhost:8080/health
cache:
  path: /tmp/dms.db
  ttl:
    sales_minutes: 5
queue:
  max_retries: 5
log:
  level: debug
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.cache.ttl.sales_minutes, 5);
    assert_eq!(config.cache.ttl.outlets_minutes, 1440);
    assert_eq!(config.cache.path.as_deref(), Some(Path::new("/tmp/dms.db")));
    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.probe_url().unwrap().path(), "/health");
  }

  #[test]
  fn test_missing_base_url_is_an_error() {
    assert!(Config::parse("cache:\n  path: /tmp/x.db\n").is_err());
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/dms-sync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
