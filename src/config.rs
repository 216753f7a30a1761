//! Configuration for contentsync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CONTENTSYNC_HOME, CONTENTSYNC_ENDPOINT, CONTENTSYNC_BACKEND)
//! 2. Config file (.contentsync/config.yaml)
//! 3. Defaults (~/.contentsync, http://localhost/backend.php, key-value queue)
//!
//! Config file discovery:
//! - Searches current directory and parents for .contentsync/config.yaml
//! - `paths.home` in the config file is relative to the .contentsync/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::storage::QueueBackend;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_HOME: &str = "CONTENTSYNC_HOME";
pub const ENV_ENDPOINT: &str = "CONTENTSYNC_ENDPOINT";
pub const ENV_BACKEND: &str = "CONTENTSYNC_BACKEND";

pub const DEFAULT_ENDPOINT: &str = "http://localhost/backend.php";
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;

/// Name of the shared transactional database file
pub const DATABASE_FILE: &str = "contentsync.db";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .contentsync/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub probe_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub backend: Option<QueueBackend>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory holding both queue backends
    pub home: PathBuf,
    /// Remote store endpoint
    pub endpoint: String,
    /// Default pending queue backend
    pub backend: QueueBackend,
    /// How often the connectivity probe runs
    pub probe_interval: Duration,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Directory of the key-value queue backend
    pub fn kv_dir(&self) -> PathBuf {
        self.home.join("kv")
    }

    /// Shared database of the transactional queue backend
    pub fn database_path(&self) -> PathBuf {
        self.home.join(DATABASE_FILE)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".contentsync").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge env, config file and defaults
fn resolve<F>(
    config: Option<(PathBuf, ConfigFile)>,
    env: F,
    default_home: PathBuf,
) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let (config_file, file) = match config {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    let home = if let Some(env_home) = env(ENV_HOME) {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (
        config_file.as_ref(),
        file.as_ref().and_then(|f| f.paths.home.as_ref()),
    ) {
        let dot_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(dot_dir, home)
    } else {
        default_home
    };

    let remote = file.as_ref().and_then(|f| f.remote.as_ref());

    let endpoint = env(ENV_ENDPOINT)
        .or_else(|| remote.and_then(|r| r.endpoint.clone()))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    let backend = match env(ENV_BACKEND) {
        Some(raw) => raw
            .parse::<QueueBackend>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid {}", ENV_BACKEND))?,
        None => file
            .as_ref()
            .and_then(|f| f.queue.as_ref())
            .and_then(|q| q.backend)
            .unwrap_or_default(),
    };

    let probe_interval = Duration::from_secs(
        remote
            .and_then(|r| r.probe_interval_seconds)
            .unwrap_or(DEFAULT_PROBE_INTERVAL_SECS)
            .max(1),
    );

    Ok(ResolvedConfig {
        home,
        endpoint,
        backend,
        probe_interval,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".contentsync");

    let config = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    resolve(config, |key| std::env::var(key).ok(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = resolve(None, no_env, PathBuf::from("/home/u/.contentsync")).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/u/.contentsync"));
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.backend, QueueBackend::KeyValue);
        assert_eq!(config.probe_interval, Duration::from_secs(5));
        assert_eq!(config.kv_dir(), PathBuf::from("/home/u/.contentsync/kv"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/home/u/.contentsync/contentsync.db")
        );
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dot_dir = temp.path().join(".contentsync");
        std::fs::create_dir_all(&dot_dir).unwrap();

        let config_path = dot_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
remote:
  endpoint: https://example.test/backend.php
  probe_interval_seconds: 30
queue:
  backend: transactional
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version, "1.0");
        assert_eq!(parsed.paths.home, Some("./state".to_string()));

        let config = resolve(
            Some((config_path.clone(), parsed)),
            no_env,
            PathBuf::from("/unused"),
        )
        .unwrap();
        assert_eq!(config.home, dot_dir.join("./state"));
        assert_eq!(config.endpoint, "https://example.test/backend.php");
        assert_eq!(config.backend, QueueBackend::Transactional);
        assert_eq!(config.probe_interval, Duration::from_secs(30));
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(
            r#"
version: "1.0"
remote:
  endpoint: https://file.test/
queue:
  backend: transactional
"#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            (ENV_HOME, "/env/home"),
            (ENV_ENDPOINT, "https://env.test/"),
            (ENV_BACKEND, "kv"),
        ]
        .into_iter()
        .collect();

        let config = resolve(
            Some((PathBuf::from("/p/.contentsync/config.yaml"), file)),
            |key| env.get(key).map(|v| v.to_string()),
            PathBuf::from("/unused"),
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/env/home"));
        assert_eq!(config.endpoint, "https://env.test/");
        assert_eq!(config.backend, QueueBackend::KeyValue);
    }

    #[test]
    fn test_invalid_backend_env_is_an_error() {
        let result = resolve(
            None,
            |key| (key == ENV_BACKEND).then(|| "redis".to_string()),
            PathBuf::from("/h"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.contentsync");

        assert_eq!(
            resolve_path(&base, "../sibling"),
            PathBuf::from("/home/user/project/.contentsync/../sibling")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
