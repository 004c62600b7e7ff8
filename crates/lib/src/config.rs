//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.qhub/config.json`) and environment.
//! The only things a client needs are where the API lives and where the session is kept.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// API root used when the client runs against a backend on the same machine.
pub const LOCAL_API_URL: &str = "http://127.0.0.1:8000/api";

/// API root of the hosted backend.
pub const DEPLOYED_API_URL: &str = "https://qhub-backend-i3u4.onrender.com/api";

/// Largest file the client will try to upload (100 MiB); the backend enforces the same limit.
pub const DEFAULT_UPLOAD_LIMIT_BYTES: u64 = 100 * 1024 * 1024;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// REST API location and client-side limits.
    #[serde(default)]
    pub api: ApiConfig,

    /// Where credentials and the last active chat are persisted.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Which backend deployment to talk to when no explicit base URL is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Backend on 127.0.0.1:8000.
    #[default]
    Local,

    /// Hosted backend.
    Deployed,
}

impl Environment {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Environment::Local => LOCAL_API_URL,
            Environment::Deployed => DEPLOYED_API_URL,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "localhost" | "dev" => Some(Environment::Local),
            "deployed" | "prod" | "production" => Some(Environment::Deployed),
            _ => None,
        }
    }
}

/// REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Deployment selector. Overridden by QHUB_ENV.
    #[serde(default)]
    pub environment: Environment,

    /// Explicit API root (e.g. "http://10.0.0.5:8000/api"). Wins over `environment`; overridden by QHUB_API_URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Files larger than this are rejected before any request is made.
    #[serde(default = "default_upload_limit")]
    pub upload_limit_bytes: u64,
}

fn default_upload_limit() -> u64 {
    DEFAULT_UPLOAD_LIMIT_BYTES
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            base_url: None,
            upload_limit_bytes: default_upload_limit(),
        }
    }
}

/// Session persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Session file. Relative paths are resolved against the config file's parent. Default: `session.json` next to the config.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the environment: env QHUB_ENV overrides config.
pub fn resolve_environment(config: &Config) -> Environment {
    non_empty_env("QHUB_ENV")
        .and_then(|s| Environment::parse(&s))
        .unwrap_or(config.api.environment)
}

/// Resolve the API root: env QHUB_API_URL overrides `api.baseUrl`, which overrides the environment default.
/// The result never ends with '/'.
pub fn resolve_base_url(config: &Config) -> String {
    let url = non_empty_env("QHUB_API_URL")
        .or_else(|| {
            config
                .api
                .base_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| resolve_environment(config).default_base_url().to_string());
    url.trim_end_matches('/').to_string()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("QHUB_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".qhub").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the session file: `session.path` if set (relative paths resolved against the config file's parent),
/// otherwise `session.json` next to the config file.
pub fn resolve_session_path(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.session.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                parent.join(p)
            }
        }
        _ => parent.join("session.json"),
    }
}

/// Load config from the given path, or the default path (or QHUB_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the session file).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Create the config directory and an empty `config.json` if they do not exist.
/// Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_parent(config_path);
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}
