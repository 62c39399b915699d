//! Configuration for the nbworker notebook worker
//!
//! Three kinds of configuration live here:
//! - [`Config`]: the worker's persisted TOML settings (engine versions, paths,
//!   provider integration).
//! - [`BootstrapSettings`]: the resolved, defaults-applied view the bootstrapper
//!   consumes.
//! - [`UserConfig`] / [`QueryParams`]: per-session values injected by the host
//!   and passed through to the guest untouched.

mod bootstrap;
mod guest_env;
mod user_config;

pub use bootstrap::{BootstrapSettings, ProviderSettings, DEFAULT_PROVIDER_WHEEL};
pub use guest_env::{GuestEnvError, GuestEnvLayout, PYTHON_BIN_DIR, PYTHON_LIB_DIR};
pub use user_config::{
    query_params_from_pairs, AuthMethod, LabdataConfig, QueryParams, QueryValue, RuntimeConfig,
    UserConfig,
};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use which::which;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "NBWORKER_CONFIG";

/// Keys accepted by [`Config::get`] and [`Config::set`], in display order
pub const CONFIG_KEYS: [&str; 12] = [
    "engine-version",
    "build-version",
    "engine-root",
    "venv-path",
    "uv-path",
    "session-module",
    "snapshot-path",
    "make-snapshot",
    "provider-package",
    "provider-client",
    "provider-wheel",
    "provider-token-env",
];

const DEFAULT_ENGINE_VERSION: &str = "3.12";
const DEFAULT_SESSION_MODULE: &str = "marimo._pyodide.bootstrap";

/// Optional `[provider]` table of the config file
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wheel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venv_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uv_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make_snapshot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,
}

impl Config {
    pub fn path() -> PathBuf {
        // Honor explicit override for tests / isolated runs.
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let trimmed = env_path.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }

        config_dir().join("nbworker.toml")
    }

    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "engine-version" => self.engine_version.clone(),
            "build-version" => self.build_version.clone(),
            "engine-root" => self.engine_root.clone(),
            "venv-path" => self.venv_path.clone(),
            "uv-path" => self.uv_path.clone(),
            "session-module" => self.session_module.clone(),
            "snapshot-path" => self.snapshot_path.clone(),
            "make-snapshot" => self.make_snapshot.map(|v| v.to_string()),
            "provider-package" => self.provider.as_ref().and_then(|p| p.package.clone()),
            "provider-client" => self.provider.as_ref().and_then(|p| p.client.clone()),
            "provider-wheel" => self.provider.as_ref().and_then(|p| p.wheel.clone()),
            "provider-token-env" => self.provider.as_ref().and_then(|p| p.token_env.clone()),
            _ => None,
        }
    }

    /// Set a key; returns `false` when the key is unknown or the value invalid.
    pub fn set(&mut self, key: &str, value: String) -> bool {
        match key {
            "engine-version" => self.engine_version = Some(value),
            "build-version" => self.build_version = Some(value),
            "engine-root" => self.engine_root = Some(value),
            "venv-path" => self.venv_path = Some(value),
            "uv-path" => self.uv_path = Some(value),
            "session-module" => self.session_module = Some(value),
            "snapshot-path" => self.snapshot_path = Some(value),
            "make-snapshot" => match value.parse::<bool>() {
                Ok(flag) => self.make_snapshot = Some(flag),
                Err(_) => return false,
            },
            "provider-package" => self.provider_mut().package = Some(value),
            "provider-client" => self.provider_mut().client = Some(value),
            "provider-wheel" => self.provider_mut().wheel = Some(value),
            "provider-token-env" => self.provider_mut().token_env = Some(value),
            _ => return false,
        }
        true
    }

    fn provider_mut(&mut self) -> &mut ProviderConfig {
        self.provider.get_or_insert_with(ProviderConfig::default)
    }

    pub fn is_empty(&self) -> bool {
        self.values_iter().is_empty()
    }

    pub fn values_iter(&self) -> Vec<(&'static str, String)> {
        CONFIG_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }

    pub fn is_known_key(key: &str) -> bool {
        CONFIG_KEYS.contains(&key)
    }

    pub fn get_engine_version(&self) -> String {
        self.engine_version
            .clone()
            .unwrap_or_else(|| DEFAULT_ENGINE_VERSION.to_string())
    }

    /// Build version defaults to this crate's version
    pub fn get_build_version(&self) -> String {
        self.build_version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }

    pub fn get_engine_root(&self) -> PathBuf {
        self.engine_root
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir().join("engine"))
    }

    pub fn get_venv_path(&self) -> PathBuf {
        self.venv_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir().join(".venv"))
    }

    pub fn get_session_module(&self) -> String {
        self.session_module
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION_MODULE.to_string())
    }

    /// Resolve the `uv` binary, remembering it in the config once found.
    pub fn ensure_uv_path(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        if let Some(ref path) = self.uv_path {
            if std::path::Path::new(path).exists() {
                return Ok(path.clone());
            }
            self.uv_path = None;
        }

        match which("uv") {
            Ok(path) => {
                let path_str = path.to_string_lossy().trim().to_string();
                self.uv_path = Some(path_str.clone());
                Ok(path_str)
            }
            Err(_) => Err("uv is not installed. Please install it from: https://docs.astral.sh/uv/getting-started/installation/".into()),
        }
    }

    /// Resolve every default into the settings the bootstrapper consumes
    pub fn bootstrap_settings(&self) -> BootstrapSettings {
        let engine_root = self.get_engine_root();
        let provider = self
            .provider
            .as_ref()
            .map(|p| ProviderSettings::from_config(p, &engine_root));

        BootstrapSettings {
            engine_version: self.get_engine_version(),
            build_version: self.get_build_version(),
            engine_root,
            venv_path: self.get_venv_path(),
            uv_path: self.uv_path.as_ref().map(PathBuf::from),
            session_module: self.get_session_module(),
            make_snapshot: self.make_snapshot.unwrap_or(false),
            snapshot_path: self.snapshot_path.as_ref().map(PathBuf::from),
            provider,
        }
    }
}

fn config_dir() -> PathBuf {
    #[cfg(not(target_os = "windows"))]
    let base = dirs::home_dir().map(|home| home.join(".config"));

    #[cfg(target_os = "windows")]
    let base = dirs::config_dir();

    base.unwrap_or_else(std::env::temp_dir).join("nbworker")
}

fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("nbworker")
}
