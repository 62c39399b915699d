//! Resolved settings consumed by the runtime bootstrapper

use crate::ProviderConfig;
use std::path::{Path, PathBuf};

/// File name of the provider integration wheel shipped next to the engine
pub const DEFAULT_PROVIDER_WHEEL: &str = "labdata_api-0.0.12-py3-none-any.whl";

const DEFAULT_PROVIDER_PACKAGE: &str = "labdata_api";
const DEFAULT_PROVIDER_CLIENT: &str = "Labdata";
const DEFAULT_PROVIDER_TOKEN_ENV: &str = "LABDATA_TOKEN";

/// Everything the bootstrapper needs, with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSettings {
    /// Guest engine version (the embedded interpreter's version)
    pub engine_version: String,
    /// Host build version; selects the lock manifest built for this host
    pub build_version: String,
    /// Directory holding one subdirectory per engine version
    pub engine_root: PathBuf,
    pub venv_path: PathBuf,
    pub uv_path: Option<PathBuf>,
    /// Guest module exposing `create_session` and `instantiate`
    pub session_module: String,
    pub make_snapshot: bool,
    pub snapshot_path: Option<PathBuf>,
    pub provider: Option<ProviderSettings>,
}

impl BootstrapSettings {
    /// `<engine_root>/<engine_version>`
    pub fn engine_dir(&self) -> PathBuf {
        self.engine_root.join(&self.engine_version)
    }

    /// Lock manifest mapping importable names to prebuilt packages.
    ///
    /// `<engine_dir>/lock-<build_version>.json`, so a host upgrade never
    /// reads a manifest built for another release.
    pub fn lock_file(&self) -> PathBuf {
        self.engine_dir()
            .join(format!("lock-{}.json", self.build_version))
    }

    /// Directory of prebuilt wheels the native loader installs from
    pub fn package_index(&self) -> PathBuf {
        self.engine_dir().join("wheels")
    }
}

/// The notebook-provider integration installed and initialized at boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Importable module name of the integration package
    pub package: String,
    /// Client class constructed for the reachability check
    pub client: String,
    /// Versioned, non-registry wheel installed during bootstrap
    pub wheel: PathBuf,
    /// Environment variable the token is read from; never stored in config
    pub token_env: String,
}

impl ProviderSettings {
    pub(crate) fn from_config(config: &ProviderConfig, engine_root: &Path) -> Self {
        let wheel = match config.wheel {
            Some(ref wheel) => PathBuf::from(wheel),
            None => engine_root.join(DEFAULT_PROVIDER_WHEEL),
        };
        Self {
            package: config
                .package
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER_PACKAGE.to_string()),
            client: config
                .client
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER_CLIENT.to_string()),
            wheel,
            token_env: config
                .token_env
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER_TOKEN_ENV.to_string()),
        }
    }

    /// Read the provider token from the process environment
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wheel_lives_in_engine_root() {
        let settings = ProviderSettings::from_config(&ProviderConfig::default(), Path::new("/opt/engine"));
        assert_eq!(settings.wheel, Path::new("/opt/engine").join(DEFAULT_PROVIDER_WHEEL));
        assert_eq!(settings.client, "Labdata");
    }

    fn settings(build_version: &str) -> BootstrapSettings {
        BootstrapSettings {
            engine_version: "3.12".to_string(),
            build_version: build_version.to_string(),
            engine_root: PathBuf::from("/srv/engine"),
            venv_path: PathBuf::from("/srv/venv"),
            uv_path: None,
            session_module: "guest.bootstrap".to_string(),
            make_snapshot: false,
            snapshot_path: None,
            provider: None,
        }
    }

    #[test]
    fn test_engine_paths_follow_version() {
        let settings = settings("0.1.0");
        assert_eq!(settings.lock_file(), PathBuf::from("/srv/engine/3.12/lock-0.1.0.json"));
        assert_eq!(settings.package_index(), PathBuf::from("/srv/engine/3.12/wheels"));
    }

    #[test]
    fn test_build_version_selects_lock_manifest() {
        assert_ne!(settings("0.1.0").lock_file(), settings("9.9.9").lock_file());
        assert_eq!(settings("0.1.0").package_index(), settings("9.9.9").package_index());
    }

    #[test]
    fn test_missing_token_env_resolves_to_none() {
        let settings = ProviderSettings {
            package: "labdata_api".to_string(),
            client: "Labdata".to_string(),
            wheel: PathBuf::from("labdata.whl"),
            token_env: "NBWORKER_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
        };
        assert!(settings.resolve_token().is_none());
    }
}
