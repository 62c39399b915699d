//! Package installation through `uv`
//!
//! Native loads install from the engine's local wheel directory with the
//! package index disabled. The fallback installer goes to the public index.

use crate::errors::GuestError;
use nbworker_logger as logger;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct UvInstaller {
    uv: PathBuf,
    python: PathBuf,
}

impl UvInstaller {
    pub fn new(uv: impl Into<PathBuf>, python: impl Into<PathBuf>) -> Self {
        Self {
            uv: uv.into(),
            python: python.into(),
        }
    }

    fn base_args(&self) -> Vec<OsString> {
        vec![
            "pip".into(),
            "install".into(),
            "--python".into(),
            self.python.clone().into_os_string(),
        ]
    }

    /// `uv pip install --python <exe> --no-index --find-links <index> <packages>`
    pub fn index_args(&self, index: &Path, packages: &[String]) -> Vec<OsString> {
        let mut args = self.base_args();
        args.push("--no-index".into());
        args.push("--find-links".into());
        args.push(index.as_os_str().to_owned());
        args.extend(packages.iter().map(OsString::from));
        args
    }

    pub fn registry_args(&self, packages: &[String]) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(packages.iter().map(OsString::from));
        args
    }

    pub fn wheel_args(&self, wheel: &Path) -> Vec<OsString> {
        let mut args = self.base_args();
        args.push(wheel.as_os_str().to_owned());
        args
    }

    pub fn install_from_index(&self, index: &Path, packages: &[String]) -> Result<(), GuestError> {
        self.run(self.index_args(index, packages), packages)
    }

    pub fn install_from_registry(&self, packages: &[String]) -> Result<(), GuestError> {
        self.run(self.registry_args(packages), packages)
    }

    pub fn install_wheel(&self, wheel: &Path) -> Result<(), GuestError> {
        if !wheel.exists() {
            return Err(GuestError::Install {
                packages: vec![wheel.display().to_string()],
                reason: "wheel file not found".to_string(),
            });
        }
        self.run(self.wheel_args(wheel), &[wheel.display().to_string()])
    }

    fn run(&self, args: Vec<OsString>, packages: &[String]) -> Result<(), GuestError> {
        let label = format!("uv pip install {}", packages.join(" "));
        logger::debug(&format!("Running: {}", label));

        let output = Command::new(&self.uv).args(&args).output()?;
        logger::capture_output(&label, &output);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("uv exited with an error")
                .trim()
                .to_string();
            return Err(GuestError::Install {
                packages: packages.to_vec(),
                reason,
            });
        }
        Ok(())
    }
}

/// Create the venv hosting the guest interpreter's packages
pub fn create_venv(uv: &Path, venv: &Path, python_version: &str) -> Result<(), GuestError> {
    logger::step(&format!(
        "Creating Python virtual environment at: {}",
        venv.display()
    ));

    let output = Command::new(uv)
        .arg("venv")
        .arg(venv)
        .arg("--python")
        .arg(python_version)
        .output()?;
    logger::capture_output(&format!("uv venv --python {}", python_version), &output);

    if !output.status.success() {
        return Err(GuestError::Initialization(
            "Failed to create Python virtual environment".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_index_install_disables_registry() {
        let uv = UvInstaller::new("/bin/uv", "/venv/bin/python3");
        let args = uv.index_args(Path::new("/engine/3.12/wheels"), &["pandas".to_string()]);
        assert_eq!(
            as_strings(&args),
            vec![
                "pip",
                "install",
                "--python",
                "/venv/bin/python3",
                "--no-index",
                "--find-links",
                "/engine/3.12/wheels",
                "pandas"
            ]
        );
    }

    #[test]
    fn test_registry_install_lists_packages() {
        let uv = UvInstaller::new("uv", "python");
        let args = uv.registry_args(&["altair".to_string(), "vega_datasets".to_string()]);
        let args = as_strings(&args);
        assert!(!args.contains(&"--no-index".to_string()));
        assert_eq!(&args[args.len() - 2..], &["altair", "vega_datasets"]);
    }

    #[test]
    fn test_missing_wheel_fails_without_spawning() {
        let uv = UvInstaller::new("/definitely/not/uv", "python");
        let result = uv.install_wheel(Path::new("/nowhere/labdata_api-0.0.12-py3-none-any.whl"));
        assert!(matches!(result, Err(GuestError::Install { .. })));
    }
}
