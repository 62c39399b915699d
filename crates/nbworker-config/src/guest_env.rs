//! Layout of the virtual environment hosting the guest interpreter
//!
//! The embedded interpreter is linked at build time but its packages live in
//! a venv. This resolves the pieces of that venv the backend needs:
//! - site-packages (added to `sys.path`)
//! - the interpreter executable (handed to `uv pip install --python`)
//! - `PYTHONHOME`, read from the `home` field of `pyvenv.cfg`

use std::fs;
use std::path::{Path, PathBuf};

/// "Lib" on Windows, "lib" on Unix
#[cfg(windows)]
pub const PYTHON_LIB_DIR: &str = "Lib";
#[cfg(not(windows))]
pub const PYTHON_LIB_DIR: &str = "lib";

/// "Scripts" on Windows, "bin" on Unix
#[cfg(windows)]
pub const PYTHON_BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
pub const PYTHON_BIN_DIR: &str = "bin";

#[cfg(not(windows))]
const PYTHON_EXE_CANDIDATES: &[&str] = &["python3", "python"];
#[cfg(windows)]
const PYTHON_EXE_CANDIDATES: &[&str] = &["python.exe", "python3.exe"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestEnvError {
    /// The venv root does not exist
    Missing(PathBuf),
    /// The venv exists but a required piece of it could not be found
    Incomplete(String),
}

impl std::fmt::Display for GuestEnvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuestEnvError::Missing(path) => {
                write!(f, "Guest environment not found: {}", path.display())
            }
            GuestEnvError::Incomplete(msg) => write!(f, "Incomplete guest environment: {}", msg),
        }
    }
}

impl std::error::Error for GuestEnvError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestEnvLayout {
    root: PathBuf,
}

impl GuestEnvLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A venv is usable once `pyvenv.cfg` exists
    pub fn is_initialized(&self) -> bool {
        self.root.join("pyvenv.cfg").is_file()
    }

    fn require_root(&self) -> Result<(), GuestEnvError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(GuestEnvError::Missing(self.root.clone()))
        }
    }

    /// `lib/python3.X/site-packages` on Unix, `Lib/site-packages` on Windows
    pub fn site_packages(&self) -> Result<PathBuf, GuestEnvError> {
        self.require_root()?;
        let lib_dir = self.root.join(PYTHON_LIB_DIR);

        #[cfg(windows)]
        let site_packages = lib_dir.join("site-packages");

        #[cfg(not(windows))]
        let site_packages = fs::read_dir(&lib_dir)
            .map_err(|e| {
                GuestEnvError::Incomplete(format!("cannot read {}: {}", lib_dir.display(), e))
            })?
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("python"))
            .map(|e| e.path().join("site-packages"))
            .ok_or_else(|| {
                GuestEnvError::Incomplete(format!(
                    "no python3.X directory in {}",
                    lib_dir.display()
                ))
            })?;

        if site_packages.is_dir() {
            Ok(site_packages)
        } else {
            Err(GuestEnvError::Incomplete(format!(
                "site-packages not found: {}",
                site_packages.display()
            )))
        }
    }

    /// The venv's interpreter executable
    pub fn python_exe(&self) -> Result<PathBuf, GuestEnvError> {
        self.require_root()?;
        let bin_dir = self.root.join(PYTHON_BIN_DIR);

        PYTHON_EXE_CANDIDATES
            .iter()
            .map(|exe| bin_dir.join(exe))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                GuestEnvError::Incomplete(format!(
                    "no interpreter executable in {}",
                    bin_dir.display()
                ))
            })
    }

    /// Resolve `PYTHONHOME` from `pyvenv.cfg`.
    ///
    /// `home` points at the base installation's bin directory, so its parent
    /// is the home.
    pub fn python_home(&self) -> Result<PathBuf, GuestEnvError> {
        let cfg = self.root.join("pyvenv.cfg");
        let content = fs::read_to_string(&cfg).map_err(|e| {
            GuestEnvError::Incomplete(format!("cannot read {}: {}", cfg.display(), e))
        })?;
        parse_pyvenv_home(&content).ok_or_else(|| {
            GuestEnvError::Incomplete(format!("no 'home' entry in {}", cfg.display()))
        })
    }
}

fn parse_pyvenv_home(content: &str) -> Option<PathBuf> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() != "home" {
            return None;
        }
        let home_bin = PathBuf::from(value.trim());
        Some(home_bin.parent().map(Path::to_path_buf).unwrap_or(home_bin))
    })
}
