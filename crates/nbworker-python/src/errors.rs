use nbworker_config::GuestEnvError;
use nbworker_core::EngineError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the embedded interpreter backend
#[derive(Error, Debug)]
pub enum GuestError {
    #[error("Python error: {0}")]
    Python(String),

    #[error("Failed to import module '{0}': {1}")]
    Import(String, String),

    #[error("Python venv not found or invalid at: {0}")]
    VenvNotFound(PathBuf),

    #[error("Failed to initialize Python interpreter: {0}")]
    Initialization(String),

    #[error("Invalid lock manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("No known package with name '{0}'")]
    UnknownPackage(String),

    #[error("Failed to install {packages:?}: {reason}")]
    Install {
        packages: Vec<String>,
        reason: String,
    },

    #[error("Failed to serialize/deserialize data: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Loses the Python traceback; use [`crate::session::describe_py_error`]
/// where the traceback matters to the user.
impl From<pyo3::PyErr> for GuestError {
    fn from(err: pyo3::PyErr) -> Self {
        GuestError::Python(format!("{}", err))
    }
}

impl From<GuestEnvError> for GuestError {
    fn from(err: GuestEnvError) -> Self {
        match err {
            GuestEnvError::Missing(path) => GuestError::VenvNotFound(path),
            GuestEnvError::Incomplete(msg) => GuestError::Initialization(msg),
        }
    }
}

impl From<serde_json::Error> for GuestError {
    fn from(err: serde_json::Error) -> Self {
        GuestError::Serialization(err.to_string())
    }
}

impl From<GuestError> for EngineError {
    fn from(err: GuestError) -> Self {
        match err {
            GuestError::Io(e) => EngineError::Io(e),
            GuestError::Manifest { path, reason } => EngineError::Fetch {
                resource: path.display().to_string(),
                reason,
            },
            GuestError::Install { packages, reason } => EngineError::PackageLoad { packages, reason },
            GuestError::UnknownPackage(name) => EngineError::PackageLoad {
                reason: format!("No known package with name '{}'", name),
                packages: vec![name],
            },
            other => EngineError::Guest(other.to_string()),
        }
    }
}
