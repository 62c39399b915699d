//! Embedded CPython engine for nbworker
//!
//! Implements the core's engine traits on top of pyo3:
//! 1. A `uv`-managed venv holds the guest's packages
//! 2. A lock manifest maps imports to prebuilt wheels for native loading
//! 3. Sessions are created by the guest's session module and talk to the host
//!    through a native callback bound to the session's channel

pub mod errors;
mod filesystem;
mod initialization;
mod installer;
mod lock;
mod runtime;
mod session;

pub use errors::GuestError;
pub use filesystem::NotebookWorkspace;
pub use initialization::{ensure_venv, initialize_interpreter};
pub use installer::UvInstaller;
pub use lock::{canonical_name, LockInfo, LockManifest, LockedPackage};
pub use runtime::{PythonEngineLoader, PythonRuntime};
pub use session::{describe_py_error, PythonBridge};
