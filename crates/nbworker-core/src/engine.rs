//! Seams between the orchestration core and a guest engine
//!
//! The core never talks to an interpreter directly. An [`EngineLoader`]
//! produces a [`GuestRuntime`], and everything after that (package loading,
//! session construction, the filesystem) goes through the runtime's methods.
//! Implementations are blocking; the controller schedules them on tokio's
//! blocking pool.

use crate::channel::ChannelHandle;
use crate::errors::EngineError;
use crate::session::SessionId;
use nbworker_config::{QueryParams, UserConfig};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Filename used when the host does not name the notebook
pub const NOTEBOOK_FILENAME: &str = "notebook.py";

/// A package to load: by name from the engine's index, or a wheel on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRef {
    Named(String),
    Wheel(PathBuf),
}

impl PackageRef {
    pub fn named(name: impl Into<String>) -> Self {
        PackageRef::Named(name.into())
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageRef::Named(name) => f.write_str(name),
            PackageRef::Wheel(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Receives per-package progress from the engine's loader.
///
/// Loaders report outcomes here instead of through their return value, so
/// one unresolvable package does not hide the others.
pub trait LoadReporter {
    fn message(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Forwards loader progress to `tracing`
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter {
    pub phase: &'static str,
}

impl LoadReporter for TracingReporter {
    fn message(&self, msg: &str) {
        tracing::info!(phase = self.phase, "{}", msg);
    }

    fn error(&self, msg: &str) {
        tracing::warn!(phase = self.phase, "{}", msg);
    }
}

/// Parameters for the one-time engine load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLoadRequest {
    pub engine_version: String,
    pub build_version: String,
    /// Packages loaded while the engine itself boots
    pub packages: Vec<String>,
    pub lock_file: PathBuf,
    pub package_index: PathBuf,
    pub make_snapshot: bool,
}

pub trait EngineLoader: Send + Sync + 'static {
    type Runtime: GuestRuntime;

    fn load(&self, request: &EngineLoadRequest) -> Result<Self::Runtime, EngineError>;
}

/// Filesystem primitives used to prepare a notebook before its session starts
pub trait NotebookFileSystem {
    fn create_home_dir(&self) -> Result<(), EngineError>;

    fn mount_fs(&self) -> Result<(), EngineError>;

    fn populate_files_to_memory(&self) -> Result<(), EngineError>;

    /// Write (or reuse) the notebook file and return its filename
    fn init_notebook_code(&self, code: &str, filename: Option<&str>)
        -> Result<String, EngineError>;
}

/// Starts a constructed session's run loop.
///
/// Consumes itself, so a session can be initialized at most once.
pub trait DeferredInit: Send {
    fn init(self: Box<Self>, auto_instantiate: bool) -> Result<(), EngineError>;
}

impl<F> DeferredInit for F
where
    F: FnOnce(bool) -> Result<(), EngineError> + Send,
{
    fn init(self: Box<Self>, auto_instantiate: bool) -> Result<(), EngineError> {
        (*self)(auto_instantiate)
    }
}

/// Inputs for guest-side session construction
pub struct GuestSessionSpec<'a> {
    pub id: SessionId,
    pub filename: &'a str,
    pub code: &'a str,
    pub channel: ChannelHandle,
    pub query_params: &'a QueryParams,
    pub user_config: &'a UserConfig,
}

/// What the guest hands back from session construction
pub struct GuestSession<B> {
    pub bridge: B,
    pub init: Box<dyn DeferredInit>,
    /// Package names the guest found referenced by the notebook
    pub packages: Vec<String>,
}

/// A loaded guest engine
pub trait GuestRuntime: NotebookFileSystem + Send + Sync + 'static {
    type Bridge: Send + 'static;

    /// Load packages into the engine; they stay loaded for the worker's lifetime
    fn load_packages(
        &self,
        packages: &[PackageRef],
        reporter: &dyn LoadReporter,
    ) -> Result<(), EngineError>;

    /// Run guest code to completion
    fn run_code(&self, code: &str) -> Result<(), EngineError>;

    fn make_snapshot(&self) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::SnapshotUnsupported)
    }

    /// Native loader pass: load whatever packages the imports in `code` map to
    fn load_packages_from_imports(
        &self,
        code: &str,
        reporter: &dyn LoadReporter,
    ) -> Result<(), EngineError>;

    /// Package names the native loader has loaded so far
    fn loaded_packages(&self) -> BTreeSet<String>;

    /// Whether `name` is importable as an already-loaded guest module
    fn has_module(&self, name: &str) -> bool;

    /// Install packages with the guest's fallback package manager
    fn fallback_install(&self, packages: &[String]) -> Result<(), EngineError>;

    fn create_session(
        &self,
        spec: GuestSessionSpec<'_>,
    ) -> Result<GuestSession<Self::Bridge>, EngineError>;

    /// `id` was closed, or its creation failed
    fn release_session(&self, _id: SessionId) {}
}
