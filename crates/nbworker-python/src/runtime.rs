//! The embedded-interpreter engine
//!
//! [`PythonEngineLoader`] prepares the venv, starts the interpreter and loads
//! the boot packages. [`PythonRuntime`] then serves every later request:
//! native loads come from the engine's prebuilt wheel directory as described
//! by its lock manifest, fallback installs go to the public index.

use crate::errors::GuestError;
use crate::filesystem::NotebookWorkspace;
use crate::initialization::{ensure_venv, initialize_interpreter, invalidate_import_caches};
use crate::installer::UvInstaller;
use crate::lock::{LockManifest, LockedPackage};
use crate::session::{self, PythonBridge};
use nbworker_config::{BootstrapSettings, GuestEnvLayout};
use nbworker_core::{
    find_imports, EngineError, EngineLoadRequest, EngineLoader, GuestRuntime, GuestSession,
    GuestSessionSpec, LoadReporter, NotebookFileSystem, PackageRef, SessionId,
};
use nbworker_logger as logger;
use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use std::collections::BTreeSet;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Forwards loader progress to the host logger
struct LoggerReporter;

impl LoadReporter for LoggerReporter {
    fn message(&self, msg: &str) {
        logger::debug(msg);
    }

    fn error(&self, msg: &str) {
        logger::warn(msg);
    }
}

pub struct PythonEngineLoader {
    venv_path: PathBuf,
    uv_path: PathBuf,
    session_module: String,
    home: PathBuf,
}

impl PythonEngineLoader {
    pub fn new(settings: &BootstrapSettings) -> Self {
        Self {
            venv_path: settings.venv_path.clone(),
            uv_path: settings
                .uv_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("uv")),
            session_module: settings.session_module.clone(),
            home: settings.engine_dir().join("home"),
        }
    }

    /// Use `home` as the notebook directory instead of `<engine_dir>/home`
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    fn load_runtime(&self, request: &EngineLoadRequest) -> Result<PythonRuntime, GuestError> {
        let layout = GuestEnvLayout::new(&self.venv_path);
        ensure_venv(&self.uv_path, &layout, &request.engine_version)?;
        initialize_interpreter(&layout)?;
        let python = layout.python_exe()?;

        let manifest = LockManifest::load(&request.lock_file)?;
        logger::debug(&format!(
            "Lock manifest {} lists {} packages",
            request.lock_file.display(),
            manifest.packages.len()
        ));

        let runtime = PythonRuntime {
            installer: UvInstaller::new(&self.uv_path, python),
            manifest,
            package_index: request.package_index.clone(),
            session_module: self.session_module.clone(),
            workspace: NotebookWorkspace::new(&self.home),
            loaded: Mutex::new(BTreeSet::new()),
        };

        let base: Vec<&str> = request.packages.iter().map(String::as_str).collect();
        runtime.install_locked(&base, &LoggerReporter)?;
        Ok(runtime)
    }
}

impl EngineLoader for PythonEngineLoader {
    type Runtime = PythonRuntime;

    fn load(&self, request: &EngineLoadRequest) -> Result<PythonRuntime, EngineError> {
        let _span = tracing::debug_span!("python_engine", venv = %self.venv_path.display()).entered();
        self.load_runtime(request).map_err(EngineError::from)
    }
}

pub struct PythonRuntime {
    installer: UvInstaller,
    manifest: LockManifest,
    package_index: PathBuf,
    session_module: String,
    workspace: NotebookWorkspace,
    loaded: Mutex<BTreeSet<String>>,
}

impl PythonRuntime {
    pub fn workspace(&self) -> &NotebookWorkspace {
        &self.workspace
    }

    /// Install `names` and their dependencies from the local wheel directory
    fn install_locked(&self, names: &[&str], reporter: &dyn LoadReporter) -> Result<(), GuestError> {
        let resolved = self.manifest.resolve(names).inspect_err(|e| {
            reporter.error(&e.to_string());
        })?;
        self.install_resolved(&resolved, reporter)
    }

    fn install_resolved(
        &self,
        resolved: &[&LockedPackage],
        reporter: &dyn LoadReporter,
    ) -> Result<(), GuestError> {
        // Held for the whole install so concurrent loads never race on the venv.
        let mut loaded = self.loaded.lock();
        let pending: Vec<String> = resolved
            .iter()
            .filter(|pkg| !loaded.contains(&pkg.name))
            .map(|pkg| pkg.name.clone())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        reporter.message(&format!("Loading {}", pending.join(", ")));
        let pinned: Vec<String> = resolved
            .iter()
            .filter(|pkg| pending.contains(&pkg.name))
            .map(|pkg| format!("{}=={}", pkg.name, pkg.version))
            .collect();
        self.installer
            .install_from_index(&self.package_index, &pinned)
            .inspect_err(|e| reporter.error(&e.to_string()))?;

        reporter.message(&format!("Loaded {}", pending.join(", ")));
        loaded.extend(pending);
        drop(loaded);
        invalidate_import_caches()
    }

    fn install_wheel(&self, wheel: &Path, reporter: &dyn LoadReporter) -> Result<(), GuestError> {
        let mut loaded = self.loaded.lock();
        self.installer
            .install_wheel(wheel)
            .inspect_err(|e| reporter.error(&e.to_string()))?;
        let name = wheel_distribution(wheel);
        reporter.message(&format!("Loaded {}", name));
        loaded.insert(name);
        drop(loaded);
        invalidate_import_caches()
    }

    fn run_python(&self, code: &str) -> Result<(), GuestError> {
        let code = CString::new(code)
            .map_err(|e| GuestError::Python(format!("Guest code contains a NUL byte: {}", e)))?;
        Python::attach(|py| {
            py.run(&code, None, None)
                .map_err(|e| GuestError::Python(session::describe_py_error(py, &e)))
        })
    }
}

/// Drop the log tag if it still names `id`
fn clear_session_tag(id: SessionId) {
    if logger::get_current_session().as_deref() == Some(id.to_string().as_str()) {
        logger::set_current_session(None);
    }
}

/// Distribution name of a wheel file: everything before the first `-`
fn wheel_distribution(wheel: &Path) -> String {
    wheel
        .file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.split('-').next().map(str::to_string))
        .unwrap_or_default()
}

impl NotebookFileSystem for PythonRuntime {
    fn create_home_dir(&self) -> Result<(), EngineError> {
        self.workspace.create_home_dir()?;
        let home = self.workspace.home().to_string_lossy().into_owned();
        Python::attach(|py| {
            PyModule::import(py, "os")?.call_method1("chdir", (home,))?;
            Ok::<(), PyErr>(())
        })
        .map_err(|e| EngineError::FileSystem(e.to_string()))
    }

    fn mount_fs(&self) -> Result<(), EngineError> {
        let home = self.workspace.home().to_string_lossy().into_owned();
        Python::attach(|py| {
            let path = PyModule::import(py, "sys")?.getattr("path")?;
            if !path.contains(&home)? {
                path.call_method1("insert", (0, &home))?;
            }
            Ok::<(), PyErr>(())
        })
        .map_err(|e| EngineError::FileSystem(e.to_string()))
    }

    fn populate_files_to_memory(&self) -> Result<(), EngineError> {
        let files = self.workspace.files()?;
        logger::debug(&format!(
            "{} file(s) available in {}",
            files.len(),
            self.workspace.home().display()
        ));
        Ok(())
    }

    fn init_notebook_code(&self, code: &str, filename: Option<&str>) -> Result<String, EngineError> {
        Ok(self.workspace.init_notebook_code(code, filename)?)
    }
}

impl GuestRuntime for PythonRuntime {
    type Bridge = PythonBridge;

    fn load_packages(
        &self,
        packages: &[PackageRef],
        reporter: &dyn LoadReporter,
    ) -> Result<(), EngineError> {
        let named: Vec<&str> = packages
            .iter()
            .filter_map(|p| match p {
                PackageRef::Named(name) => Some(name.as_str()),
                PackageRef::Wheel(_) => None,
            })
            .collect();
        if !named.is_empty() {
            self.install_locked(&named, reporter)?;
        }
        for package in packages {
            if let PackageRef::Wheel(path) = package {
                self.install_wheel(path, reporter)?;
            }
        }
        Ok(())
    }

    fn run_code(&self, code: &str) -> Result<(), EngineError> {
        Ok(self.run_python(code)?)
    }

    fn load_packages_from_imports(
        &self,
        code: &str,
        reporter: &dyn LoadReporter,
    ) -> Result<(), EngineError> {
        let mut names = Vec::new();
        for import in find_imports(code) {
            match self.manifest.package_for_import(&import) {
                Some(pkg) => names.push(pkg.name.as_str()),
                None => logger::debug(&format!("No prebuilt package provides '{}'", import)),
            }
        }

        let mut failed = Vec::new();
        let mut reasons = Vec::new();
        for (name, resolved) in self.manifest.resolve_each(&names) {
            let outcome = resolved.and_then(|resolved| self.install_resolved(&resolved, reporter));
            if let Err(e) = outcome {
                reporter.error(&format!("Failed to load {}: {}", name, e));
                failed.push(name.to_string());
                reasons.push(e.to_string());
            }
        }
        if failed.is_empty() {
            return Ok(());
        }
        Err(EngineError::PackageLoad {
            packages: failed,
            reason: reasons.join("; "),
        })
    }

    fn loaded_packages(&self) -> BTreeSet<String> {
        self.loaded.lock().clone()
    }

    fn has_module(&self, name: &str) -> bool {
        Python::attach(|py| {
            let loaded = PyModule::import(py, "sys")?
                .getattr("modules")?
                .contains(name)?;
            if loaded {
                return Ok::<bool, PyErr>(true);
            }
            let spec = PyModule::import(py, "importlib.util")?.call_method1("find_spec", (name,))?;
            Ok(!spec.is_none())
        })
        .unwrap_or(false)
    }

    fn fallback_install(&self, packages: &[String]) -> Result<(), EngineError> {
        logger::info(&format!("Installing from package index: {}", packages.join(", ")));
        let mut loaded = self.loaded.lock();
        self.installer.install_from_registry(packages)?;
        loaded.extend(packages.iter().cloned());
        drop(loaded);
        Ok(invalidate_import_caches()?)
    }

    fn create_session(
        &self,
        spec: GuestSessionSpec<'_>,
    ) -> Result<GuestSession<PythonBridge>, EngineError> {
        let notebook = self.workspace.path_of(spec.filename);
        let id = spec.id;
        let session = session::create_session(&self.session_module, &notebook, spec)?;
        logger::set_current_session(Some(id.to_string()));
        Ok(session)
    }

    fn release_session(&self, id: SessionId) {
        clear_session_tag(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_distribution_name() {
        assert_eq!(
            wheel_distribution(Path::new("/engine/labdata_api-0.0.12-py3-none-any.whl")),
            "labdata_api"
        );
        assert_eq!(wheel_distribution(Path::new("/")), "");
    }

    #[test]
    fn test_release_clears_only_its_own_session_tag() {
        logger::set_current_session(Some(SessionId::new(2).to_string()));
        clear_session_tag(SessionId::new(1));
        assert_eq!(logger::get_current_session().as_deref(), Some("session-2"));
        clear_session_tag(SessionId::new(2));
        assert_eq!(logger::get_current_session(), None);
    }

    #[test]
    fn test_loader_defaults_follow_settings() {
        let settings = BootstrapSettings {
            engine_version: "3.12".to_string(),
            build_version: "0.1.0".to_string(),
            engine_root: PathBuf::from("/srv/engine"),
            venv_path: PathBuf::from("/srv/venv"),
            uv_path: None,
            session_module: "marimo._pyodide.bootstrap".to_string(),
            make_snapshot: false,
            snapshot_path: None,
            provider: None,
        };
        let loader = PythonEngineLoader::new(&settings);
        assert_eq!(loader.uv_path, PathBuf::from("uv"));
        assert_eq!(loader.home, PathBuf::from("/srv/engine/3.12/home"));
        let loader = loader.with_home("/tmp/nb");
        assert_eq!(loader.home, PathBuf::from("/tmp/nb"));
    }
}
