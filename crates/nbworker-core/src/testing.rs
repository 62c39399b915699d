//! Recording fake engine used by the core's tests

use crate::channel::ChannelHandle;
use crate::engine::{
    EngineLoadRequest, EngineLoader, GuestRuntime, GuestSession, GuestSessionSpec, LoadReporter,
    NotebookFileSystem, PackageRef, NOTEBOOK_FILENAME,
};
use crate::errors::EngineError;
use crate::imports::find_imports;
use crate::message::OperationMessage;
use crate::session::SessionId;
use nbworker_config::BootstrapSettings;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn settings() -> BootstrapSettings {
    BootstrapSettings {
        engine_version: "3.12".to_string(),
        build_version: "0.1.0".to_string(),
        engine_root: PathBuf::from("/engine"),
        venv_path: PathBuf::from("/engine/venv"),
        uv_path: None,
        session_module: "guest.bootstrap".to_string(),
        make_snapshot: false,
        snapshot_path: None,
        provider: None,
    }
}

/// Blocks callers of [`Gate::wait`] until [`Gate::open`]
#[derive(Clone, Default)]
pub(crate) struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock();
        while !*open {
            cvar.wait(&mut open);
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeBehavior {
    pub fail_engine_load: bool,
    pub load_delay: Option<Duration>,
    /// `load_packages` fails when any requested package displays as this
    pub fail_package: Option<String>,
    pub fail_run_code: bool,
    pub native_fails: bool,
    /// (import name, package name) pairs the native loader can resolve
    pub native_packages: Vec<(String, String)>,
    pub modules: Vec<String>,
    pub fallback_fails: bool,
    pub fallback_gate: Option<Gate>,
    /// Returned as the guest's discovered packages for every session
    pub discovered: Vec<String>,
    pub snapshot: Option<Vec<u8>>,
    pub fail_create_session: bool,
    pub fail_init: bool,
}

type Journal = Arc<Mutex<Vec<String>>>;

pub(crate) struct FakeLoader {
    behavior: FakeBehavior,
    journal: Journal,
    requests: Mutex<Vec<EngineLoadRequest>>,
}

impl FakeLoader {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            journal: Journal::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn requests(&self) -> Vec<EngineLoadRequest> {
        self.requests.lock().clone()
    }
}

impl EngineLoader for FakeLoader {
    type Runtime = FakeRuntime;

    fn load(&self, request: &EngineLoadRequest) -> Result<FakeRuntime, EngineError> {
        self.journal.lock().push("load_engine".to_string());
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.behavior.load_delay {
            std::thread::sleep(delay);
        }
        if self.behavior.fail_engine_load {
            return Err(EngineError::Fetch {
                resource: request.lock_file.display().to_string(),
                reason: "404 Not Found".to_string(),
            });
        }
        let runtime = FakeRuntime::with_journal(self.behavior.clone(), Arc::clone(&self.journal));
        runtime.mark_loaded(&request.packages.iter().map(String::as_str).collect::<Vec<_>>());
        Ok(runtime)
    }
}

pub(crate) struct FakeRuntime {
    behavior: FakeBehavior,
    journal: Journal,
    loaded: Mutex<BTreeSet<String>>,
    native_scans: Mutex<Vec<Vec<String>>>,
    fallback_calls: Mutex<Vec<Vec<String>>>,
    executed: Mutex<Vec<String>>,
    files: Mutex<BTreeMap<String, String>>,
}

impl FakeRuntime {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self::with_journal(behavior, Journal::default())
    }

    fn with_journal(behavior: FakeBehavior, journal: Journal) -> Self {
        Self {
            behavior,
            journal,
            loaded: Mutex::new(BTreeSet::new()),
            native_scans: Mutex::new(Vec::new()),
            fallback_calls: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn mark_loaded(&self, packages: &[&str]) {
        let mut loaded = self.loaded.lock();
        loaded.extend(packages.iter().map(|p| p.to_string()));
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn native_scans(&self) -> Vec<Vec<String>> {
        self.native_scans.lock().clone()
    }

    pub fn fallback_calls(&self) -> Vec<Vec<String>> {
        self.fallback_calls.lock().clone()
    }

    pub fn executed_code(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn file(&self, name: &str) -> Option<String> {
        self.files.lock().get(name).cloned()
    }

    fn record(&self, entry: impl Into<String>) {
        self.journal.lock().push(entry.into());
    }
}

fn package_name(package: &PackageRef) -> String {
    match package {
        PackageRef::Named(name) => name.clone(),
        PackageRef::Wheel(path) => path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('-').next())
            .unwrap_or_default()
            .to_string(),
    }
}

impl NotebookFileSystem for FakeRuntime {
    fn create_home_dir(&self) -> Result<(), EngineError> {
        self.record("create_home_dir");
        Ok(())
    }

    fn mount_fs(&self) -> Result<(), EngineError> {
        self.record("mount_fs");
        Ok(())
    }

    fn populate_files_to_memory(&self) -> Result<(), EngineError> {
        self.record("populate_files_to_memory");
        Ok(())
    }

    fn init_notebook_code(&self, code: &str, filename: Option<&str>) -> Result<String, EngineError> {
        let name = filename.unwrap_or(NOTEBOOK_FILENAME).to_string();
        self.record(format!("init_notebook_code:{}", name));
        self.files.lock().insert(name.clone(), code.to_string());
        Ok(name)
    }
}

/// Bridge handed out by the fake engine; `emit` stands in for guest events
pub(crate) struct FakeBridge {
    pub id: SessionId,
    channel: ChannelHandle,
}

impl FakeBridge {
    pub fn emit(&self, raw: &str) -> bool {
        self.channel.send(OperationMessage::from_raw(raw))
    }
}

impl GuestRuntime for FakeRuntime {
    type Bridge = FakeBridge;

    fn load_packages(
        &self,
        packages: &[PackageRef],
        reporter: &dyn LoadReporter,
    ) -> Result<(), EngineError> {
        let display: Vec<String> = packages.iter().map(|p| p.to_string()).collect();
        self.record(format!("load_packages:{}", display.join(",")));

        if let Some(bad) = self.behavior.fail_package.as_ref() {
            if display.iter().any(|p| p == bad) {
                reporter.error(&format!("No known package with name '{}'", bad));
                return Err(EngineError::PackageLoad {
                    packages: display,
                    reason: format!("'{}' not found", bad),
                });
            }
        }
        let mut loaded = self.loaded.lock();
        for package in packages {
            let name = package_name(package);
            reporter.message(&format!("Loaded {}", name));
            loaded.insert(name);
        }
        Ok(())
    }

    fn run_code(&self, code: &str) -> Result<(), EngineError> {
        self.record("run_code");
        self.executed.lock().push(code.to_string());
        if self.behavior.fail_run_code {
            return Err(EngineError::Guest(
                "ConnectionError: provider unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn make_snapshot(&self) -> Result<Vec<u8>, EngineError> {
        self.record("make_snapshot");
        self.behavior
            .snapshot
            .clone()
            .ok_or(EngineError::SnapshotUnsupported)
    }

    fn load_packages_from_imports(
        &self,
        code: &str,
        reporter: &dyn LoadReporter,
    ) -> Result<(), EngineError> {
        let imports = find_imports(code);
        self.record(format!("native:{}", imports.join(",")));
        self.native_scans.lock().push(imports.clone());
        if self.behavior.native_fails {
            return Err(EngineError::Guest("lock file unavailable".to_string()));
        }
        let mut loaded = self.loaded.lock();
        for import in &imports {
            if let Some((_, package)) = self
                .behavior
                .native_packages
                .iter()
                .find(|(name, _)| name == import)
            {
                reporter.message(&format!("Loaded {}", package));
                loaded.insert(package.clone());
            }
        }
        Ok(())
    }

    fn loaded_packages(&self) -> BTreeSet<String> {
        self.loaded.lock().clone()
    }

    fn has_module(&self, name: &str) -> bool {
        self.behavior.modules.iter().any(|m| m == name)
    }

    fn fallback_install(&self, packages: &[String]) -> Result<(), EngineError> {
        self.record(format!("fallback:{}", packages.join(",")));
        self.fallback_calls.lock().push(packages.to_vec());
        if let Some(gate) = self.behavior.fallback_gate.as_ref() {
            gate.wait();
        }
        if self.behavior.fallback_fails {
            return Err(EngineError::Guest(
                "ValueError: Can't find a pure Python 3 wheel".to_string(),
            ));
        }
        self.loaded.lock().extend(packages.iter().cloned());
        Ok(())
    }

    fn create_session(
        &self,
        spec: GuestSessionSpec<'_>,
    ) -> Result<GuestSession<FakeBridge>, EngineError> {
        self.record(format!("create_session:{}:{}", spec.id, spec.filename));
        if self.behavior.fail_create_session {
            return Err(EngineError::Guest("SyntaxError: invalid syntax".to_string()));
        }
        if !spec.channel.is_bound() {
            return Err(EngineError::Guest("messenger is not defined".to_string()));
        }

        let id = spec.id;
        let journal = Arc::clone(&self.journal);
        let channel = spec.channel.clone();
        let fail_init = self.behavior.fail_init;
        let init = move |auto_instantiate: bool| {
            journal
                .lock()
                .push(format!("init:{}:{}", id, auto_instantiate));
            if fail_init {
                return Err(EngineError::Guest("RuntimeError: kernel crashed".to_string()));
            }
            channel.send(OperationMessage::from_raw(format!(
                r#"{{"op":"kernel-ready","session":"{}"}}"#,
                id
            )));
            Ok(())
        };

        Ok(GuestSession {
            bridge: FakeBridge {
                id,
                channel: spec.channel,
            },
            init: Box::new(init),
            packages: self.behavior.discovered.clone(),
        })
    }

    fn release_session(&self, id: SessionId) {
        self.record(format!("release_session:{}", id));
    }
}
