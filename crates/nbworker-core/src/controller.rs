//! The worker controller: bootstrap once, mount, then start sessions
//!
//! `start_session` returns as soon as the guest session object exists. The
//! dependency phase (augment, resolve, install) and the deferred `init` run
//! afterwards as a [`SessionTail`] on tokio's blocking pool. Starting another
//! session supersedes the current one: its tail is cancelled, its channel
//! handles stop delivering, and its `init` never runs if it has not already.

use crate::augment::{augment, NotebookSource};
use crate::bootstrap::bootstrap_runtime;
use crate::channel::{Messenger, SessionContext};
use crate::engine::{
    DeferredInit, EngineLoader, GuestRuntime, GuestSession, GuestSessionSpec, NotebookFileSystem,
    NOTEBOOK_FILENAME,
};
use crate::errors::WorkerError;
use crate::locator::resolve;
use crate::session::{SessionId, SessionInput, SessionStart, SessionTail, TailReport};
use nbworker_config::BootstrapSettings;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span};

/// Bridge type produced by a loader's runtime
pub type BridgeOf<L> = <<L as EngineLoader>::Runtime as GuestRuntime>::Bridge;

struct ActiveSession {
    id: SessionId,
    cancel: CancellationToken,
}

struct Inner<L: EngineLoader> {
    loader: L,
    settings: BootstrapSettings,
    runtime: OnceCell<Arc<L::Runtime>>,
    messenger: Messenger,
    active: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

pub struct WorkerController<L: EngineLoader> {
    inner: Arc<Inner<L>>,
}

impl<L: EngineLoader> Clone for WorkerController<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: EngineLoader> WorkerController<L> {
    pub fn new(loader: L, settings: BootstrapSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                settings,
                runtime: OnceCell::new(),
                messenger: Messenger::new(),
                active: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn loader(&self) -> &L {
        &self.inner.loader
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.inner.settings
    }

    pub fn messenger(&self) -> &Messenger {
        &self.inner.messenger
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.inner.active.lock().as_ref().map(|active| active.id)
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.inner.runtime.initialized()
    }

    /// Load the guest runtime, at most once per controller.
    ///
    /// Concurrent callers share the in-flight load. A failed load leaves the
    /// controller unbootstrapped so a later call can retry.
    pub async fn bootstrap(&self) -> Result<Arc<L::Runtime>, WorkerError> {
        let inner = Arc::clone(&self.inner);
        let runtime = self
            .inner
            .runtime
            .get_or_try_init(move || async move {
                let task = tokio::task::spawn_blocking(move || {
                    bootstrap_runtime(&inner.loader, &inner.settings)
                });
                match task.await {
                    Ok(result) => result.map(Arc::new),
                    Err(e) => Err(WorkerError::BootstrapPanicked(e.to_string())),
                }
            })
            .await?;
        Ok(Arc::clone(runtime))
    }

    /// The loaded runtime, or `RuntimeNotReady` before bootstrap completes
    pub fn runtime(&self) -> Result<Arc<L::Runtime>, WorkerError> {
        self.inner
            .runtime
            .get()
            .cloned()
            .ok_or(WorkerError::RuntimeNotReady)
    }

    /// Prepare the notebook filesystem and write the notebook file.
    ///
    /// Returns the filename the session should be started with.
    pub fn mount_filesystem(&self, code: &str, filename: Option<&str>) -> Result<String, WorkerError> {
        let runtime = self.runtime()?;
        let _span = info_span!("mount_filesystem").entered();
        runtime.create_home_dir().map_err(WorkerError::Mount)?;
        runtime.mount_fs().map_err(WorkerError::Mount)?;
        runtime
            .populate_files_to_memory()
            .map_err(WorkerError::Mount)?;
        let name = runtime
            .init_notebook_code(code, filename)
            .map_err(WorkerError::Mount)?;
        debug!("Notebook mounted as {}", name);
        Ok(name)
    }

    /// Create a guest session and hand back its bridge immediately.
    ///
    /// Must be called from within a tokio runtime; the dependency tail is
    /// spawned onto it.
    pub fn start_session(&self, input: SessionInput) -> Result<SessionStart<BridgeOf<L>>, WorkerError> {
        let runtime = self.runtime()?;
        let handle = Handle::try_current().map_err(|_| WorkerError::NoAsyncRuntime)?;

        let SessionInput {
            query_params,
            code,
            filename,
            on_message,
            user_config,
        } = input;
        let auto_instantiate = user_config.runtime.auto_instantiate;
        let cancel = CancellationToken::new();

        let id = {
            let mut active = self.inner.active.lock();
            let id = SessionId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            if let Some(previous) = active.take() {
                info!("{} supersedes {}", id, previous.id);
                previous.cancel.cancel();
            }
            self.inner.messenger.install(SessionContext {
                id,
                callback: on_message,
                query_params,
                user_config,
            });
            *active = Some(ActiveSession {
                id,
                cancel: cancel.clone(),
            });
            id
        };

        let _span = info_span!("start_session", session = %id).entered();
        let context = self.inner.messenger.context(id)?;
        let filename = filename.unwrap_or_else(|| NOTEBOOK_FILENAME.to_string());

        let created = runtime.create_session(GuestSessionSpec {
            id,
            filename: &filename,
            code: &code,
            channel: self.inner.messenger.handle(id),
            query_params: &context.query_params,
            user_config: &context.user_config,
        });
        let GuestSession {
            bridge,
            init,
            packages,
        } = match created {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create {}: {}", id, e);
                self.release(id);
                return Err(WorkerError::SessionCreate(e));
            }
        };
        info!(packages = packages.len(), "Created {}", id);

        let source = NotebookSource::new(code, Some(filename));
        let token = cancel.clone();
        let task = handle.spawn_blocking(move || {
            let result = run_tail(
                id,
                runtime.as_ref(),
                &source,
                packages,
                init,
                auto_instantiate,
                &token,
            );
            match result {
                Err(WorkerError::Superseded(_)) => info!("{} superseded; init skipped", id),
                Err(ref e) => error!("{}", e),
                Ok(_) => {}
            }
            result
        });

        Ok(SessionStart {
            id,
            bridge,
            tail: SessionTail::new(id, task, cancel),
        })
    }

    /// End `id` if it is still the active session; returns whether it was
    pub fn close_session(&self, id: SessionId) -> bool {
        let closed = self.release(id);
        if closed {
            info!("Closed {}", id);
        }
        closed
    }

    fn release(&self, id: SessionId) -> bool {
        let mut active = self.inner.active.lock();
        if !active.as_ref().is_some_and(|a| a.id == id) {
            return false;
        }
        if let Some(current) = active.take() {
            current.cancel.cancel();
        }
        self.inner.messenger.clear_if(id);
        if let Some(runtime) = self.inner.runtime.get() {
            runtime.release_session(id);
        }
        true
    }
}

fn run_tail<R: GuestRuntime>(
    id: SessionId,
    runtime: &R,
    source: &NotebookSource,
    packages: Vec<String>,
    init: Box<dyn DeferredInit>,
    auto_instantiate: bool,
    cancel: &CancellationToken,
) -> Result<TailReport, WorkerError> {
    let _span = info_span!("session_tail", session = %id).entered();
    if cancel.is_cancelled() {
        return Err(WorkerError::Superseded(id));
    }

    let augmented = augment(source);
    let discovered: BTreeSet<String> = packages.into_iter().collect();
    let resolution = resolve(runtime, &augmented, &discovered, cancel);
    if resolution.cancelled || cancel.is_cancelled() {
        return Err(WorkerError::Superseded(id));
    }

    info!(auto_instantiate, "Initializing {}", id);
    init.init(auto_instantiate)
        .map_err(|source| WorkerError::InitFailure {
            session: id,
            source,
        })?;

    Ok(TailReport {
        session: id,
        resolution,
        auto_instantiate,
    })
}
