//! Session identity, inputs, and the background dependency task

use crate::channel::MessageCallback;
use crate::errors::WorkerError;
use crate::locator::Resolution;
use nbworker_config::{QueryParams, UserConfig};
use std::fmt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Everything the host supplies to start a notebook session
pub struct SessionInput {
    pub query_params: QueryParams,
    pub code: String,
    pub filename: Option<String>,
    pub on_message: MessageCallback,
    pub user_config: UserConfig,
}

/// Returned by `start_session` as soon as the guest session exists.
///
/// Holding the bridge does not mean dependencies are installed; await
/// [`SessionTail::wait`] for that.
pub struct SessionStart<B> {
    pub id: SessionId,
    pub bridge: B,
    pub tail: SessionTail,
}

/// Outcome of a session's dependency phase
#[derive(Debug, Clone)]
pub struct TailReport {
    pub session: SessionId,
    pub resolution: Resolution,
    /// The value `init` was called with
    pub auto_instantiate: bool,
}

/// Handle to the dependency-install-then-init task of one session
pub struct SessionTail {
    id: SessionId,
    handle: JoinHandle<Result<TailReport, WorkerError>>,
    cancel: CancellationToken,
}

impl SessionTail {
    pub(crate) fn new(
        id: SessionId,
        handle: JoinHandle<Result<TailReport, WorkerError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { id, handle, cancel }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Stop before the next phase; `init` will not run if it has not yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<TailReport, WorkerError> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(WorkerError::TailPanicked {
                session: self.id,
                message: err.to_string(),
            }),
        }
    }
}

impl fmt::Debug for SessionTail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTail")
            .field("id", &self.id)
            .field("finished", &self.handle.is_finished())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
