//! Orchestration core of the nbworker notebook worker
//!
//! Boots a guest engine once, prepares the notebook filesystem, and starts
//! notebook sessions whose dependency installation runs behind the host's
//! back:
//! 1. [`WorkerController::bootstrap`] loads the engine and the base packages.
//! 2. [`WorkerController::mount_filesystem`] writes the notebook file.
//! 3. [`WorkerController::start_session`] returns the session bridge at once
//!    and leaves augmentation, package resolution and `init` to a
//!    [`SessionTail`].
//!
//! Engines plug in through the traits in [`engine`].

pub mod augment;
pub mod bootstrap;
pub mod channel;
pub mod controller;
pub mod engine;
pub mod errors;
pub mod imports;
pub mod locator;
pub mod message;
pub mod session;

#[cfg(test)]
mod testing;

pub use augment::{augment, AugmentedSource, NotebookSource};
pub use bootstrap::{bootstrap_runtime, BASE_PACKAGES, DATA_PACKAGES};
pub use channel::{ChannelHandle, MessageCallback, Messenger, SessionContext};
pub use controller::{BridgeOf, WorkerController};
pub use engine::{
    DeferredInit, EngineLoadRequest, EngineLoader, GuestRuntime, GuestSession, GuestSessionSpec,
    LoadReporter, NotebookFileSystem, PackageRef, TracingReporter, NOTEBOOK_FILENAME,
};
pub use errors::{EngineError, WorkerError};
pub use imports::{find_imports, is_identifier, is_module_path};
pub use locator::{missing_packages, resolve, PackageSource, PackageSpec, Resolution};
pub use message::OperationMessage;
pub use session::{SessionId, SessionInput, SessionStart, SessionTail, TailReport};
pub use tokio_util::sync::CancellationToken;
