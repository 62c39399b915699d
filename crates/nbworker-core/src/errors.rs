use crate::session::SessionId;
use std::io;
use thiserror::Error;

/// Faults raised by a guest engine implementation
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Guest error: {0}")]
    Guest(String),

    #[error("Failed to load package(s) {packages:?}: {reason}")]
    PackageLoad {
        packages: Vec<String>,
        reason: String,
    },

    #[error("Failed to fetch '{resource}': {reason}")]
    Fetch { resource: String, reason: String },

    #[error("Filesystem error: {0}")]
    FileSystem(String),

    #[error("Memory snapshots are not supported by this engine")]
    SnapshotUnsupported,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Faults raised by the worker controller
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Guest runtime is not loaded; bootstrap must complete first")]
    RuntimeNotReady,

    #[error("Failed to bootstrap guest runtime: {0}")]
    BootstrapFailure(#[source] EngineError),

    #[error("Provider integration '{package}' failed to initialize: {source}")]
    ProviderInitFailure {
        package: String,
        #[source]
        source: EngineError,
    },

    #[error("Message channel is not initialized for {0}")]
    ChannelNotInitialized(SessionId),

    #[error("Failed to mount notebook filesystem: {0}")]
    Mount(#[source] EngineError),

    #[error("Failed to create guest session: {0}")]
    SessionCreate(#[source] EngineError),

    #[error("{0} was superseded before it finished initializing")]
    Superseded(SessionId),

    #[error("{session} failed to initialize: {source}")]
    InitFailure {
        session: SessionId,
        #[source]
        source: EngineError,
    },

    #[error("Background task for {session} panicked: {message}")]
    TailPanicked { session: SessionId, message: String },

    #[error("Bootstrap task panicked: {0}")]
    BootstrapPanicked(String),

    #[error("No async runtime available to schedule session work")]
    NoAsyncRuntime,
}
