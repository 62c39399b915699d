//! One-time guest runtime bootstrap
//!
//! The waterfall is strictly ordered and every step but the snapshot is fatal:
//! 1. Load the engine together with the base packages.
//! 2. Load the data tier, then the provider wheel when one is configured.
//! 3. Inject the provider token and construct its client.
//! 4. Optionally take a memory snapshot.

use crate::engine::{EngineLoadRequest, EngineLoader, GuestRuntime, PackageRef, TracingReporter};
use crate::errors::{EngineError, WorkerError};
use crate::imports::{is_identifier, is_module_path};
use nbworker_config::{BootstrapSettings, ProviderSettings};
use std::fs;
use tracing::{debug, info, info_span, warn};

/// Loaded while the engine itself boots
pub const BASE_PACKAGES: &[&str] = &[
    "micropip",
    "marimo-base",
    "Markdown",
    "pymdown-extensions",
    "narwhals",
    "packaging",
];

/// Loaded right after the engine is up
pub const DATA_PACKAGES: &[&str] = &["pandas", "requests", "httpx"];

pub fn bootstrap_runtime<L: EngineLoader>(
    loader: &L,
    settings: &BootstrapSettings,
) -> Result<L::Runtime, WorkerError> {
    let request = EngineLoadRequest {
        engine_version: settings.engine_version.clone(),
        build_version: settings.build_version.clone(),
        packages: BASE_PACKAGES.iter().map(|p| p.to_string()).collect(),
        lock_file: settings.lock_file(),
        package_index: settings.package_index(),
        make_snapshot: settings.make_snapshot,
    };

    let runtime = {
        let _span = info_span!("load_engine", version = %settings.engine_version).entered();
        info!(
            "Loading guest engine {} (build {})",
            request.engine_version, request.build_version
        );
        loader.load(&request).map_err(|e| {
            tracing::error!("Failed to load guest engine: {}", e);
            WorkerError::BootstrapFailure(e)
        })?
    };

    load_data_tier(&runtime, settings.provider.as_ref())?;

    if let Some(provider) = settings.provider.as_ref() {
        init_provider(&runtime, provider)?;
    }

    if settings.make_snapshot {
        take_snapshot(&runtime, settings);
    }

    info!("Guest runtime ready");
    Ok(runtime)
}

fn load_data_tier<R: GuestRuntime>(
    runtime: &R,
    provider: Option<&ProviderSettings>,
) -> Result<(), WorkerError> {
    let _span = info_span!("load_packages").entered();
    let reporter = TracingReporter { phase: "bootstrap" };

    let data: Vec<PackageRef> = DATA_PACKAGES.iter().map(|p| PackageRef::named(*p)).collect();
    info!("Installing data packages: {}", DATA_PACKAGES.join(", "));
    runtime
        .load_packages(&data, &reporter)
        .map_err(WorkerError::BootstrapFailure)?;

    if let Some(provider) = provider {
        info!("Installing provider wheel {}", provider.wheel.display());
        runtime
            .load_packages(&[PackageRef::Wheel(provider.wheel.clone())], &reporter)
            .map_err(WorkerError::BootstrapFailure)?;
    }
    Ok(())
}

fn init_provider<R: GuestRuntime>(
    runtime: &R,
    provider: &ProviderSettings,
) -> Result<(), WorkerError> {
    let _span = info_span!("init_provider", package = %provider.package).entered();
    let failure = |source: EngineError| WorkerError::ProviderInitFailure {
        package: provider.package.clone(),
        source,
    };

    check_provider_names(provider).map_err(failure)?;
    let token = provider.resolve_token().ok_or_else(|| {
        failure(EngineError::Guest(format!(
            "environment variable {} is not set",
            provider.token_env
        )))
    })?;
    let code = provider_init_code(provider, &token).map_err(failure)?;
    runtime.run_code(&code).map_err(|e| {
        tracing::error!("Provider '{}' failed to initialize: {}", provider.package, e);
        failure(e)
    })?;
    info!("Provider '{}' configured", provider.package);
    Ok(())
}

/// `package` and `client` are spliced into guest source as code
fn check_provider_names(provider: &ProviderSettings) -> Result<(), EngineError> {
    if !is_module_path(&provider.package) {
        return Err(EngineError::Guest(format!(
            "invalid provider package '{}'",
            provider.package.escape_debug()
        )));
    }
    if !is_identifier(&provider.client) {
        return Err(EngineError::Guest(format!(
            "invalid provider client '{}'",
            provider.client.escape_debug()
        )));
    }
    Ok(())
}

/// Guest code exporting the token and constructing the provider client.
///
/// Values are embedded as JSON string literals, which the guest parses as
/// ordinary string literals.
pub fn provider_init_code(provider: &ProviderSettings, token: &str) -> Result<String, EngineError> {
    check_provider_names(provider)?;
    let literal = |value: &str| {
        serde_json::to_string(value).map_err(|e| EngineError::Guest(format!("invalid literal: {}", e)))
    };
    let token = literal(token)?;
    let env_name = literal(&provider.token_env)?;

    Ok(format!(
        "import os\n\
         os.environ[{env_name}] = {token}\n\
         from {package} import {client}\n\
         _provider_client = {client}(token={token})\n",
        env_name = env_name,
        token = token,
        package = provider.package,
        client = provider.client,
    ))
}

fn take_snapshot<R: GuestRuntime>(runtime: &R, settings: &BootstrapSettings) {
    let _span = info_span!("make_snapshot").entered();
    let snapshot = match runtime.make_snapshot() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Skipping memory snapshot: {}", e);
            return;
        }
    };
    info!(
        "Snapshot size (MiB): {:.2}",
        snapshot.len() as f64 / 1024.0 / 1024.0
    );

    let Some(path) = settings.snapshot_path.as_ref() else {
        debug!("No snapshot path configured; snapshot discarded");
        return;
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Failed to create {}: {}", parent.display(), e);
            return;
        }
    }
    match fs::write(path, &snapshot) {
        Ok(()) => info!("Snapshot written to {}", path.display()),
        Err(e) => warn!("Failed to write snapshot to {}: {}", path.display(), e),
    }
}
