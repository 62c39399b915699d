pub mod bootstrap;
pub mod config;
pub mod run;

use crate::errors::CliError;
use nbworker_config::{BootstrapSettings, Config};
use nbworker_core::WorkerController;
use nbworker_logger as logger;
use nbworker_python::PythonEngineLoader;

/// Load the config file and resolve it for the bootstrapper
pub(crate) fn load_settings() -> Result<BootstrapSettings, CliError> {
    let mut config = Config::load().map_err(|e| CliError::Config(e.to_string()))?;
    match config.ensure_uv_path() {
        Ok(path) => logger::debug(&format!("Using uv at {}", path)),
        Err(e) => logger::warn(&format!("{}", e)),
    }
    Ok(config.bootstrap_settings())
}

pub(crate) fn async_runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
}

/// Boot the engine behind a spinner
pub(crate) async fn bootstrap_controller(
    settings: BootstrapSettings,
) -> Result<WorkerController<PythonEngineLoader>, CliError> {
    let loader = PythonEngineLoader::new(&settings);
    let controller = WorkerController::new(loader, settings);

    logger::spinner_start(&format!(
        "Bootstrapping engine {}",
        controller.settings().engine_version
    ));
    match controller.bootstrap().await {
        Ok(_) => {
            logger::spinner_success("Engine ready");
            Ok(controller)
        }
        Err(e) => {
            logger::spinner_error("Engine bootstrap failed");
            Err(e.into())
        }
    }
}
