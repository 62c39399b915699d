use super::{async_runtime, bootstrap_controller, load_settings};
use crate::errors::CliError;
use crate::GlobalOpts;
use clap::Args;
use nbworker_logger as logger;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct BootstrapCommand {
    /// Write a memory snapshot of the loaded engine to this path
    #[arg(long, value_name = "PATH")]
    pub snapshot: Option<PathBuf>,
}

pub fn handle_bootstrap(cmd: BootstrapCommand, _opts: &GlobalOpts) -> Result<(), CliError> {
    let mut settings = load_settings()?;
    if let Some(path) = cmd.snapshot {
        settings.make_snapshot = true;
        settings.snapshot_path = Some(path);
    }
    logger::debug(&format!(
        "Engine directory: {}",
        settings.engine_dir().display()
    ));

    let runtime = async_runtime()?;
    runtime.block_on(bootstrap_controller(settings))?;
    logger::success("Guest runtime bootstrapped");
    Ok(())
}
