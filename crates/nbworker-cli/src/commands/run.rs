//! Run a notebook in the embedded guest and stream its operations.
//!
//! Operation messages are written to stdout as JSON lines in emission order;
//! everything else goes to stderr.

use super::{async_runtime, bootstrap_controller, load_settings};
use crate::errors::CliError;
use crate::GlobalOpts;
use clap::Args;
use nbworker_config::{query_params_from_pairs, BootstrapSettings, QueryParams, UserConfig};
use nbworker_core::{MessageCallback, OperationMessage, SessionInput, TailReport};
use nbworker_logger as logger;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct RunCommand {
    /// Notebook file to run
    pub file: PathBuf,

    /// Query parameter passed to the notebook (repeatable)
    #[arg(long = "query", short = 'p', value_name = "KEY=VALUE")]
    pub query: Vec<String>,

    /// JSON file with the user configuration handed to the guest
    #[arg(long, value_name = "FILE")]
    pub user_config: Option<PathBuf>,

    /// Open the notebook without running its cells
    #[arg(long)]
    pub no_auto_instantiate: bool,

    /// Exit once the session is initialized instead of streaming until Ctrl-C
    #[arg(long)]
    pub detach: bool,
}

/// Host-side inputs for one run, validated before the engine is touched
struct RunInput {
    code: String,
    filename: Option<String>,
    query_params: QueryParams,
    user_config: UserConfig,
}

impl RunCommand {
    fn prepare(&self) -> Result<RunInput, CliError> {
        let code = fs::read_to_string(&self.file).map_err(|source| CliError::Read {
            path: self.file.clone(),
            source,
        })?;
        let query_params =
            query_params_from_pairs(&self.query).map_err(CliError::InvalidArgument)?;

        let mut user_config = match &self.user_config {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| CliError::Read {
                    path: path.clone(),
                    source,
                })?;
                UserConfig::from_json_str(&content)?
            }
            None => UserConfig::default(),
        };
        if self.no_auto_instantiate {
            user_config.runtime.auto_instantiate = false;
        }

        Ok(RunInput {
            code,
            filename: self
                .file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            query_params,
            user_config,
        })
    }
}

pub fn handle_run(cmd: RunCommand, _opts: &GlobalOpts) -> Result<(), CliError> {
    let input = cmd.prepare()?;
    let settings = load_settings()?;
    let runtime = async_runtime()?;
    runtime.block_on(run_notebook(settings, input, cmd.detach))
}

async fn run_notebook(
    settings: BootstrapSettings,
    input: RunInput,
    detach: bool,
) -> Result<(), CliError> {
    let controller = bootstrap_controller(settings).await?;
    let filename = controller.mount_filesystem(&input.code, input.filename.as_deref())?;
    logger::debug(&format!("Notebook mounted as {}", filename));

    let start = controller.start_session(SessionInput {
        query_params: input.query_params,
        code: input.code,
        filename: Some(filename),
        on_message: stdout_sink(),
        user_config: input.user_config,
    })?;
    let id = start.id;
    tracing::debug!(session = %id, "session bridge ready");
    logger::info(&format!("Started {}", id));

    let report = start.tail.wait().await;
    let result = match report {
        Ok(report) => {
            summarize(&report);
            if detach {
                Ok(())
            } else {
                logger::success("Notebook running; press Ctrl-C to stop");
                tokio::signal::ctrl_c().await.map_err(CliError::Io)
            }
        }
        Err(e) => Err(e.into()),
    };

    controller.close_session(id);
    drop(start.bridge);
    result
}

fn stdout_sink() -> MessageCallback {
    Arc::new(|message: OperationMessage| {
        let mut stdout = std::io::stdout().lock();
        if writeln!(stdout, "{}", message).and_then(|()| stdout.flush()).is_err() {
            logger::warn("stdout closed; dropping notebook message");
        }
    })
}

fn summarize(report: &TailReport) {
    let resolution = &report.resolution;
    let native = resolution.to_load_natively();
    if !native.is_empty() {
        logger::info(&format!("Loaded natively: {}", native.join(", ")));
    }
    if !resolution.fallback_requested.is_empty() {
        logger::info(&format!(
            "Installed from package index: {}",
            resolution.fallback_requested.join(", ")
        ));
    }
    if let Some(err) = &resolution.native_error {
        logger::warn(&format!("Native package loading failed: {}", err));
    }
    if let Some(err) = &resolution.fallback_error {
        logger::warn(&format!("Some packages could not be installed: {}", err));
    }
    logger::debug(&format!(
        "{} initialized (auto_instantiate={})",
        report.session, report.auto_instantiate
    ));
}
