use clap::{Parser, Subcommand};
use nbworker::{
    commands::{
        bootstrap::{self, BootstrapCommand},
        config::{self, ConfigAction},
        run::{self, RunCommand},
    },
    common::init_tracing,
    GlobalOpts,
};
use nbworker_logger as logger;

#[derive(Parser)]
#[command(name = "nbworker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Notebook worker for an embedded guest runtime",
    long_about = "nbworker boots an embedded Python engine, installs the packages a notebook needs, and streams the notebook session's operations as JSON lines."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure nbworker
    #[command(subcommand_required = false, arg_required_else_help = false)]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Load the guest engine and its base packages
    Bootstrap(BootstrapCommand),
    /// Run a notebook and stream its operations to stdout
    Run(RunCommand),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logger::init_with_verbosity(
        cli.global.verbosity_level(),
        cli.global.log_guest,
        cli.global.no_stdout,
    ) {
        eprintln!("Warning: Failed to initialize logger: {}", e);
    }
    init_tracing();

    let (name, result) = match cli.command {
        Commands::Config { action } => ("Config", config::handle_config(action, &cli.global)),
        Commands::Bootstrap(cmd) => ("Bootstrap", bootstrap::handle_bootstrap(cmd, &cli.global)),
        Commands::Run(cmd) => ("Run", run::handle_run(cmd, &cli.global)),
    };

    if let Err(e) = result {
        logger::error(&format!("{} command failed: {}", name, e));
        std::process::exit(1);
    }
}
