use crate::errors::CliError;
use crate::GlobalOpts;
use clap::Subcommand;
use colored::*;
use nbworker_config::Config;
use nbworker_logger as logger;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print every value set in the config file
    Show,
    /// Print a single value
    Get { key: String },
    /// Set a value and save the config file
    Set { key: String, value: String },
    /// Print the path of the config file
    Path,
}

pub fn handle_config(action: Option<ConfigAction>, opts: &GlobalOpts) -> Result<(), CliError> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let config = load()?;
            println!("{}", "Configuration:".bold().green());
            if config.is_empty() {
                if opts.verbosity_level() > 0 {
                    println!("  {}", "(empty)".yellow());
                }
            } else {
                for (key, value) in config.values_iter() {
                    println!("  {}: {}", key.cyan(), value);
                }
            }
        }
        ConfigAction::Get { key } => {
            let config = load()?;
            // Unset keys fall back to the resolved defaults where one exists.
            let value = config.get(&key).or_else(|| match key.as_str() {
                "engine-version" => Some(config.get_engine_version()),
                "build-version" => Some(config.get_build_version()),
                "engine-root" => Some(config.get_engine_root().display().to_string()),
                "venv-path" => Some(config.get_venv_path().display().to_string()),
                "session-module" => Some(config.get_session_module()),
                "make-snapshot" => Some("false".to_string()),
                _ => None,
            });
            match value {
                Some(value) => println!("{}", value),
                None if Config::is_known_key(&key) => {
                    logger::warn(&format!("{} is not set", key));
                }
                None => return Err(CliError::UnknownKey(key)),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = load()?;
            if !config.set(&key, value.clone()) {
                if Config::is_known_key(&key) {
                    return Err(CliError::InvalidValue { key, value });
                }
                return Err(CliError::UnknownKey(key));
            }
            config
                .save()
                .map_err(|e| CliError::Config(format!("failed to save: {}", e)))?;
            logger::success(&format!("Set {} = {}", key, value));
        }
        ConfigAction::Path => {
            let config_path = Config::path();
            logger::debug(&format!("Reading config from: {}", config_path.display()));
            println!("{}", config_path.display());
        }
    }
    Ok(())
}

fn load() -> Result<Config, CliError> {
    Config::load().map_err(|e| CliError::Config(e.to_string()))
}
