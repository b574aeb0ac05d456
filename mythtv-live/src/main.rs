//! mythtv-live: command-line live TV client for a MythTV backend.
//!
//! Starts live TV on a tuner, resolves the recording to a locally reachable
//! path and stops the session again on Ctrl-C.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::error;

use mythtv_client::{ClientConfig, ClientError};

mod commands;
mod logging;

use logging::{LogSettings, LoggingSection};

/// mythtv-live - Live TV client for the MythTV backend protocol
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Backend host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Backend protocol port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = logging::DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value_t = logging::DEFAULT_RETENTION_DAYS)]
    log_retention_days: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start live TV, print the local recording path and stop on Ctrl-C
    Watch {
        /// Channel number to tune
        #[arg(short, long)]
        channel: String,
    },
    /// List free tuner inputs
    Inputs,
    /// Log backend events until Ctrl-C
    Events,
    /// Show storage group maps after reconciling with the configured backend dirs
    Maps,
}

/// Sections of the config file read only by the binary.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    logging: LoggingSection,
}

fn load_logging_section(path: Option<&Path>) -> Result<LoggingSection, Box<dyn std::error::Error>> {
    let Some(path) = path.filter(|p| p.exists()) else {
        return Ok(LoggingSection::default());
    };
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config.logging)
}

fn apply_overrides(config: &mut ClientConfig, args: &Args) -> Result<(), ClientError> {
    if let Some(host) = &args.host {
        config.backend.host = host.clone();
    }
    if let Some(port) = args.port {
        config.backend.port = port;
    }
    config.validate()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > environment
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(mythtv_client::config::CONFIG_FILE_NAME);
        default_path.exists().then_some(default_path)
    });
    let mut config = match ClientConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    let logging_section = load_logging_section(config_path.as_deref())?;

    let log_settings = LogSettings::resolve(
        &args.log_dir,
        args.log_retention_days,
        args.verbose,
        &logging_section,
    );
    logging::init_logging(&log_settings)?;

    apply_overrides(&mut config, &args)?;

    let result = match &args.command {
        Command::Watch { channel } => commands::watch(&config, channel).await,
        Command::Inputs => commands::inputs(&config).await,
        Command::Events => commands::events(&config).await,
        Command::Maps => {
            commands::maps(&config);
            Ok(())
        }
    };

    if let Err(e) = &result {
        if e.is_configuration() {
            error!("Configuration error: {}", e);
        } else {
            error!("{}", e);
        }
    }
    result.map_err(Into::into)
}
