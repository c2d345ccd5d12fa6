//! `qc` CLI entry point.

use anyhow::Result;
use clap::Parser;

use quality_control::cli::commands::{self, objects, run, validate};
use quality_control::cli::{handle_error, Cli, Commands};
use quality_control::infrastructure::config::ConfigLoader;
use quality_control::infrastructure::logging::{LogConfig, LoggerImpl};

/// Logging settings of the configuration the command will use, if it loads
fn log_config(cli: &Cli) -> LogConfig {
    let explicit = match &cli.command {
        Commands::Validate { path } | Commands::Run { path, .. } => path.as_deref(),
        Commands::Objects(_) => None,
    };
    explicit
        .or(cli.config.as_deref())
        .and_then(|path| ConfigLoader::load_from_file(path).ok())
        .map(|config| config.qc.config.logging)
        .unwrap_or_default()
}

async fn dispatch(cli: Cli) -> Result<()> {
    let global = cli.config.as_deref();
    match cli.command {
        Commands::Validate { path } => {
            let path = commands::config_path(path, global)?;
            validate::execute(&path, cli.json)
        }
        Commands::Run {
            path,
            cycles,
            messages_per_cycle,
            seed,
            run,
        } => {
            let path = commands::config_path(path, global)?;
            let options = run::RunOptions {
                cycles,
                messages_per_cycle,
                seed,
                run,
            };
            run::execute(&path, options, cli.json).await
        }
        Commands::Objects(command) => {
            let path = commands::config_path(None, global)?;
            objects::execute(command, &path, cli.json).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let logger = match LoggerImpl::init(&log_config(&cli)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let result = dispatch(cli).await;
    // Flush file logs before a possible exit
    drop(logger);
    if let Err(err) = result {
        handle_error(err, json);
    }
}
