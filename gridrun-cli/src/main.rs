mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use gridrun_config::domains::logging::LogLevel;
use gridrun_config::{ConfigLoader, GridrunConfig};
use gridrun_logging::{init_logging, init_simple_tracing};
use std::path::PathBuf;
use tracing::{debug, info};

use cli::{Cli, Commands, ConfigCommands};
use commands::Managers;

fn load_config(config_path: Option<&PathBuf>) -> Result<GridrunConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => loader
            .from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config validation commands take their own file and must not fail on --config
    if matches!(
        &cli.command,
        Some(Commands::Config {
            config_cmd: ConfigCommands::Validate { .. } | ConfigCommands::Generate { .. },
        })
    ) {
        init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
    }
    if let Some(Commands::Config {
        config_cmd: ConfigCommands::Validate { config_file },
    }) = &cli.command
    {
        return commands::config::handle_config_validate(config_file);
    }
    if let Some(Commands::Config {
        config_cmd: ConfigCommands::Generate { output, force },
    }) = &cli.command
    {
        return commands::config::handle_config_generate(output, *force);
    }

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level
            .parse::<LogLevel>()
            .map_err(anyhow::Error::msg)?;
    }
    init_logging(&config.logging)?;

    match &cli.command {
        Some(Commands::Config { .. }) => commands::config::handle_config_show(&config),
        Some(command) => {
            info!("gridrun starting");
            let managers = Managers::start(&config)?;
            let result = match command {
                Commands::Run {
                    script,
                    args,
                    timeout_ms,
                    job_id,
                } => {
                    commands::run::handle_run(
                        &managers,
                        script,
                        args,
                        *timeout_ms,
                        job_id.as_deref(),
                    )
                    .await
                }
                Commands::Offload {
                    kind,
                    payload,
                    priority,
                    timeout_ms,
                } => {
                    commands::offload::handle_offload(&managers, kind, payload, priority, *timeout_ms)
                        .await
                }
                Commands::Stats => commands::stats::handle_stats(&managers).await,
                Commands::Config { .. } => Ok(()),
            };
            managers.shutdown().await;
            result
        }
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
