use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rp_cli::commands::{final_export, migrate, serve, status};
use rp_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // stdout carries command output (JSON for `serve`), so logs go to stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let stdout = io::stdout();
    match &cli.command {
        Some(Commands::Serve) => {
            let config = load_config(cli.config.as_deref())?;
            let mut service = serve::SessionService::new(config)?;
            let result = serve::run(&service, io::stdin().lock(), &mut stdout.lock());
            service.shutdown();
            result?;
        }
        Some(Commands::FinalExport {
            metadata,
            recordings,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            final_export::run(&mut stdout.lock(), &config, metadata, recordings)?;
        }
        Some(Commands::Migrate) => {
            let config = load_config(cli.config.as_deref())?;
            migrate::run(&mut stdout.lock(), &config)?;
        }
        Some(Commands::Status) => {
            let config = load_config(cli.config.as_deref())?;
            status::run(&mut stdout.lock(), &config)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
