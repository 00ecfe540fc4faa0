//! HOGP bridge entry point

use std::path::Path;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hogp_cli::{app, cli::Cli, config::AppConfig, Commands, Result};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration before logging so its level applies
    let config = AppConfig::load(cli.config.as_deref().map(Path::new), &cli.command.overrides());
    let level = config
        .as_ref()
        .map_or("info", |config| config.logging.level.as_str())
        .to_string();
    setup_logging(cli.verbose, &level);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = execute(cli.command, config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn execute(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Run { dry_run, .. } => {
            app::run_bridge(config, dry_run).await?;
            info!("HOGP bridge exited successfully");
        }
        Commands::Describe => print!("{}", app::describe(&config)?),
        Commands::PrintConfig => print!("{}", AppConfig::example_config()?),
    }
    Ok(())
}

/// Setup logging from the `-v` count, falling back to `RUST_LOG` and then
/// the configured level
fn setup_logging(verbose: u8, configured: &str) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
