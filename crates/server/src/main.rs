mod app;
mod cli;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use helios_core::Config;

use crate::app::App;
use crate::cli::{CliArgs, Command};

fn load_config(args: &CliArgs) -> anyhow::Result<Config> {
    match &args.env_file {
        Some(path) => {
            if !helios_core::config::load_env_file(path) {
                warn!("Env file {} could not be loaded, using process environment", path.display());
            }
        }
        None => helios_core::config::load_dotenv(),
    }
    let profile = args.resolved_profile(std::env::var("HELIOS_PROFILE").ok());
    let mut config = Config::for_profile(&profile).context("invalid configuration")?;
    if args.no_startup {
        config.common.processing_on_startup = false;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
            println!("Available profiles: {}", Config::available_profiles().join(", "));
        }
        Command::Run => {
            info!("helios v{}", env!("CARGO_PKG_VERSION"));
            config.log_summary();
            App::build(&config).await?.run().await?;
        }
    }

    Ok(())
}
