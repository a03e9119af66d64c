use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sun-blind controller scheduling core.
///
/// Runs timer alerts, sun transition events and weather checks, publishing
/// everything on the in-process event bus.
#[derive(Parser, Debug)]
#[command(name = "helios", version, about = "Sun-blind controller scheduling core")]
pub struct CliArgs {
    /// Env file loaded before the process environment is read (default: .env)
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Config profile; keys are looked up as {PROFILE}_{KEY} first
    /// (default: HELIOS_PROFILE from the environment or env file)
    #[arg(long)]
    pub profile: Option<String>,

    /// Skip start-up processing (initial ephemeris cache fill and weather check)
    #[arg(long)]
    pub no_startup: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the scheduling core until interrupted (default)
    Run,
    /// Print the effective configuration with secrets removed
    Config,
}

impl CliArgs {
    /// `--profile` if given, otherwise `env_profile`. The env file must be
    /// loaded before `env_profile` is read.
    pub fn resolved_profile(&self, env_profile: Option<String>) -> String {
        self.profile.clone().or(env_profile).unwrap_or_default()
    }
}
