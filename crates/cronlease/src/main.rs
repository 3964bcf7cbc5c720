//! cronlease: commands guarded by a Redis lease
//!
//! Subcommands:
//! - `run`: run one command while holding a named lease
//! - `daemon`: run cron-scheduled commands, each under its own lease
//! - `version`: print version information

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;
mod run;
mod shutdown;

use config::Settings;
use run::RunArgs;

#[derive(Parser)]
#[command(name = "cronlease")]
#[command(about = "Run commands under a distributed Redis lease", long_about = None)]
struct Cli {
    /// Settings file (defaults to the first of /etc, the user config dir and ./cronlease.yml)
    #[arg(short = 'c', long, global = true, env = "CM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command if the named lease can be acquired
    Run(RunArgs),

    /// Run the cron scheduler (SIGHUP reloads the definitions file)
    Daemon {
        /// Schedule definitions file
        #[arg(value_name = "CRON_YML")]
        definitions: PathBuf,
    },

    /// Print version information
    Version,
}

/// Default log filter when `RUST_LOG` is unset.
fn default_filter(command: &Commands) -> &'static str {
    match command {
        Commands::Run(args) if args.verbose => "cronlease=info",
        Commands::Run(_) => "warn",
        Commands::Daemon { .. } | Commands::Version => "cronlease=info",
    }
}

fn version_line() -> String {
    format!(
        "cronlease {} -- {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("CRONLEASE_COMMIT").unwrap_or("unknown")
    )
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the guarded command.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(&cli.command).to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Commands::Version = cli.command {
        println!("{}", version_line());
        return Ok(ExitCode::SUCCESS);
    }

    let settings = Settings::load(cli.config.as_deref()).map_err(|e| miette::miette!("{}", e))?;

    match cli.command {
        Commands::Run(args) => run::run(&settings, args).await,
        Commands::Daemon { definitions } => {
            daemon::run(&settings, definitions).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => Ok(ExitCode::SUCCESS),
    }
}
