//! `run` command: one guarded execution in the foreground.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use miette::Result;
use tracing::{error, info};

use cronlease_lease::{LeaseStore, RedisLeaseStore};
use cronlease_runner::{ExecutionRequest, LeaseLossPolicy, LeasedExecution, OutputSink};

use crate::config::Settings;
use crate::shutdown::install_shutdown_handler;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Stop renewing the lease at its first renewal point and let it expire
    #[arg(short = 'f', long = "fire-n-forget")]
    pub fire_and_forget: bool,

    /// Lease TTL in seconds (0 uses the configured default)
    #[arg(short = 'm', long, default_value_t = 0, value_name = "SECONDS")]
    pub mutex_ttl: u64,

    /// Discard the command's stdout and stderr
    #[arg(short = 'n', long)]
    pub noout: bool,

    /// Wait a random time below this many seconds before acquiring the lease
    #[arg(short = 'w', long, default_value_t = 0, value_name = "SECONDS")]
    pub random_wait: u64,

    /// Kill the command after this many seconds (0 for no limit)
    #[arg(short = 't', long, default_value_t = 0, value_name = "SECONDS")]
    pub ttl: u64,

    /// Log lease activity at info level
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Kill the command if another process takes over the lease
    #[arg(long)]
    pub kill_on_lease_loss: bool,

    /// Lease name
    pub name: String,

    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Build the request, flags winning over settings.
    pub fn request(&self, settings: &Settings) -> ExecutionRequest {
        let mutex_ttl = if self.mutex_ttl == 0 {
            settings.default_ttl()
        } else {
            Duration::from_secs(self.mutex_ttl)
        };

        let lease_loss = if self.kill_on_lease_loss {
            LeaseLossPolicy::Kill
        } else {
            settings.mutex.on_lease_loss
        };

        ExecutionRequest::new(self.name.clone(), self.command.clone())
            .with_prefix(settings.mutex.prefix.clone())
            .with_mutex_ttl(mutex_ttl)
            .with_task_ttl(Duration::from_secs(self.ttl))
            .with_random_wait(self.random_wait)
            .with_fire_and_forget(self.fire_and_forget)
            .with_lease_loss(lease_loss)
    }
}

pub async fn run(settings: &Settings, args: RunArgs) -> Result<ExitCode> {
    let store = RedisLeaseStore::new(&settings.redis_settings())
        .map_err(|e| miette::miette!("invalid redis settings: {}", e))?;
    let store: Arc<dyn LeaseStore> = Arc::new(store);

    let cancel = install_shutdown_handler()
        .map_err(|e| miette::miette!("failed to install signal handler: {}", e))?;

    let (stdout, stderr) = if args.noout {
        (OutputSink::Discard, OutputSink::Discard)
    } else {
        (OutputSink::Inherit, OutputSink::Inherit)
    };

    let execution = LeasedExecution::new(store, args.request(settings))
        .stdout(stdout)
        .stderr(stderr)
        .cancel_on(cancel);

    match execution.run().await {
        Ok(report) => Ok(ExitCode::from(report.outcome.exit_code() as u8)),
        Err(e) if e.is_lock_busy() => {
            info!(error = %e, "not running");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!(error = %e, "execution failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
