//! SPA rule-remove extension
//!
//! Invoked by the SPA server when a client's authorization expires:
//!
//! ```text
//! rule-remove <CLIENT_DEVICE_ID> <ipv4|ipv6> <CLIENT_IP> <ipv4|ipv6> <SERVER_IP>
//!             <PROTOCOL> <START_PORT> <END_PORT> <BEHIND_NAT 1|0> <DURATION_SECS>
//! ```
//!
//! Exit status: 0 success, 1 bad input, 2 a filter command timed out or
//! failed to apply. Any non-zero status tells the server to mark the
//! connection's firewall state as stuck.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use spa_firewall::config::{self, ConfigSource, LoggingConfig};
use spa_firewall::descriptor::REQUIRED_ARGUMENTS;
use spa_firewall::error::{EXIT_BAD_INPUT, EXIT_SUCCESS};
use spa_firewall::logging::init_logging;
use spa_firewall::{
    revoke_with_recovery, BoundedExecutor, ConnectionDescriptor, Iptables,
    RuleLifecycleController,
};

#[derive(Parser, Debug)]
#[command(version, about = "Revoke an expired SPA firewall rule")]
struct Cli {
    /// Config file (default: $SPA_RULE_REMOVE_CONFIG or /etc/openspa/rule-remove.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Connection details passed by the SPA server
    #[arg(num_args = 10, value_names = REQUIRED_ARGUMENTS)]
    request: Vec<String>,
}

#[tokio::main]
async fn main() {
    std::process::exit(run(std::env::args_os()).await);
}

/// Full invocation from raw arguments (program name first) to exit status.
async fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match try_run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rule-remove: {e:#}");
            EXIT_BAD_INPUT
        }
    }
}

async fn try_run<I, T>(args: I) -> Result<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return Ok(EXIT_SUCCESS);
        }
        Err(e) => {
            init_logging(&LoggingConfig::default())?;
            error!(
                "Did not run correctly, expected {} required arguments: {}",
                REQUIRED_ARGUMENTS.len(),
                REQUIRED_ARGUMENTS.join(" ")
            );
            let _ = e.print();
            return Ok(EXIT_BAD_INPUT);
        }
    };

    let config_path = config::config_path(cli.config.as_deref());
    let (config, source) = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    init_logging(&config.logging)?;
    if source == ConfigSource::Defaults {
        warn!("Config file not found at {}, using defaults", config_path.display());
    }

    let descriptor = match ConnectionDescriptor::from_args(&cli.request[..]) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!(failure = e.kind(), "{e}");
            return Ok(e.exit_code());
        }
    };

    // Registered before any rule is touched so an early SIGINT is not lost
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;
    let interrupted = async move {
        if sigint.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    };

    let executor = BoundedExecutor::new(config.executor.command_timeout());
    let controller = RuleLifecycleController::new(
        Iptables::from_config(&config, executor),
        config.firewall.stateless_block,
    );

    let outcome = revoke_with_recovery(&controller, &descriptor, interrupted).await;
    let state = outcome.report.state();
    if outcome.report.succeeded() {
        info!(state = ?state, recovered = outcome.recovered, "Access revoked");
    } else {
        warn!(
            state = ?state,
            recovered = outcome.recovered,
            "Revocation incomplete, firewall state needs manual inspection"
        );
    }

    Ok(outcome.exit_code())
}
