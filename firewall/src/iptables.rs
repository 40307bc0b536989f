//! iptables front end
//!
//! Every rule mutation goes through [`Iptables::apply`], so allow-rule
//! insertion and removal and block-rule insertion share one code path for
//! building, executing and classifying the filter command.

use tracing::{error, info, warn};

use crate::command::{FilterCommand, FilterTarget, RuleCommandBuilder};
use crate::config::RuleRemoveConfig;
use crate::descriptor::{AddressFamily, ConnectionDescriptor};
use crate::error::FirewallError;
use crate::executor::{CommandOutcome, CommandRunner};

pub struct Iptables<R> {
    builder: RuleCommandBuilder,
    runner: R,
}

impl<R: CommandRunner> Iptables<R> {
    pub fn new(builder: RuleCommandBuilder, runner: R) -> Self {
        Self { builder, runner }
    }

    pub fn from_config(config: &RuleRemoveConfig, runner: R) -> Self {
        Self::new(
            RuleCommandBuilder::new(&config.firewall, config.executor.lock_wait_secs),
            runner,
        )
    }

    pub fn builder(&self) -> &RuleCommandBuilder {
        &self.builder
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Build and run the command for `target`, turning timeouts and non-zero
    /// exits into errors.
    pub async fn apply(
        &self,
        descriptor: &ConnectionDescriptor,
        target: FilterTarget,
    ) -> Result<CommandOutcome, FirewallError> {
        let command = self.builder.build(descriptor, target);
        info!(command = %command, "Running command");
        self.execute(command).await
    }

    /// Insert the temporary accept rule. Its removal later has to reproduce
    /// these arguments exactly.
    pub async fn add_allow(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<CommandOutcome, FirewallError> {
        self.apply(descriptor, FilterTarget::ADD_ALLOW).await
    }

    pub async fn remove_allow(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<CommandOutcome, FirewallError> {
        self.apply(descriptor, FilterTarget::REMOVE_ALLOW).await
    }

    pub async fn add_block(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<CommandOutcome, FirewallError> {
        self.apply(descriptor, FilterTarget::ADD_BLOCK).await
    }

    /// Verify both filter tools can be executed (`-V`).
    pub async fn check(&self) -> Result<(), FirewallError> {
        for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            let command = FilterCommand::new(self.builder.program(family), vec!["-V".into()]);
            let outcome = self.execute(command).await?;
            info!(family = %family, version = %outcome.stdout, "Filter tool available");
        }
        Ok(())
    }

    async fn execute(&self, command: FilterCommand) -> Result<CommandOutcome, FirewallError> {
        let outcome = match self.runner.run(&command).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(command = %command, failure = e.kind(), "Failed to start command: {e}");
                return Err(e);
            }
        };

        if outcome.timed_out {
            warn!(
                command = %command,
                failure = "timeout",
                "Command timed out (in {} seconds), process killed",
                self.runner.timeout().as_secs()
            );
            return Err(FirewallError::CommandTimeout {
                command: command.to_string(),
                timeout: self.runner.timeout(),
            });
        }

        if !outcome.succeeded {
            warn!(
                command = %command,
                failure = "rejected",
                exit_code = outcome.exit_code,
                "Failed to execute command"
            );
            if !outcome.stdout.is_empty() {
                error!("stdout: {}", outcome.stdout);
            }
            if !outcome.stderr.is_empty() {
                error!("stderr: {}", outcome.stderr);
            }
            return Err(FirewallError::CommandFailed {
                command: command.to_string(),
                exit_code: outcome.exit_code,
                stderr: outcome.stderr,
            });
        }

        info!(command = %command, elapsed = ?outcome.elapsed, "Successfully executed command");
        Ok(outcome)
    }
}
