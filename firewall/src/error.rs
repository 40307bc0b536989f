//! Error taxonomy for rule revocation

use std::time::Duration;
use thiserror::Error;

/// Process exit status for a successful run
pub const EXIT_SUCCESS: i32 = 0;
/// Malformed or incomplete invocation arguments (or unusable config)
pub const EXIT_BAD_INPUT: i32 = 1;
/// A filter command exceeded its time bound
pub const EXIT_COMMAND_TIMEOUT: i32 = 2;
/// A filter command ran and could not apply the rule
pub const EXIT_RULE_NOT_APPLIED: i32 = 2;

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid client device id: {0}")]
    InvalidDeviceId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("command `{command}` timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("command `{command}` exited with status {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("run was interrupted before completing")]
    InterruptedRun,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FirewallError {
    /// Exit status reported to the orchestrator for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            FirewallError::InvalidInput(_)
            | FirewallError::InvalidDescriptor(_)
            | FirewallError::InvalidDeviceId(_)
            | FirewallError::Config(_) => EXIT_BAD_INPUT,
            FirewallError::CommandTimeout { .. } => EXIT_COMMAND_TIMEOUT,
            FirewallError::CommandFailed { .. }
            | FirewallError::Spawn { .. }
            | FirewallError::InterruptedRun
            | FirewallError::Io(_) => EXIT_RULE_NOT_APPLIED,
        }
    }

    /// Short label used in the `failure` log field, so that failures sharing
    /// an exit status stay distinguishable in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            FirewallError::InvalidInput(_) => "invalid_input",
            FirewallError::InvalidDescriptor(_) => "invalid_descriptor",
            FirewallError::InvalidDeviceId(_) => "invalid_device_id",
            FirewallError::Config(_) => "config",
            FirewallError::CommandTimeout { .. } => "timeout",
            FirewallError::CommandFailed { .. } => "rejected",
            FirewallError::Spawn { .. } => "spawn",
            FirewallError::InterruptedRun => "interrupted",
            FirewallError::Io(_) => "io",
        }
    }
}
