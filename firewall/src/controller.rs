//! Rule lifecycle controller
//!
//! Revocation is two ordered steps:
//! 1. delete the ACCEPT rule from the allow chain
//! 2. (stateless block) append a DROP rule for the same flow to the block chain
//!
//! Step 2 exists because an `ESTABLISHED,RELATED` accept rule would otherwise
//! keep an already-open connection alive after its allow rule is gone. The
//! block chain grows with every revocation and is pruned by external tooling.

use tracing::{debug, error, info, warn};

use crate::descriptor::ConnectionDescriptor;
use crate::error::{FirewallError, EXIT_SUCCESS};
use crate::executor::CommandRunner;
use crate::iptables::Iptables;

/// Enforcement state of one connection record. The record itself is held by
/// the caller; the controller only drives it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementState {
    Allowed,
    Removing,
    Removed,
    RemovalFailed,
    Blocking,
    Blocked,
    BlockFailed,
}

impl EnforcementState {
    /// The caller should mark the record stuck for manual remediation.
    pub fn is_stuck(self) -> bool {
        matches!(
            self,
            EnforcementState::RemovalFailed | EnforcementState::BlockFailed
        )
    }
}

/// What happened to one step of a revocation
#[derive(Debug)]
pub enum StepOutcome {
    Applied,
    Failed(FirewallError),
    /// Failed, but the caller asked for removal failures to be ignored
    Suppressed(FirewallError),
    /// Stateless block disabled
    Skipped,
    /// An earlier step failed
    NotAttempted,
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&FirewallError> {
        match self {
            StepOutcome::Failed(e) | StepOutcome::Suppressed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct RevocationReport {
    pub removal: StepOutcome,
    pub block: StepOutcome,
}

impl RevocationReport {
    pub fn succeeded(&self) -> bool {
        !self.removal.is_failed() && !self.block.is_failed()
    }

    /// Terminal state the caller's record should move to.
    pub fn state(&self) -> EnforcementState {
        if self.removal.is_failed() {
            return EnforcementState::RemovalFailed;
        }
        match self.block {
            StepOutcome::Applied => EnforcementState::Blocked,
            StepOutcome::Failed(_) => EnforcementState::BlockFailed,
            _ => EnforcementState::Removed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        [&self.removal, &self.block]
            .into_iter()
            .find_map(|step| match step {
                StepOutcome::Failed(e) => Some(e.exit_code()),
                _ => None,
            })
            .unwrap_or(EXIT_SUCCESS)
    }
}

pub struct RuleLifecycleController<R> {
    firewall: Iptables<R>,
    stateless_block: bool,
}

impl<R: CommandRunner> RuleLifecycleController<R> {
    pub fn new(firewall: Iptables<R>, stateless_block: bool) -> Self {
        Self {
            firewall,
            stateless_block,
        }
    }

    pub fn firewall(&self) -> &Iptables<R> {
        &self.firewall
    }

    /// Revoke access for `descriptor`.
    ///
    /// With `suppress_removal_failure` a failed allow-rule deletion is logged
    /// and the block step still runs. Used on the recovery pass after an
    /// interrupted run, where the rule has most likely been deleted already.
    pub async fn revoke(
        &self,
        descriptor: &ConnectionDescriptor,
        suppress_removal_failure: bool,
    ) -> RevocationReport {
        info!(
            client_device_id = %descriptor.client_device_id,
            client_ip = %descriptor.client_address,
            server_ip = %descriptor.server_address,
            protocol = %descriptor.protocol,
            ports = %descriptor.port_range,
            client_behind_nat = descriptor.client_behind_nat,
            duration_secs = descriptor.duration.as_secs(),
            suppress_removal_failure,
            "Revoking access"
        );

        debug!(state = ?EnforcementState::Removing, "Removing allow rule");
        let removal = match self.firewall.remove_allow(descriptor).await {
            Ok(_) => StepOutcome::Applied,
            Err(e) if suppress_removal_failure => {
                warn!(failure = e.kind(), "Ignoring failed allow rule removal: {e}");
                StepOutcome::Suppressed(e)
            }
            Err(e) => {
                error!(
                    state = ?EnforcementState::RemovalFailed,
                    failure = e.kind(),
                    "Failed to remove allow rule: {e}"
                );
                return RevocationReport {
                    removal: StepOutcome::Failed(e),
                    block: StepOutcome::NotAttempted,
                };
            }
        };

        if !self.stateless_block {
            debug!(state = ?EnforcementState::Removed, "Stateless block disabled");
            return RevocationReport {
                removal,
                block: StepOutcome::Skipped,
            };
        }

        debug!(state = ?EnforcementState::Blocking, "Inserting block rule");
        let block = match self.firewall.add_block(descriptor).await {
            Ok(_) => StepOutcome::Applied,
            Err(e) => {
                error!(
                    state = ?EnforcementState::BlockFailed,
                    failure = e.kind(),
                    "Failed to insert block rule: {e}"
                );
                StepOutcome::Failed(e)
            }
        };

        RevocationReport { removal, block }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeout() -> FirewallError {
        FirewallError::CommandTimeout {
            command: "iptables".into(),
            timeout: Duration::from_secs(15),
        }
    }

    #[test]
    fn test_report_success_states() {
        let report = RevocationReport {
            removal: StepOutcome::Applied,
            block: StepOutcome::Skipped,
        };
        assert!(report.succeeded());
        assert_eq!(report.state(), EnforcementState::Removed);
        assert_eq!(report.exit_code(), 0);

        let report = RevocationReport {
            removal: StepOutcome::Suppressed(timeout()),
            block: StepOutcome::Applied,
        };
        assert!(report.succeeded());
        assert_eq!(report.state(), EnforcementState::Blocked);
    }

    #[test]
    fn test_report_failure_states() {
        let report = RevocationReport {
            removal: StepOutcome::Failed(timeout()),
            block: StepOutcome::NotAttempted,
        };
        assert_eq!(report.state(), EnforcementState::RemovalFailed);
        assert!(report.state().is_stuck());
        assert_eq!(report.exit_code(), 2);

        let report = RevocationReport {
            removal: StepOutcome::Applied,
            block: StepOutcome::Failed(timeout()),
        };
        assert_eq!(report.state(), EnforcementState::BlockFailed);
        assert_eq!(report.exit_code(), 2);
        assert!(!EnforcementState::Allowed.is_stuck());
    }
}
