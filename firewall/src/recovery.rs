//! Interrupted-run recovery
//!
//! When the SPA server receives SIGINT it propagates to its children and can
//! cut a revocation off half way. Rather than leave the firewall in an
//! unknown state, the first pass is abandoned and one recovery pass runs with
//! removal failures suppressed: the allow rule was most likely already
//! deleted, but the block rule may not have been inserted yet.

use std::future::Future;
use tracing::warn;

use crate::controller::{RevocationReport, RuleLifecycleController};
use crate::descriptor::ConnectionDescriptor;
use crate::error::FirewallError;
use crate::executor::CommandRunner;

#[derive(Debug)]
pub struct RecoveryOutcome {
    pub report: RevocationReport,
    /// The first pass was interrupted and the report is from the recovery pass
    pub recovered: bool,
}

impl RecoveryOutcome {
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

/// Run a revocation, re-running it once if `interrupted` resolves first.
///
/// The recovery pass is not raced against further interruptions.
pub async fn revoke_with_recovery<R, F>(
    controller: &RuleLifecycleController<R>,
    descriptor: &ConnectionDescriptor,
    interrupted: F,
) -> RecoveryOutcome
where
    R: CommandRunner,
    F: Future<Output = ()>,
{
    tokio::select! {
        // The first pass must start before an already-pending interrupt is seen
        biased;
        report = controller.revoke(descriptor, false) => RecoveryOutcome {
            report,
            recovered: false,
        },
        _ = interrupted => {
            warn!(
                failure = "interrupted",
                "{}, re-running with removal failures suppressed",
                FirewallError::InterruptedRun
            );
            RecoveryOutcome {
                report: controller.revoke(descriptor, true).await,
                recovered: true,
            }
        }
    }
}
