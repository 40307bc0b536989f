//! Revocation lifecycle tests
//!
//! Drive the controller through a scripted runner that records every
//! command, and through the real executor with stand-in filter tools.

use async_trait::async_trait;
use spa_firewall::config::RuleRemoveConfig;
use spa_firewall::{
    revoke_with_recovery, AddressFamily, BoundedExecutor, CommandOutcome, CommandRunner,
    ConnectionDescriptor, EnforcementState, FilterCommand, FirewallError, Iptables, PortRange,
    Protocol, RuleLifecycleController, StepOutcome,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// Scripted runner
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail(i32),
    TimeOut,
    /// Never completes; the caller has to abandon the run
    Hang,
}

struct ScriptedRunner {
    script: Mutex<VecDeque<Behaviour>>,
    calls: Mutex<Vec<FilterCommand>>,
}

impl ScriptedRunner {
    fn new(script: &[Behaviour]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<FilterCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn run(&self, command: &FilterCommand) -> Result<CommandOutcome, FirewallError> {
        self.calls.lock().unwrap().push(command.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behaviour::Succeed);
        match next {
            Behaviour::Succeed => Ok(CommandOutcome::exited(
                0,
                String::new(),
                String::new(),
                Duration::ZERO,
            )),
            Behaviour::Fail(code) => Ok(CommandOutcome::exited(
                code,
                String::new(),
                "iptables: Bad rule (does a matching rule exist in that chain?).".into(),
                Duration::ZERO,
            )),
            Behaviour::TimeOut => Ok(CommandOutcome::timed_out(Duration::from_secs(15))),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}

fn controller(
    script: &[Behaviour],
    stateless_block: bool,
) -> RuleLifecycleController<ScriptedRunner> {
    let mut config = RuleRemoveConfig::default();
    config.firewall.stateless_block = stateless_block;
    RuleLifecycleController::new(
        Iptables::from_config(&config, ScriptedRunner::new(script)),
        config.firewall.stateless_block,
    )
}

fn v4_https() -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        "203.0.113.5",
        AddressFamily::Ipv4,
        Protocol::Tcp,
        PortRange::single(443),
    )
}

fn v6_udp_range() -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        "2001:db8::5",
        AddressFamily::Ipv6,
        Protocol::Udp,
        PortRange::new(1000, 2000).unwrap(),
    )
}

// ============================================================================
// Controller scenarios
// ============================================================================

#[tokio::test]
async fn test_removal_only_succeeds() {
    let ctl = controller(&[Behaviour::Succeed], false);
    let report = ctl.revoke(&v4_https(), false).await;

    assert!(report.succeeded());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.state(), EnforcementState::Removed);
    assert!(matches!(report.block, StepOutcome::Skipped));

    let calls = ctl.firewall().runner().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "iptables");
    assert!(calls[0].args.contains(&"--delete".to_string()));
}

#[tokio::test]
async fn test_removal_failure_stops_before_block() {
    let ctl = controller(&[Behaviour::Fail(1)], true);
    let report = ctl.revoke(&v4_https(), false).await;

    assert!(!report.succeeded());
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.state(), EnforcementState::RemovalFailed);
    assert!(matches!(
        report.removal,
        StepOutcome::Failed(FirewallError::CommandFailed { exit_code: 1, .. })
    ));
    assert!(matches!(report.block, StepOutcome::NotAttempted));
    assert_eq!(ctl.firewall().runner().calls().len(), 1);
}

#[tokio::test]
async fn test_ipv6_range_removes_and_blocks() {
    let ctl = controller(&[Behaviour::Succeed, Behaviour::Succeed], true);
    let report = ctl.revoke(&v6_udp_range(), false).await;

    assert!(report.succeeded());
    assert_eq!(report.state(), EnforcementState::Blocked);

    let calls = ctl.firewall().runner().calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.program, "ip6tables");
        assert!(call.args.contains(&"1000:2000".to_string()));
        assert!(call.args.contains(&"multiport".to_string()));
    }
    assert_eq!(calls[0].args[2..4], ["--delete".to_string(), "OPENSPA".to_string()]);
    assert_eq!(calls[0].args.last().unwrap(), "ACCEPT");
    assert_eq!(calls[1].args[2..4], ["--append".to_string(), "OPENSPA-BLOCK".to_string()]);
    assert_eq!(calls[1].args.last().unwrap(), "DROP");
}

#[tokio::test]
async fn test_block_failure_is_reported() {
    let ctl = controller(&[Behaviour::Succeed, Behaviour::Fail(4)], true);
    let report = ctl.revoke(&v4_https(), false).await;

    assert!(!report.succeeded());
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.state(), EnforcementState::BlockFailed);
    assert!(report.state().is_stuck());
}

#[tokio::test]
async fn test_timeouts_share_exit_code_but_not_kind() {
    let ctl = controller(&[Behaviour::TimeOut], true);
    let timed_out = ctl.revoke(&v4_https(), false).await;
    let ctl = controller(&[Behaviour::Fail(1)], true);
    let rejected = ctl.revoke(&v4_https(), false).await;

    assert_eq!(timed_out.exit_code(), rejected.exit_code());
    let timeout_kind = timed_out.removal.error().map(FirewallError::kind);
    let rejected_kind = rejected.removal.error().map(FirewallError::kind);
    assert_eq!(timeout_kind, Some("timeout"));
    assert_eq!(rejected_kind, Some("rejected"));
}

#[tokio::test]
async fn test_suppressed_removal_failure_still_blocks() {
    let ctl = controller(&[Behaviour::Fail(1), Behaviour::Succeed], true);
    let report = ctl.revoke(&v4_https(), true).await;

    assert!(report.succeeded());
    assert!(matches!(report.removal, StepOutcome::Suppressed(_)));
    assert!(matches!(report.block, StepOutcome::Applied));
    assert_eq!(ctl.firewall().runner().calls().len(), 2);
}

#[tokio::test]
async fn test_suppression_does_not_hide_block_failure() {
    let ctl = controller(&[Behaviour::Fail(1), Behaviour::Fail(1)], true);
    let report = ctl.revoke(&v4_https(), true).await;

    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.state(), EnforcementState::BlockFailed);
}

#[tokio::test]
async fn test_icmp_has_no_port_arguments() {
    let ctl = controller(&[], true);
    let mut descriptor = v4_https();
    descriptor.protocol = Protocol::Icmp;
    ctl.revoke(&descriptor, false).await;

    for call in ctl.firewall().runner().calls() {
        assert!(!call.args.iter().any(|a| a == "--dport"));
    }
}

// ============================================================================
// Interrupted-run recovery
// ============================================================================

#[tokio::test]
async fn test_uninterrupted_run_is_not_recovered() {
    let ctl = controller(&[Behaviour::Succeed, Behaviour::Succeed], true);
    let outcome = revoke_with_recovery(&ctl, &v4_https(), std::future::pending()).await;

    assert!(!outcome.recovered);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(ctl.firewall().runner().calls().len(), 2);
}

#[tokio::test]
async fn test_interrupted_run_recovers_with_suppression() {
    // First pass hangs in the removal step. On the recovery pass the rule is
    // already gone, so deletion fails, but the block rule is still inserted.
    let ctl = controller(
        &[Behaviour::Hang, Behaviour::Fail(1), Behaviour::Succeed],
        true,
    );
    let (tx, rx) = oneshot::channel::<()>();
    tx.send(()).unwrap();

    let outcome = revoke_with_recovery(&ctl, &v4_https(), async {
        let _ = rx.await;
    })
    .await;

    assert!(outcome.recovered);
    assert!(matches!(outcome.report.removal, StepOutcome::Suppressed(_)));
    assert!(matches!(outcome.report.block, StepOutcome::Applied));
    assert_eq!(outcome.exit_code(), 0);

    let calls = ctl.firewall().runner().calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[2].args.contains(&"OPENSPA-BLOCK".to_string()));
}

#[tokio::test]
async fn test_recovery_reports_block_failure() {
    let ctl = controller(
        &[Behaviour::Hang, Behaviour::Fail(1), Behaviour::TimeOut],
        true,
    );
    let outcome = revoke_with_recovery(&ctl, &v4_https(), async {}).await;

    assert!(outcome.recovered);
    assert_eq!(outcome.report.state(), EnforcementState::BlockFailed);
    assert_eq!(outcome.exit_code(), 2);
}

// ============================================================================
// Real executor with stand-in tools
// ============================================================================

fn real_controller(tool: &str, timeout: Duration) -> RuleLifecycleController<BoundedExecutor> {
    let mut config = RuleRemoveConfig::default();
    config.firewall.iptables_command = tool.into();
    config.firewall.ip6tables_command = tool.into();
    RuleLifecycleController::new(
        Iptables::from_config(&config, BoundedExecutor::new(timeout)),
        true,
    )
}

#[tokio::test]
async fn test_end_to_end_with_true() {
    let ctl = real_controller("true", Duration::from_secs(5));
    let report = ctl.revoke(&v6_udp_range(), false).await;
    assert!(report.succeeded());
    assert_eq!(report.state(), EnforcementState::Blocked);
}

#[tokio::test]
async fn test_end_to_end_with_false() {
    let ctl = real_controller("false", Duration::from_secs(5));
    let report = ctl.revoke(&v4_https(), false).await;
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.state(), EnforcementState::RemovalFailed);
}

#[tokio::test]
async fn test_end_to_end_missing_tool() {
    let ctl = real_controller("/nonexistent/iptables", Duration::from_secs(5));
    let report = ctl.revoke(&v4_https(), false).await;
    assert_eq!(report.exit_code(), 2);
    assert!(matches!(
        report.removal,
        StepOutcome::Failed(FirewallError::Spawn { .. })
    ));
}
