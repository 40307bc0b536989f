//! SPA firewall rule lifecycle
//!
//! Revokes temporary access granted by a Single Packet Authorization server:
//! removes the client's ACCEPT rule from the allow chain and, with stateless
//! block enabled, inserts a DROP rule into the block chain so an established
//! connection cannot outlive its authorization.
//!
//! - [`command`]: pure iptables/ip6tables argument builder
//! - [`executor`]: runs a filter command under a hard timeout
//! - [`iptables`]: shared apply path for rule mutations
//! - [`controller`]: two-step revocation and exit status
//! - [`recovery`]: one-shot re-run after an interrupted revocation

pub mod collaborators;
pub mod command;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod iptables;
pub mod logging;
pub mod recovery;

pub use command::{Chain, FilterCommand, FilterTarget, RuleCommandBuilder};
pub use config::RuleRemoveConfig;
pub use controller::{EnforcementState, RevocationReport, RuleLifecycleController, StepOutcome};
pub use descriptor::{AddressFamily, ConnectionDescriptor, PortRange, Protocol};
pub use error::FirewallError;
pub use executor::{BoundedExecutor, CommandOutcome, CommandRunner};
pub use iptables::Iptables;
pub use recovery::{revoke_with_recovery, RecoveryOutcome};
