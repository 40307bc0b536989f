//! Filter command builder
//!
//! Turns a connection descriptor plus a chain/verb combination into the exact
//! iptables (or ip6tables) argument list. Pure and deterministic: deletion in
//! iptables matches on rule content, so a removal must reproduce the argument
//! set used at insertion byte for byte.

use std::fmt;

use crate::config::FirewallConfig;
use crate::descriptor::{AddressFamily, ConnectionDescriptor};

/// Which chain a rule lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// Temporary accept rules for currently authorized clients
    Allow,
    /// Compensating drop rules inserted when access expires
    Block,
}

/// Chain plus verb plus verdict.
///
/// append=true,  accept=true  → add a rule that is allowed (ACCEPT)
/// append=false, accept=true  → remove a rule added with the previous combo
/// append=true,  accept=false → add a rule that is dropped (DROP)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterTarget {
    pub chain: Chain,
    pub append: bool,
    pub accept: bool,
}

impl FilterTarget {
    pub const ADD_ALLOW: FilterTarget = FilterTarget {
        chain: Chain::Allow,
        append: true,
        accept: true,
    };
    pub const REMOVE_ALLOW: FilterTarget = FilterTarget {
        chain: Chain::Allow,
        append: false,
        accept: true,
    };
    pub const ADD_BLOCK: FilterTarget = FilterTarget {
        chain: Chain::Block,
        append: true,
        accept: false,
    };
}

/// A fully built external command: program plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl FilterCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for FilterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds iptables/ip6tables invocations for the configured chains.
#[derive(Debug, Clone)]
pub struct RuleCommandBuilder {
    iptables: String,
    ip6tables: String,
    allow_chain: String,
    block_chain: String,
    lock_wait_secs: u64,
}

impl RuleCommandBuilder {
    pub fn new(config: &FirewallConfig, lock_wait_secs: u64) -> Self {
        Self {
            iptables: config.iptables_command.clone(),
            ip6tables: config.ip6tables_command.clone(),
            allow_chain: config.allow_chain.clone(),
            block_chain: config.block_chain.clone(),
            lock_wait_secs,
        }
    }

    /// Filter tool for an address family.
    pub fn program(&self, family: AddressFamily) -> &str {
        match family {
            AddressFamily::Ipv4 => &self.iptables,
            AddressFamily::Ipv6 => &self.ip6tables,
        }
    }

    pub fn chain_name(&self, chain: Chain) -> &str {
        match chain {
            Chain::Allow => &self.allow_chain,
            Chain::Block => &self.block_chain,
        }
    }

    pub fn build(&self, descriptor: &ConnectionDescriptor, target: FilterTarget) -> FilterCommand {
        let verb = if target.append { "--append" } else { "--delete" };

        // --wait makes concurrent invocations queue on the xtables lock
        let mut args = vec![
            "--wait".to_string(),
            self.lock_wait_secs.to_string(),
            verb.to_string(),
            self.chain_name(target.chain).to_string(),
            "--source".to_string(),
            descriptor.client_address.clone(),
            "-p".to_string(),
            descriptor.protocol.as_str().to_string(),
        ];

        if descriptor.protocol.has_ports() {
            let ports = descriptor.port_range;
            if ports.is_single() {
                args.extend(["--dport".to_string(), ports.start().to_string()]);
            } else {
                args.extend([
                    "--match".to_string(),
                    "multiport".to_string(),
                    "--dport".to_string(),
                    format!("{}:{}", ports.start(), ports.end()),
                ]);
            }
        }

        let verdict = if target.accept { "ACCEPT" } else { "DROP" };
        args.extend(["--jump".to_string(), verdict.to_string()]);

        FilterCommand::new(self.program(descriptor.address_family), args)
    }
}
