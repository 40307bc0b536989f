//! Connection descriptor: the authorized flow being revoked
//!
//! Built from the ten positional inputs the SPA server passes to the
//! rule-remove extension:
//!
//! `<DEVICE_ID> <ipv4|ipv6> <CLIENT_IP> <ipv4|ipv6> <SERVER_IP> <PROTOCOL>
//!  <START_PORT> <END_PORT> <BEHIND_NAT 1|0> <DURATION_SECS>`

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::FirewallError;

/// Names of the positional inputs, in order. Used for usage diagnostics.
pub const REQUIRED_ARGUMENTS: [&str; 10] = [
    "<CLIENT_DEVICE_ID>",
    "<Client IP is \"ipv4\"/\"ipv6\">",
    "<CLIENT_IP_ADDRESS>",
    "<Server IP is \"ipv4\"/\"ipv6\">",
    "<SERVER_IP_ADDRESS>",
    "<Protocol: tcp, udp, icmp, icmpv6>",
    "<START_PORT>",
    "<END_PORT>",
    "<Client behind NAT: \"1\"/\"0\">",
    "<DURATION (s)>",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    fn parse(tag: &str) -> Result<Self, FirewallError> {
        match tag.to_ascii_lowercase().as_str() {
            "ipv4" => Ok(AddressFamily::Ipv4),
            "ipv6" => Ok(AddressFamily::Ipv6),
            other => Err(FirewallError::InvalidInput(format!(
                "address family must be \"ipv4\" or \"ipv6\", got \"{other}\""
            ))),
        }
    }

    fn matches(self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (AddressFamily::Ipv4, IpAddr::V4(_)) | (AddressFamily::Ipv6, IpAddr::V6(_))
        )
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("ipv4"),
            AddressFamily::Ipv6 => f.write_str("ipv6"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    Other(String),
}

impl Protocol {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "icmp" => Protocol::Icmp,
            "icmpv6" => Protocol::Icmpv6,
            other => Protocol::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Icmpv6 => "icmpv6",
            Protocol::Other(name) => name,
        }
    }

    /// Only tcp and udp carry destination ports.
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive destination port range. `start == end` is a single port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, FirewallError> {
        if start > end {
            return Err(FirewallError::InvalidDescriptor(format!(
                "start port {start} is greater than end port {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// One authorized flow whose access is being revoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub client_device_id: String,
    pub client_address: String,
    pub address_family: AddressFamily,
    pub server_address: String,
    pub server_family: AddressFamily,
    pub protocol: Protocol,
    pub port_range: PortRange,
    /// Carried through for custom filter logic; not used by the iptables rules.
    pub client_behind_nat: bool,
    /// How long the original grant was valid for. Informational only.
    pub duration: Duration,
}

impl ConnectionDescriptor {
    /// Descriptor for a client address with defaults for the fields that do
    /// not affect filter rules.
    pub fn new(
        client_address: impl Into<String>,
        address_family: AddressFamily,
        protocol: Protocol,
        port_range: PortRange,
    ) -> Self {
        Self {
            client_device_id: String::new(),
            client_address: client_address.into(),
            address_family,
            server_address: String::new(),
            server_family: address_family,
            protocol,
            port_range,
            client_behind_nat: false,
            duration: Duration::ZERO,
        }
    }

    /// Parse the ten positional invocation inputs.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, FirewallError> {
        if args.len() != REQUIRED_ARGUMENTS.len() {
            return Err(FirewallError::InvalidInput(format!(
                "expected {} required arguments, got {}: {}",
                REQUIRED_ARGUMENTS.len(),
                args.len(),
                REQUIRED_ARGUMENTS.join(" ")
            )));
        }
        let arg: Vec<&str> = args.iter().map(|a| a.as_ref().trim()).collect();

        let client_device_id = arg[0].to_string();
        if client_device_id.is_empty() {
            return Err(FirewallError::InvalidInput(
                "client device id is empty".into(),
            ));
        }

        let address_family = AddressFamily::parse(arg[1])?;
        let client_address = parse_address(arg[2], address_family, "client")?;
        let server_family = AddressFamily::parse(arg[3])?;
        let server_address = parse_address(arg[4], server_family, "server")?;

        let protocol = Protocol::parse(arg[5]);
        if protocol.as_str().is_empty() {
            return Err(FirewallError::InvalidInput("protocol is empty".into()));
        }

        let start = parse_port(arg[6], "start")?;
        let end = parse_port(arg[7], "end")?;
        let port_range = PortRange::new(start, end)?;

        let client_behind_nat = arg[8] == "1";

        let duration = arg[9].parse::<u64>().map_err(|_| {
            FirewallError::InvalidInput(format!("duration \"{}\" is not a number", arg[9]))
        })?;

        Ok(Self {
            client_device_id,
            client_address,
            address_family,
            server_address,
            server_family,
            protocol,
            port_range,
            client_behind_nat,
            duration: Duration::from_secs(duration),
        })
    }
}

fn parse_address(
    raw: &str,
    family: AddressFamily,
    which: &str,
) -> Result<String, FirewallError> {
    let addr: IpAddr = raw.parse().map_err(|_| {
        FirewallError::InvalidInput(format!("{which} address \"{raw}\" is not an IP address"))
    })?;
    if !family.matches(&addr) {
        return Err(FirewallError::InvalidInput(format!(
            "{which} address {addr} is not an {family} address"
        )));
    }
    Ok(addr.to_string())
}

fn parse_port(raw: &str, which: &str) -> Result<u16, FirewallError> {
    raw.parse::<u16>().map_err(|_| {
        FirewallError::InvalidInput(format!("{which} port \"{raw}\" is not a valid port"))
    })
}
