//! Generic security rule model
//!
//! A vendor-neutral, prioritized allow/deny firewall rule. Vendor crates
//! translate these to and from their own permission records.
//!
//! The compact text form is `<in|out>:<allow|deny> [cidr] [protocol] [ports]`,
//! e.g. `in:allow 10.0.0.0/8 tcp 22,80`. A missing CIDR means `0.0.0.0/0`,
//! a missing protocol means `any`.

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Highest precedence a rule can have (lower value wins)
pub const HIGHEST_PRECEDENCE: i32 = 1;

/// Lowest precedence; used for rules read back from vendors without priorities
pub const LOWEST_PRECEDENCE: i32 = 100;

/// Errors raised while parsing the compact rule form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("empty rule")]
    Empty,

    #[error("invalid direction/action '{0}', expected e.g. 'in:allow'")]
    InvalidHeader(String),

    #[error("invalid port specification '{0}'")]
    InvalidPorts(String),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
}

/// Traffic direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "in",
            Direction::Egress => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP protocol. `Any` matches every protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    Icmp,
    Other(String),
}

impl Protocol {
    /// Parse a protocol name or IANA number
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "any" | "all" | "-1" => Protocol::Any,
            "tcp" | "6" => Protocol::Tcp,
            "udp" | "17" => Protocol::Udp,
            "icmp" | "1" => Protocol::Icmp,
            other => Protocol::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Any => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Other(name) => name,
        }
    }

    /// Whether the protocol carries port numbers
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port selection of a rule.
///
/// `Range` endpoints that are zero or negative mean "unset" and are widened
/// to the protocol's full range by the vendor codecs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSpec {
    All,
    Range { start: i32, end: i32 },
    Discrete(Vec<u16>),
}

impl PortSpec {
    /// Build a range, collapsing the fully-unset case to `All`
    pub fn range(start: i32, end: i32) -> Self {
        if start <= 0 && end <= 0 {
            PortSpec::All
        } else {
            PortSpec::Range { start, end }
        }
    }

    pub fn single(port: u16) -> Self {
        PortSpec::Range {
            start: i32::from(port),
            end: i32::from(port),
        }
    }

    pub fn is_all(&self) -> bool {
        match self {
            PortSpec::All => true,
            PortSpec::Range { start, end } => *start <= 0 && *end <= 0,
            PortSpec::Discrete(ports) => ports.is_empty(),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::All => Ok(()),
            PortSpec::Range { start, end } if start == end => write!(f, "{}", start),
            PortSpec::Range { start, end } => write!(f, "{}-{}", start, end),
            PortSpec::Discrete(ports) => {
                let joined: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

impl FromStr for PortSpec {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuleParseError::InvalidPorts(s.to_string());
        let parse_port = |p: &str| p.trim().parse::<u16>().map_err(|_| invalid());

        if s.contains(',') {
            let ports = s
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(parse_port)
                .collect::<Result<Vec<u16>, _>>()?;
            if ports.is_empty() {
                return Err(invalid());
            }
            return Ok(PortSpec::Discrete(ports));
        }

        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (parse_port(start)?, parse_port(end)?);
            if start > end {
                return Err(invalid());
            }
            return Ok(PortSpec::Range {
                start: i32::from(start),
                end: i32::from(end),
            });
        }

        Ok(PortSpec::single(parse_port(s)?))
    }
}

/// A prioritized allow/deny rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericSecurityRule {
    /// Lower value means higher precedence
    pub priority: i32,
    pub direction: Direction,
    pub action: RuleAction,
    pub protocol: Protocol,
    pub ports: PortSpec,
    pub cidr: IpNet,
    pub description: String,
}

impl GenericSecurityRule {
    pub fn new(direction: Direction, action: RuleAction, protocol: Protocol, cidr: IpNet) -> Self {
        Self {
            priority: HIGHEST_PRECEDENCE,
            direction,
            action,
            protocol,
            ports: PortSpec::All,
            cidr,
            description: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ports(mut self, ports: PortSpec) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_allow(&self) -> bool {
        self.action == RuleAction::Allow
    }

    pub fn is_all_ports(&self) -> bool {
        self.ports.is_all()
    }
}

fn any_ipv4() -> IpNet {
    IpNet::V4(Ipv4Net::default())
}

fn parse_cidr(token: &str) -> Option<IpNet> {
    if let Ok(net) = token.parse::<IpNet>() {
        return Some(net);
    }
    token.parse::<std::net::IpAddr>().ok().map(IpNet::from)
}

impl FromStr for GenericSecurityRule {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace().peekable();
        let header = tokens.next().ok_or(RuleParseError::Empty)?;

        let (direction, action) = header
            .split_once(':')
            .and_then(|(d, a)| {
                let direction = match d {
                    "in" => Direction::Ingress,
                    "out" => Direction::Egress,
                    _ => return None,
                };
                let action = match a {
                    "allow" => RuleAction::Allow,
                    "deny" => RuleAction::Deny,
                    _ => return None,
                };
                Some((direction, action))
            })
            .ok_or_else(|| RuleParseError::InvalidHeader(header.to_string()))?;

        let cidr = match tokens.peek().and_then(|t| parse_cidr(t)) {
            Some(net) => {
                tokens.next();
                net
            }
            None => any_ipv4(),
        };

        let protocol = tokens.next().map(Protocol::parse).unwrap_or(Protocol::Any);
        let ports = match tokens.next() {
            Some(p) => p.parse::<PortSpec>()?,
            None => PortSpec::All,
        };
        if let Some(extra) = tokens.next() {
            return Err(RuleParseError::UnexpectedToken(extra.to_string()));
        }

        Ok(GenericSecurityRule::new(direction, action, protocol, cidr).with_ports(ports))
    }
}

impl fmt::Display for GenericSecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.direction, self.action)?;
        if self.cidr != any_ipv4() {
            write!(f, " {}", self.cidr)?;
        }
        write!(f, " {}", self.protocol)?;
        if !self.ports.is_all() {
            write!(f, " {}", self.ports)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_rule() {
        let rule: GenericSecurityRule = "in:allow any".parse().unwrap();
        assert_eq!(rule.direction, Direction::Ingress);
        assert_eq!(rule.action, RuleAction::Allow);
        assert_eq!(rule.protocol, Protocol::Any);
        assert_eq!(rule.cidr, "0.0.0.0/0".parse::<IpNet>().unwrap());
        assert!(rule.is_all_ports());
    }

    #[test]
    fn test_parse_full_rule() {
        let rule: GenericSecurityRule = "out:deny 10.0.0.0/8 tcp 22,80,443".parse().unwrap();
        assert_eq!(rule.direction, Direction::Egress);
        assert_eq!(rule.action, RuleAction::Deny);
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.ports, PortSpec::Discrete(vec![22, 80, 443]));
        assert_eq!(rule.cidr, "10.0.0.0/8".parse::<IpNet>().unwrap());
    }

    #[test]
    fn test_parse_bare_address_and_range() {
        let rule: GenericSecurityRule = "in:allow 192.168.1.10 udp 1000-2000".parse().unwrap();
        assert_eq!(rule.cidr, "192.168.1.10/32".parse::<IpNet>().unwrap());
        assert_eq!(rule.ports, PortSpec::Range { start: 1000, end: 2000 });
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<GenericSecurityRule>(), Err(RuleParseError::Empty));
        assert!(matches!(
            "inbound:allow any".parse::<GenericSecurityRule>(),
            Err(RuleParseError::InvalidHeader(_))
        ));
        assert!(matches!(
            "in:allow tcp 80-22".parse::<GenericSecurityRule>(),
            Err(RuleParseError::InvalidPorts(_))
        ));
        assert!(matches!(
            "in:allow tcp 22 extra".parse::<GenericSecurityRule>(),
            Err(RuleParseError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_display_matches_parse() {
        for text in [
            "in:allow any",
            "in:allow tcp 22",
            "out:deny 10.0.0.0/8 udp 53,123",
            "in:allow 172.16.0.0/12 tcp 8000-8080",
        ] {
            let rule: GenericSecurityRule = text.parse().unwrap();
            assert_eq!(rule.to_string(), text);
        }
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(Protocol::parse("6"), Protocol::Tcp);
        assert_eq!(Protocol::parse("-1"), Protocol::Any);
        assert_eq!(Protocol::parse("GRE"), Protocol::Other("gre".to_string()));
    }

    #[test]
    fn test_port_spec_all_detection() {
        assert!(PortSpec::range(-1, -1).is_all());
        assert!(PortSpec::Discrete(vec![]).is_all());
        assert!(!PortSpec::range(-1, 80).is_all());
    }
}
