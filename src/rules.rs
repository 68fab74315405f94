//! Rule model: targets, protocols, port sets, chain rules and hook references.
//!
//! Everything here renders to `iptables` argument vectors, and hook references
//! can be parsed back from `iptables -S` listing lines.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChainwardenError;

/// Maximum number of port tokens accepted by the `multiport` match.
pub const MAX_PORT_TOKENS: usize = 15;

/// Rule disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Target {
    Accept,
    Drop,
    Reject,
    Return,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Accept => "ACCEPT",
            Target::Drop => "DROP",
            Target::Reject => "REJECT",
            Target::Return => "RETURN",
        }
    }

    /// Whether packets hitting this target are blocked
    pub fn is_blocking(self) -> bool {
        matches!(self, Target::Drop | Target::Reject)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = ChainwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPT" => Ok(Target::Accept),
            "DROP" => Ok(Target::Drop),
            "REJECT" => Ok(Target::Reject),
            "RETURN" => Ok(Target::Return),
            other => Err(ChainwardenError::Validation(format!(
                "Unknown target '{}'",
                other
            ))),
        }
    }
}

/// Transport protocols that support the `multiport` match
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Udplite,
    Dccp,
    Sctp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Udplite => "udplite",
            Protocol::Dccp => "dccp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ChainwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "udplite" => Ok(Protocol::Udplite),
            "dccp" => Ok(Protocol::Dccp),
            "sctp" => Ok(Protocol::Sctp),
            _ => Err(ChainwardenError::Validation(format!(
                "Unsupported protocol '{}' (expected tcp, udp, udplite, dccp or sctp)",
                s
            ))),
        }
    }
}

/// One token of a port set: a single port or an inclusive range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortToken {
    Single(u16),
    Range(u16, u16),
}

impl fmt::Display for PortToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortToken::Single(p) => write!(f, "{}", p),
            PortToken::Range(lo, hi) => write!(f, "{}:{}", lo, hi),
        }
    }
}

/// Destination port set for a hook reference.
///
/// Accepts `22`, `80,443`, `1000-2000` and `1000:2000`. An empty set matches
/// every port. Ranges count as a single token towards [`MAX_PORT_TOKENS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpec {
    tokens: Vec<PortToken>,
}

impl PortSpec {
    /// Port set matching all ports
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[PortToken] {
        &self.tokens
    }
}

fn parse_port(raw: &str, spec: &str) -> Result<u16, ChainwardenError> {
    match raw.trim().parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ChainwardenError::Validation(format!(
            "Invalid port '{}' in port set '{}'",
            raw.trim(),
            spec
        ))),
    }
}

impl FromStr for PortSpec {
    type Err = ChainwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }

        let mut tokens = Vec::new();
        for raw in trimmed.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(ChainwardenError::Validation(format!(
                    "Empty port token in port set '{}'",
                    s
                )));
            }

            let token = match raw.split_once(['-', ':']) {
                Some((lo, hi)) => {
                    let lo = parse_port(lo, s)?;
                    let hi = parse_port(hi, s)?;
                    if lo > hi {
                        return Err(ChainwardenError::Validation(format!(
                            "Port range '{}' is reversed",
                            raw
                        )));
                    }
                    if lo == hi {
                        PortToken::Single(lo)
                    } else {
                        PortToken::Range(lo, hi)
                    }
                }
                None => PortToken::Single(parse_port(raw, s)?),
            };
            tokens.push(token);
        }

        if tokens.len() > MAX_PORT_TOKENS {
            return Err(ChainwardenError::Validation(format!(
                "Port set '{}' has {} tokens; at most {} are allowed per hook reference",
                s,
                tokens.len(),
                MAX_PORT_TOKENS
            )));
        }

        Ok(Self { tokens })
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.tokens.iter().map(|t| t.to_string()).collect();
        f.write_str(&joined.join(","))
    }
}

/// A rule inside the managed chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Source network; `None` matches any source
    pub source: Option<Ipv4Net>,
    pub target: Target,
}

impl Rule {
    pub fn from_source(source: Ipv4Net, target: Target) -> Self {
        Self {
            source: Some(source),
            target,
        }
    }

    /// Catch-all rule with no match
    pub fn terminal(target: Target) -> Self {
        Self {
            source: None,
            target,
        }
    }

    /// Match and action arguments, without the chain operation
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(source) = self.source {
            args.push("-s".to_string());
            args.push(source.to_string());
        }
        args.push("-j".to_string());
        args.push(self.target.as_str().to_string());
        args
    }
}

/// Where a hook reference is placed inside the hook chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPosition {
    #[default]
    Front,
    Back,
}

/// A jump from a built-in hook chain into the managed chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRef {
    pub hook: String,
    pub protocol: Protocol,
    pub ports: PortSpec,
    pub chain: String,
}

impl HookRef {
    pub fn new(hook: &str, protocol: Protocol, ports: PortSpec, chain: &str) -> Self {
        Self {
            hook: hook.to_string(),
            protocol,
            ports,
            chain: chain.to_string(),
        }
    }

    /// Match and jump arguments, without the hook operation
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.protocol.as_str().to_string()];
        if !self.ports.is_any() {
            args.push("-m".to_string());
            args.push("multiport".to_string());
            args.push("--dports".to_string());
            args.push(self.ports.to_string());
        }
        args.push("-j".to_string());
        args.push(self.chain.clone());
        args
    }

    /// Parse an `iptables -S` line of `hook` that jumps to `chain`.
    ///
    /// Returns `None` for lines that are not a protocol-matched jump into `chain`.
    /// Extra matches that iptables adds on listing (`-m tcp`) are ignored.
    pub fn parse_listing(line: &str, hook: &str, chain: &str) -> Option<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 2 || words[0] != "-A" || words[1] != hook {
            return None;
        }

        let value_after = |flag: &str| {
            words
                .windows(2)
                .find(|w| w[0] == flag)
                .map(|w| w[1])
        };

        if value_after("-j")? != chain {
            return None;
        }
        let protocol = value_after("-p")?.parse().ok()?;
        let ports = match value_after("--dports").or_else(|| value_after("--dport")) {
            Some(p) => p.parse().ok()?,
            None => PortSpec::any(),
        };

        Some(Self::new(hook, protocol, ports, chain))
    }
}

impl fmt::Display for HookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = if self.ports.is_any() {
            "all".to_string()
        } else {
            self.ports.to_string()
        };
        write!(f, "{} {}/{} -> {}", self.hook, self.protocol, ports, self.chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_spec_single() {
        let spec: PortSpec = "22".parse().unwrap();
        assert_eq!(spec.tokens(), &[PortToken::Single(22)]);
        assert_eq!(spec.to_string(), "22");
    }

    #[test]
    fn test_port_spec_list_and_ranges() {
        let spec: PortSpec = "80, 443,8000-8080,9000:9100".parse().unwrap();
        assert_eq!(spec.tokens().len(), 4);
        assert_eq!(spec.to_string(), "80,443,8000:8080,9000:9100");
    }

    #[test]
    fn test_port_spec_degenerate_range_is_single() {
        let spec: PortSpec = "53-53".parse().unwrap();
        assert_eq!(spec.tokens(), &[PortToken::Single(53)]);
    }

    #[test]
    fn test_port_spec_empty_is_any() {
        let spec: PortSpec = "  ".parse().unwrap();
        assert!(spec.is_any());
        assert_eq!(spec, PortSpec::any());
    }

    #[test]
    fn test_port_spec_invalid() {
        assert!("0".parse::<PortSpec>().is_err());
        assert!("65536".parse::<PortSpec>().is_err());
        assert!("http".parse::<PortSpec>().is_err());
        assert!("80,,443".parse::<PortSpec>().is_err());
        assert!("2000-1000".parse::<PortSpec>().is_err());
        assert!("80;rm -rf /".parse::<PortSpec>().is_err());
    }

    #[test]
    fn test_port_spec_token_limit() {
        let fifteen: Vec<String> = (1..=15).map(|p| p.to_string()).collect();
        assert!(fifteen.join(",").parse::<PortSpec>().is_ok());

        let sixteen: Vec<String> = (1..=16).map(|p| p.to_string()).collect();
        let err = sixteen.join(",").parse::<PortSpec>().unwrap_err();
        assert!(err.to_string().contains("at most 15"));
    }

    #[test]
    fn test_port_spec_range_counts_as_one_token() {
        let mut tokens: Vec<String> = (1..=14).map(|p| p.to_string()).collect();
        tokens.push("1000-2000".to_string());
        let spec: PortSpec = tokens.join(",").parse().unwrap();
        assert_eq!(spec.tokens().len(), 15);
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!(" UDP ".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("icmp".parse::<Protocol>().is_err());
        assert!("".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_target_roundtrip_names() {
        for target in [Target::Accept, Target::Drop, Target::Reject, Target::Return] {
            assert_eq!(target.as_str().parse::<Target>().unwrap(), target);
        }
        assert!(Target::Drop.is_blocking());
        assert!(Target::Reject.is_blocking());
        assert!(!Target::Return.is_blocking());
    }

    #[test]
    fn test_rule_args() {
        let rule = Rule::from_source("10.0.0.1/32".parse().unwrap(), Target::Accept);
        assert_eq!(rule.to_args(), vec!["-s", "10.0.0.1/32", "-j", "ACCEPT"]);
        assert_eq!(Rule::terminal(Target::Reject).to_args(), vec!["-j", "REJECT"]);
    }

    #[test]
    fn test_hook_args_with_ports() {
        let hook = HookRef::new("INPUT", Protocol::Tcp, "80,443".parse().unwrap(), "WL");
        assert_eq!(
            hook.to_args(),
            vec!["-p", "tcp", "-m", "multiport", "--dports", "80,443", "-j", "WL"]
        );
    }

    #[test]
    fn test_hook_args_all_ports() {
        let hook = HookRef::new("INPUT", Protocol::Udp, PortSpec::any(), "WL");
        assert_eq!(hook.to_args(), vec!["-p", "udp", "-j", "WL"]);
    }

    #[test]
    fn test_parse_listing_real_iptables_line() {
        let line = "-A INPUT -p tcp -m multiport --dports 80,443 -j WL";
        let hook = HookRef::parse_listing(line, "INPUT", "WL").unwrap();
        assert_eq!(hook.protocol, Protocol::Tcp);
        assert_eq!(hook.ports.to_string(), "80,443");
    }

    #[test]
    fn test_parse_listing_single_dport() {
        let line = "-A INPUT -p tcp -m tcp --dport 22 -j WL";
        let hook = HookRef::parse_listing(line, "INPUT", "WL").unwrap();
        assert_eq!(hook.ports.to_string(), "22");
    }

    #[test]
    fn test_parse_listing_ignores_other_chains() {
        assert!(HookRef::parse_listing("-A INPUT -p tcp -j OTHER", "INPUT", "WL").is_none());
        assert!(HookRef::parse_listing("-A INPUT -j WL", "INPUT", "WL").is_none());
        assert!(HookRef::parse_listing("-P INPUT ACCEPT", "INPUT", "WL").is_none());
        assert!(HookRef::parse_listing("-A FORWARD -p tcp -j WL", "INPUT", "WL").is_none());
    }

    #[test]
    fn test_parse_listing_roundtrips_rendered_hook() {
        let hook = HookRef::new("INPUT", Protocol::Sctp, "1000-2000,5000".parse().unwrap(), "WL");
        let line = format!("-A INPUT {}", hook.to_args().join(" "));
        assert_eq!(HookRef::parse_listing(&line, "INPUT", "WL"), Some(hook));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn port_token() -> impl Strategy<Value = String> {
        prop_oneof![
            (1u16..=65535).prop_map(|p| p.to_string()),
            (1u16..=65535, 1u16..=65535).prop_map(|(a, b)| {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                format!("{}-{}", lo, hi)
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_up_to_fifteen_tokens_accepted(tokens in prop::collection::vec(port_token(), 1..=MAX_PORT_TOKENS)) {
            let spec: PortSpec = tokens.join(",").parse().unwrap();
            prop_assert_eq!(spec.tokens().len(), tokens.len());
            // Rendering parses back to the same set
            let reparsed: PortSpec = spec.to_string().parse().unwrap();
            prop_assert_eq!(reparsed, spec);
        }

        #[test]
        fn prop_more_than_fifteen_tokens_rejected(tokens in prop::collection::vec(port_token(), MAX_PORT_TOKENS + 1..40)) {
            prop_assert!(tokens.join(",").parse::<PortSpec>().is_err());
        }

        #[test]
        fn prop_parse_never_panics(s in "\\PC{0,40}") {
            let _ = s.parse::<PortSpec>();
        }
    }
}
