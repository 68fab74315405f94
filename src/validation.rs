//! Centralized validation functions for chainwarden.
//!
//! This module provides unified validation for:
//! - IPv4 addresses and CIDR ranges from IP lists
//! - Chain names
//! - Protocol lists

use anyhow::{bail, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use tracing::warn;

use crate::rules::Protocol;

/// Longest chain name accepted by iptables
pub const MAX_CHAIN_NAME_LEN: usize = 28;

/// Built-in chains and targets that cannot be used as the managed chain
const RESERVED_CHAIN_NAMES: &[&str] = &[
    "INPUT",
    "OUTPUT",
    "FORWARD",
    "PREROUTING",
    "POSTROUTING",
    "ACCEPT",
    "DROP",
    "REJECT",
    "RETURN",
    "LOG",
];

/// Validate an IPv4 address or CIDR string and return the parsed network.
///
/// A plain address becomes a /32. Host bits in a CIDR are cleared, so
/// `10.0.0.7/24` yields `10.0.0.0/24`.
///
/// # Examples
/// ```
/// use chainwarden::validation::validate_ipv4_entry;
/// assert_eq!(validate_ipv4_entry("10.0.0.1").unwrap().to_string(), "10.0.0.1/32");
/// assert!(validate_ipv4_entry("192.168.0.0/24").is_ok());
/// assert!(validate_ipv4_entry("bad.ip").is_err());
/// ```
pub fn validate_ipv4_entry(entry: &str) -> Result<Ipv4Net> {
    match entry.split_once('/') {
        Some((addr, prefix)) => {
            let addr: Ipv4Addr = addr
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid IPv4 address in CIDR: {}", entry))?;
            // Only plain decimal digits: rejects "+8", " 8" and similar
            if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
                bail!("Invalid CIDR prefix: {}", entry);
            }
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid CIDR prefix: {}", entry))?;
            let net = Ipv4Net::new(addr, prefix)
                .map_err(|_| anyhow::anyhow!("Invalid CIDR prefix: {}", entry))?;
            Ok(net.trunc())
        }
        None => {
            let addr: Ipv4Addr = entry
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid IPv4 address: {}", entry))?;
            Ok(Ipv4Net::from(addr))
        }
    }
}

/// Validate the managed chain name.
///
/// # Examples
/// ```
/// use chainwarden::validation::validate_chain_name;
/// assert!(validate_chain_name("WHITELIST").is_ok());
/// assert!(validate_chain_name("INPUT").is_err());
/// ```
pub fn validate_chain_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Chain name cannot be empty");
    }
    if name.len() > MAX_CHAIN_NAME_LEN {
        bail!(
            "Chain name '{}' is longer than {} characters",
            name,
            MAX_CHAIN_NAME_LEN
        );
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_".contains(c))
    {
        bail!(
            "Chain name '{}' may only contain letters, digits, '-' and '_'",
            name
        );
    }
    if name.starts_with('-') {
        bail!("Chain name '{}' cannot start with '-'", name);
    }
    if RESERVED_CHAIN_NAMES.contains(&name) {
        bail!("Chain name '{}' is reserved by iptables", name);
    }
    Ok(())
}

/// Parse configured protocol names, skipping unsupported ones with a warning.
///
/// Duplicates are collapsed while keeping first-seen order.
pub fn validate_protocols<S: AsRef<str>>(names: &[S]) -> Vec<Protocol> {
    let mut protocols = Vec::with_capacity(names.len());
    for name in names {
        match name.as_ref().parse::<Protocol>() {
            Ok(p) if !protocols.contains(&p) => protocols.push(p),
            Ok(_) => {}
            Err(e) => warn!("Skipping protocol: {}", e),
        }
    }
    protocols
}
