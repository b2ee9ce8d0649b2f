//! Advisory check of a proposed AP subnet against every other live address.

use crate::traits::{InterfaceAddress, NetworkProbe};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Netmask bits for a CIDR prefix length. Prefixes above 32 are clamped.
pub fn prefix_mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    }
}

/// Addresses that share a network with `candidate/prefix`, compared under
/// the narrower of the two masks so containment in either direction counts.
pub fn find_conflicts<'a>(
    candidate: Ipv4Addr,
    prefix: u8,
    exclude: &str,
    addresses: &'a [InterfaceAddress],
) -> Vec<&'a InterfaceAddress> {
    let candidate = u32::from(candidate);
    let mask = prefix_mask(prefix);
    addresses
        .iter()
        .filter(|a| a.interface != "lo" && a.interface != exclude)
        .filter(|a| {
            let check = mask & prefix_mask(a.prefix);
            candidate & check == u32::from(a.ip) & check
        })
        .collect()
}

/// Human-readable description of `conflicts`, `None` when there are none.
pub fn describe(conflicts: &[&InterfaceAddress]) -> Option<String> {
    if conflicts.is_empty() {
        return None;
    }
    let list = conflicts
        .iter()
        .map(|a| format!("{} ({}/{})", a.interface, a.ip, a.prefix))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("AP subnet overlaps with: {list}"))
}

/// Parses `ip -4 addr show` output into interface/address pairs.
pub fn parse_ip_addr_output(output: &str) -> Vec<InterfaceAddress> {
    let mut current = String::new();
    let mut addrs = Vec::new();
    for line in output.lines() {
        // 形如 "3: wlan0: <BROADCAST,...>" 的接口头
        if !line.starts_with(char::is_whitespace) {
            if let Some((_, rest)) = line.split_once(": ") {
                if let Some((name, _)) = rest.split_once(':') {
                    // "wlan0.5@wlan0" -> "wlan0.5"
                    current = name.split('@').next().unwrap_or(name).trim().to_string();
                }
            }
            continue;
        }

        let mut words = line.split_whitespace();
        if words.next() != Some("inet") {
            continue;
        }
        let Some((ip, prefix)) = words.next().and_then(|cidr| cidr.split_once('/')) else {
            continue;
        };
        if let (Ok(ip), Ok(prefix)) = (ip.parse::<Ipv4Addr>(), prefix.parse::<u8>()) {
            if !current.is_empty() && prefix <= 32 {
                addrs.push(InterfaceAddress {
                    interface: current.clone(),
                    ip,
                    prefix,
                });
            }
        }
    }
    addrs
}

/// Runs [`find_conflicts`] against the host's live addresses.
#[derive(Clone)]
pub struct SubnetConflictDetector {
    probe: Arc<dyn NetworkProbe>,
}

impl SubnetConflictDetector {
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        Self { probe }
    }

    pub async fn check(&self, candidate: Ipv4Addr, prefix: u8, exclude: &str) -> Option<String> {
        let addresses = self.probe.ipv4_addresses().await;
        let conflicts = find_conflicts(candidate, prefix, exclude, &addresses);
        let description = describe(&conflicts);
        if let Some(d) = &description {
            tracing::warn!(interface = %exclude, ip = %candidate, prefix, "{d}");
        }
        description
    }
}
