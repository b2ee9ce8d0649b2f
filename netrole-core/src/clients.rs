//! Per-interface client view merged from three independent snapshots:
//! DHCP leases, the kernel ARP table and the radio's station dump.
//!
//! MAC addresses are lowercased for joining and uppercased for output.

use crate::model::ClientRecord;
use crate::traits::NetworkProbe;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// ARP `Flags` bit for a completed entry (`ATF_COM`).
const ARP_COMPLETE: u32 = 0x2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ip: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Station {
    pub signal: String,
    pub connected: String,
}

/// dnsmasq lease lines: `<expiry> <mac> <ip> <hostname> <client-id>`.
/// A hostname of `*` means the client sent none.
pub fn parse_leases(text: &str) -> Vec<(String, Lease)> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let hostname = if parts[3] == "*" { "" } else { parts[3] };
            Some((
                parts[1].to_ascii_lowercase(),
                Lease {
                    ip: parts[2].to_string(),
                    hostname: hostname.to_string(),
                },
            ))
        })
        .collect()
}

/// `/proc/net/arp` rows for `iface` that have completed resolution.
pub fn parse_arp(text: &str, iface: &str) -> HashMap<String, String> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 || parts[5] != iface {
                return None;
            }
            let flags = u32::from_str_radix(parts[2].trim_start_matches("0x"), 16).ok()?;
            if flags & ARP_COMPLETE == 0 {
                return None;
            }
            Some((parts[3].to_ascii_lowercase(), parts[0].to_string()))
        })
        .collect()
}

/// `iw dev <iface> station dump`, in dump order.
///
/// Each `Station <mac>` header opens a record; the attribute lines that
/// follow update it until the next header.
pub fn parse_station_dump(text: &str) -> Vec<(String, Station)> {
    let mut stations: Vec<(String, Station)> = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("Station ") {
            if let Some(mac) = rest.split_whitespace().next() {
                stations.push((mac.to_ascii_lowercase(), Station::default()));
            }
            continue;
        }
        let Some((_, current)) = stations.last_mut() else {
            continue;
        };
        let attr = line.trim();
        if let Some(v) = attr.strip_prefix("signal:") {
            if let Some(dbm) = v.split_whitespace().next().and_then(|s| s.parse::<i32>().ok()) {
                current.signal = format!("{dbm} dBm");
            }
        } else if let Some(v) = attr.strip_prefix("connected time:") {
            if let Some(secs) = v.split_whitespace().next().and_then(|s| s.parse::<u64>().ok()) {
                current.connected = format_duration(secs);
            }
        }
    }
    stations
}

/// `HH:MM:SS`; hours keep counting past 24.
pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Merges the snapshots.
///
/// Every associated station is listed, with IP / hostname from its lease,
/// else its ARP entry, else empty. A lease whose station is gone is listed
/// only while its ARP entry is still complete; otherwise it is stale.
pub fn merge(
    stations: &[(String, Station)],
    leases: &[(String, Lease)],
    arp: &HashMap<String, String>,
) -> Vec<ClientRecord> {
    let lease_map: HashMap<&str, &Lease> = leases.iter().map(|(m, l)| (m.as_str(), l)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut clients = Vec::new();

    for (mac, station) in stations {
        if !seen.insert(mac.as_str()) {
            continue;
        }
        let (ip, hostname) = match lease_map.get(mac.as_str()) {
            Some(lease) => (lease.ip.clone(), lease.hostname.clone()),
            None => (arp.get(mac).cloned().unwrap_or_default(), String::new()),
        };
        clients.push(ClientRecord {
            mac: mac.to_ascii_uppercase(),
            ip,
            hostname,
            signal: station.signal.clone(),
            connected_duration: station.connected.clone(),
        });
    }

    for (mac, _) in leases {
        if seen.contains(mac.as_str()) || !arp.contains_key(mac) {
            continue;
        }
        seen.insert(mac.as_str());
        // 同一 MAC 以最后一条租约为准
        let lease = lease_map[mac.as_str()];
        clients.push(ClientRecord {
            mac: mac.to_ascii_uppercase(),
            ip: lease.ip.clone(),
            hostname: lease.hostname.clone(),
            signal: String::new(),
            connected_duration: String::new(),
        });
    }
    clients
}

#[derive(Clone)]
pub struct ClientReconciler {
    probe: Arc<dyn NetworkProbe>,
}

impl ClientReconciler {
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        Self { probe }
    }

    /// A fresh client list for `iface`; empty when the interface does not exist.
    pub async fn list_clients(&self, iface: &str) -> Vec<ClientRecord> {
        if !self.probe.interface_exists(iface).await {
            debug!(interface = %iface, "interface not present, no clients");
            return Vec::new();
        }
        let (leases, arp, dump) = tokio::join!(
            self.probe.read_leases(iface),
            self.probe.read_arp_table(),
            self.probe.station_dump(iface),
        );
        let stations = parse_station_dump(&dump);
        let leases = parse_leases(&leases);
        let arp = parse_arp(&arp, iface);
        let clients = merge(&stations, &leases, &arp);
        debug!(
            interface = %iface,
            stations = stations.len(),
            leases = leases.len(),
            arp = arp.len(),
            clients = clients.len(),
            "clients reconciled"
        );
        clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASES: &str = "\
1760000000 aa:bb:cc:00:00:01 192.168.50.11 pixel-7 01:aa:bb:cc:00:00:01
1760000100 AA:BB:CC:00:00:02 192.168.50.12 * *
1760000200 aa:bb:cc:00:00:03 192.168.50.13 old-phone *
";

    const ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.50.12    0x1         0x2         aa:bb:cc:00:00:02     *        wlan1
192.168.50.13    0x1         0x0         aa:bb:cc:00:00:03     *        wlan1
192.168.50.40    0x1         0x2         aa:bb:cc:00:00:04     *        wlan1
192.168.1.5      0x1         0x2         aa:bb:cc:00:00:05     *        eth0
";

    const DUMP: &str = "\
Station aa:bb:cc:00:00:01 (on wlan1)
\tinactive time:\t1200 ms
\tsignal:  \t-52 [-54, -55] dBm
\tsignal avg:\t-50 dBm
\tconnected time:\t3725 seconds
Station AA:BB:CC:00:00:04 (on wlan1)
\tsignal:  \t-70 dBm
\tconnected time:\t59 seconds
Station aa:bb:cc:00:00:09 (on wlan1)
\tsignal:  \t-80 dBm
";

    #[test]
    fn lease_placeholder_hostname_is_empty() {
        let leases = parse_leases(LEASES);
        assert_eq!(leases.len(), 3);
        assert_eq!(leases[1].0, "aa:bb:cc:00:00:02");
        assert_eq!(leases[1].1.hostname, "");
        assert_eq!(leases[0].1.hostname, "pixel-7");
    }

    #[test]
    fn arp_keeps_complete_entries_on_the_interface() {
        let arp = parse_arp(ARP, "wlan1");
        assert_eq!(arp.len(), 2);
        assert_eq!(arp["aa:bb:cc:00:00:02"], "192.168.50.12");
        assert!(!arp.contains_key("aa:bb:cc:00:00:03"));
        assert!(!arp.contains_key("aa:bb:cc:00:00:05"));
    }

    #[test]
    fn station_dump_cursor() {
        let stations = parse_station_dump(DUMP);
        assert_eq!(stations.len(), 3);
        assert_eq!(
            stations[0],
            (
                "aa:bb:cc:00:00:01".to_string(),
                Station {
                    signal: "-52 dBm".into(),
                    connected: "01:02:05".into()
                }
            )
        );
        assert_eq!(stations[1].0, "aa:bb:cc:00:00:04");
        assert_eq!(stations[1].1.connected, "00:00:59");
        assert_eq!(stations[2].1.connected, "");
    }

    #[test]
    fn merge_policy() {
        let clients = merge(
            &parse_station_dump(DUMP),
            &parse_leases(LEASES),
            &parse_arp(ARP, "wlan1"),
        );
        let macs: Vec<&str> = clients.iter().map(|c| c.mac.as_str()).collect();
        // stations first, then the lease whose ARP entry is still complete;
        // :03 has only an incomplete ARP entry and is dropped
        assert_eq!(
            macs,
            vec![
                "AA:BB:CC:00:00:01",
                "AA:BB:CC:00:00:04",
                "AA:BB:CC:00:00:09",
                "AA:BB:CC:00:00:02",
            ]
        );

        assert_eq!(clients[0].ip, "192.168.50.11");
        assert_eq!(clients[0].hostname, "pixel-7");
        // static IP device: address from ARP only
        assert_eq!(clients[1].ip, "192.168.50.40");
        assert_eq!(clients[1].hostname, "");
        // associated, but nothing else known
        assert_eq!(clients[2].ip, "");
        assert_eq!(clients[2].signal, "-80 dBm");
        // residual lease has no radio data
        assert_eq!(clients[3].signal, "");
        assert_eq!(clients[3].connected_duration, "");
    }

    #[test]
    fn lease_without_arp_completion_is_dropped() {
        let leases = parse_leases("1 aa:aa:aa:aa:aa:aa 10.0.0.5 ghost *\n");
        assert!(merge(&[], &leases, &HashMap::new()).is_empty());
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(90061), "25:01:01");
    }
}
