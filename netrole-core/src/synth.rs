//! Pure `RoleConfig -> {hostapd, dnsmasq, nftables}` text generation.

use crate::config::{PathsConfig, RadioConfig};
use crate::model::{ApSettings, Role, RoleConfig};
use crate::subnet::prefix_mask;
use crate::Result;
use std::fmt::Write;
use std::net::Ipv4Addr;

/// Ports a listener client may reach on the AP itself.
pub const LISTENER_TCP_PORTS: [u16; 2] = [80, 8080];

/// First and last host offsets of the DHCP pool within the AP network.
const DHCP_POOL_START: u32 = 10;
const DHCP_POOL_END: u32 = 250;

/// The three artifacts for one AP interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub hostapd: String,
    pub dnsmasq: String,
    /// Only `listener` interfaces are firewalled.
    pub firewall: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    radio: RadioConfig,
    paths: PathsConfig,
}

impl ConfigSynthesizer {
    pub fn new(radio: RadioConfig, paths: PathsConfig) -> Self {
        Self { radio, paths }
    }

    /// Fails with a contract error when `cfg` is not a complete AP record.
    pub fn synthesize(&self, iface: &str, cfg: &RoleConfig) -> Result<Artifacts> {
        let ap = cfg.ap_settings()?;
        Ok(Artifacts {
            hostapd: self.hostapd(iface, cfg.role, &ap),
            dnsmasq: self.dnsmasq(iface, cfg.role, &ap),
            firewall: (cfg.role == Role::Listener).then(|| firewall(iface, &ap)),
        })
    }

    pub fn hostapd(&self, iface: &str, role: Role, ap: &ApSettings) -> String {
        let security = if ap.password.is_empty() {
            "wpa=0".to_string()
        } else {
            format!(
                "wpa=2\nwpa_passphrase={}\nwpa_key_mgmt=WPA-PSK\nwpa_pairwise=CCMP\nrsn_pairwise=CCMP",
                ap.password
            )
        };
        // listener 客户端之间互相不可见
        let ap_isolate = u8::from(role == Role::Listener);

        format!(
            "# hostapd-{iface}.conf - managed by netrole (role: {role})\n\
             interface={iface}\n\
             driver={driver}\n\
             ssid={ssid}\n\
             hw_mode={hw_mode}\n\
             channel={channel}\n\
             country_code={country}\n\
             wmm_enabled=1\n\
             ieee80211n=1\n\
             auth_algs=1\n\
             {security}\n\
             ignore_broadcast_ssid=0\n\
             ap_isolate={ap_isolate}\n",
            driver = self.radio.driver,
            ssid = ap.ssid,
            hw_mode = self.radio.hw_mode,
            channel = ap.channel,
            country = self.radio.country_code,
        )
    }

    pub fn dnsmasq(&self, iface: &str, role: Role, ap: &ApSettings) -> String {
        let (start, end) = dhcp_range(ap.ip, ap.mask);
        let netmask = Ipv4Addr::from(prefix_mask(ap.mask));
        let lease_file = self.paths.lease_file(iface);

        let mut out = String::new();
        let _ = writeln!(out, "# dnsmasq-{iface}.conf - managed by netrole (role: {role})");
        let _ = writeln!(out, "interface={iface}");
        let _ = writeln!(out, "bind-interfaces");
        let _ = writeln!(out, "no-hosts");
        let _ = writeln!(out, "dhcp-range={start},{end},{netmask},{}", self.radio.lease_time);
        let _ = writeln!(out, "dhcp-option=option:router,{}", ap.ip);
        let _ = writeln!(out, "dhcp-option=option:dns-server,{}", ap.ip);
        let _ = writeln!(out, "dhcp-option=114,http://{}{}", ap.ip, self.radio.portal_api_path);
        let _ = writeln!(out, "dhcp-leasefile={}", lease_file.display());
        if role == Role::Listener {
            // 所有域名都解析到 AP 自身，触发 captive portal
            let _ = writeln!(out, "no-resolv");
            let _ = writeln!(out, "address=/#/{}", ap.ip);
        }
        out
    }
}

/// DHCP pool `.10`–`.250` of the AP's network, derived from the prefix.
pub fn dhcp_range(ip: Ipv4Addr, mask: u8) -> (Ipv4Addr, Ipv4Addr) {
    let network = u32::from(ip) & prefix_mask(mask);
    (
        Ipv4Addr::from(network + DHCP_POOL_START),
        Ipv4Addr::from(network + DHCP_POOL_END),
    )
}

/// nftables ruleset for a listener AP: DHCP, DNS and the app ports on the AP
/// address are admitted; everything else arriving on the interface is
/// rejected (TCP with a reset) rather than dropped.
pub fn firewall(iface: &str, ap: &ApSettings) -> String {
    let ip = ap.ip;
    let tcp_ports = LISTENER_TCP_PORTS
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "# nftables-{iface}.nft - managed by netrole (role: listener)\n\
         table inet listener_{iface}\n\
         delete table inet listener_{iface}\n\
         table inet listener_{iface} {{\n\
         \tchain input {{\n\
         \t\ttype filter hook input priority 0; policy accept;\n\
         \t\tiifname != \"{iface}\" accept\n\
         \t\tct state established,related accept\n\
         \t\tudp dport {{ 67, 68 }} accept\n\
         \t\tip daddr {ip} udp dport 53 accept\n\
         \t\tip daddr {ip} tcp dport 53 accept\n\
         \t\tip daddr {ip} tcp dport {{ {tcp_ports} }} accept\n\
         \t\tmeta l4proto tcp reject with tcp reset\n\
         \t\treject\n\
         \t}}\n\
         \tchain forward {{\n\
         \t\ttype filter hook forward priority 0; policy accept;\n\
         \t\tiifname \"{iface}\" meta l4proto tcp reject with tcp reset\n\
         \t\tiifname \"{iface}\" reject\n\
         \t}}\n\
         }}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth() -> ConfigSynthesizer {
        ConfigSynthesizer::new(RadioConfig::default(), PathsConfig::default())
    }

    #[test]
    fn sbs_is_always_wpa2() {
        let mut cfg = RoleConfig::with_defaults(Role::Sbs);
        cfg.password = Some("Listen1234".into());
        let out = synth().synthesize("wlan0", &cfg).unwrap();
        assert!(out.hostapd.contains("\nwpa=2\n"));
        assert!(out.hostapd.contains("\nwpa_passphrase=Listen1234\n"));
        assert!(out.hostapd.contains("\nrsn_pairwise=CCMP\n"));
        assert!(!out.hostapd.contains("wpa=0"));
        assert!(out.hostapd.contains("\nap_isolate=0\n"));
        assert!(out.firewall.is_none());
    }

    #[test]
    fn open_listener_is_isolated_and_firewalled() {
        let cfg = RoleConfig::with_defaults(Role::Listener);
        let out = synth().synthesize("wlan1", &cfg).unwrap();
        assert!(out.hostapd.contains("\nwpa=0\n"));
        assert!(!out.hostapd.contains("wpa_passphrase"));
        assert!(out.hostapd.contains("\nap_isolate=1\n"));
        assert!(out.hostapd.contains("\nssid=SHOW_AUDIO\n"));
        assert!(out.hostapd.contains("\nchannel=11\n"));
        assert!(out.hostapd.contains("\ndriver=nl80211\n"));
        assert!(out.firewall.is_some());
    }

    #[test]
    fn listener_firewall_admits_only_the_allow_list() {
        let ap = RoleConfig::with_defaults(Role::Listener).ap_settings().unwrap();
        let rules = firewall("wlan1", &ap);

        let accepts: Vec<&str> = rules
            .lines()
            .map(str::trim)
            .filter(|l| l.ends_with("accept") && l.contains("dport"))
            .collect();
        assert_eq!(
            accepts,
            vec![
                "udp dport { 67, 68 } accept",
                "ip daddr 192.168.50.1 udp dport 53 accept",
                "ip daddr 192.168.50.1 tcp dport 53 accept",
                "ip daddr 192.168.50.1 tcp dport { 80, 8080 } accept",
            ]
        );
        // The catch-all is a reject, never a drop.
        assert!(rules.contains("meta l4proto tcp reject with tcp reset\n\t\treject\n"));
        assert!(!rules.contains("drop"));
        assert!(rules.contains("iifname != \"wlan1\" accept"));
    }

    #[test]
    fn dhcp_range_follows_the_network_prefix() {
        assert_eq!(
            dhcp_range(Ipv4Addr::new(192, 168, 50, 1), 24),
            (Ipv4Addr::new(192, 168, 50, 10), Ipv4Addr::new(192, 168, 50, 250))
        );
        assert_eq!(
            dhcp_range(Ipv4Addr::new(10, 20, 7, 1), 16),
            (Ipv4Addr::new(10, 20, 0, 10), Ipv4Addr::new(10, 20, 0, 250))
        );
    }

    #[test]
    fn dnsmasq_points_clients_at_the_ap() {
        let cfg = RoleConfig::with_defaults(Role::Sbs);
        let out = synth().synthesize("wlan0", &cfg).unwrap();
        let dns = out.dnsmasq;
        assert!(dns.contains("interface=wlan0\n"));
        assert!(dns.contains("dhcp-range=192.168.40.10,192.168.40.250,255.255.255.0,12h\n"));
        assert!(dns.contains("dhcp-option=option:router,192.168.40.1\n"));
        assert!(dns.contains("dhcp-option=option:dns-server,192.168.40.1\n"));
        assert!(dns.contains("dhcp-option=114,http://192.168.40.1/listen/portal-api.php\n"));
        assert!(dns.contains("dhcp-leasefile=/var/lib/misc/dnsmasq-wlan0.leases\n"));
        assert!(!dns.contains("address=/#/"));
    }

    #[test]
    fn lease_file_follows_configured_lease_dir() {
        let paths = PathsConfig {
            lease_dir: "/run/netrole".into(),
            ..PathsConfig::default()
        };
        let synth = ConfigSynthesizer::new(RadioConfig::default(), paths.clone());
        let out = synth
            .synthesize("wlan1", &RoleConfig::with_defaults(Role::Listener))
            .unwrap();
        let expected = format!("dhcp-leasefile={}\n", paths.lease_file("wlan1").display());
        assert!(out.dnsmasq.contains(&expected));
        assert!(out.dnsmasq.contains("dhcp-leasefile=/run/netrole/dnsmasq-wlan1.leases\n"));
    }

    #[test]
    fn incomplete_record_fails() {
        let mut cfg = RoleConfig::with_defaults(Role::Listener);
        cfg.ssid = None;
        assert!(matches!(
            synth().synthesize("wlan1", &cfg),
            Err(crate::Error::Contract(_))
        ));
        assert!(synth()
            .synthesize("eth0", &RoleConfig::new(Role::ShowNetwork))
            .is_err());
    }
}
