use crate::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 顶层应用配置
///
/// Every field has a default matching the deployed appliance, so an empty
/// TOML document is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub paths: PathsConfig,
    pub services: ServicesConfig,
    pub tether: TetherConfig,
    pub radio: RadioConfig,
    pub logs: LogsConfig,
    pub wifi: WifiConfig,
}

// ============= 文件路径 =============

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// The structured role store.
    pub roles_file: PathBuf,
    /// Flat `KEY=value` settings of the single-AP generation.
    pub legacy_ap_conf: PathBuf,
    /// hostapd config written by the single-AP generation.
    pub legacy_hostapd_conf: PathBuf,
    /// Where per-interface hostapd / dnsmasq / nftables files are installed.
    pub artifact_dir: PathBuf,
    pub lease_dir: PathBuf,
    pub arp_table: PathBuf,
    pub sys_class_net: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let state = Path::new("/home/fpp/listen-sync");
        Self {
            roles_file: state.join("roles.json"),
            legacy_ap_conf: state.join("ap.conf"),
            legacy_hostapd_conf: state.join("hostapd-listener.conf"),
            artifact_dir: state.to_path_buf(),
            lease_dir: PathBuf::from("/var/lib/misc"),
            arp_table: PathBuf::from("/proc/net/arp"),
            sys_class_net: PathBuf::from("/sys/class/net"),
        }
    }
}

impl PathsConfig {
    pub fn hostapd_conf(&self, iface: &str) -> PathBuf {
        self.artifact_dir.join(format!("hostapd-{iface}.conf"))
    }

    pub fn dnsmasq_conf(&self, iface: &str) -> PathBuf {
        self.artifact_dir.join(format!("dnsmasq-{iface}.conf"))
    }

    pub fn firewall_rules(&self, iface: &str) -> PathBuf {
        self.artifact_dir.join(format!("nftables-{iface}.nft"))
    }

    /// Lease file dnsmasq is told to write for `iface`.
    pub fn lease_file(&self, iface: &str) -> PathBuf {
        self.lease_dir.join(format!("dnsmasq-{iface}.leases"))
    }

    /// The shared lease file used when no per-interface file exists.
    pub fn shared_lease_file(&self) -> PathBuf {
        self.lease_dir.join("dnsmasq.leases")
    }
}

// ============= systemd 服务 =============

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Reads the role store and brings every AP up; restarted after each save.
    pub ap_service: String,
    /// The host platform's own hostapd, stopped when `sbs` claims its radio.
    pub host_ap_service: String,
    /// Services reported by `status()`.
    pub monitored: Vec<String>,
    /// Services an operator may restart by name.
    pub restartable: Vec<String>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            ap_service: "listener-ap".to_string(),
            host_ap_service: "hostapd".to_string(),
            monitored: vec![
                "listener-ap".to_string(),
                "dnsmasq".to_string(),
                "ws-sync".to_string(),
            ],
            restartable: vec![
                "listener-ap".to_string(),
                "dnsmasq".to_string(),
                "ws-sync".to_string(),
            ],
        }
    }
}

// ============= 宿主机 tethering =============

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// The interface the host platform tethers on.
    pub interface: String,
    /// Base URL of the host settings API; keys are appended as path segments.
    pub settings_api: String,
    pub timeout_ms: u64,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            settings_api: "http://127.0.0.1/api/settings".to_string(),
            timeout_ms: 3000,
        }
    }
}

impl TetherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============= hostapd / dnsmasq 生成参数 =============

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub driver: String,
    pub hw_mode: String,
    pub country_code: String,
    pub lease_time: String,
    /// RFC 8910 captive portal API path, advertised through DHCP option 114.
    pub portal_api_path: String,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            driver: "nl80211".to_string(),
            hw_mode: "g".to_string(),
            country_code: "US".to_string(),
            lease_time: "12h".to_string(),
            portal_api_path: "/listen/portal-api.php".to_string(),
        }
    }
}

// ============= 日志 =============

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// systemd units whose journal may be read.
    pub units: Vec<String>,
    /// Subset of `units` whose journal may be vacuumed.
    pub clearable_units: Vec<String>,
    /// Plain log file of the sync service, exposed as the `sync` source.
    pub sync_log: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            units: ["ws-sync", "listener-ap", "dnsmasq", "hostapd"]
                .map(String::from)
                .to_vec(),
            clearable_units: ["ws-sync", "listener-ap", "dnsmasq"]
                .map(String::from)
                .to_vec(),
            sync_log: PathBuf::from("/home/fpp/listen-sync/sync.log"),
        }
    }
}

// ============= Wi-Fi 客户端修复 =============

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    /// Wait between `reassociate` and reading the supplicant state.
    pub settle_ms: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self { settle_ms: 3000 }
    }
}

impl WifiConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

// ============= 配置加载函数 =============

/// 从 TOML 字符串加载应用配置
pub fn load_config_from_toml_str(s: &str) -> Result<ManagerConfig> {
    Ok(toml::from_str(s)?)
}

/// Loads the configuration file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<ManagerConfig> {
    match std::fs::read_to_string(path) {
        Ok(s) => load_config_from_toml_str(&s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(ManagerConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = load_config_from_toml_str("").unwrap();
        assert_eq!(cfg.services.ap_service, "listener-ap");
        assert_eq!(cfg.tether.interface, "wlan0");
        assert_eq!(cfg.radio.lease_time, "12h");
        assert_eq!(
            cfg.paths.hostapd_conf("wlan1"),
            PathBuf::from("/home/fpp/listen-sync/hostapd-wlan1.conf")
        );
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let cfg = load_config_from_toml_str(
            r#"
            [paths]
            artifact_dir = "/tmp/ap"

            [tether]
            interface = "wlan1"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.paths.dnsmasq_conf("wlan0"), PathBuf::from("/tmp/ap/dnsmasq-wlan0.conf"));
        assert_eq!(cfg.paths.lease_dir, PathBuf::from("/var/lib/misc"));
        assert_eq!(cfg.tether.interface, "wlan1");
        assert_eq!(cfg.tether.timeout_ms, 3000);
    }

    #[test]
    fn maintenance_tables() {
        let cfg = load_config_from_toml_str(
            r#"
            [logs]
            sync_log = "/tmp/sync.log"

            [wifi]
            settle_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.logs.sync_log, PathBuf::from("/tmp/sync.log"));
        assert!(cfg.logs.units.iter().any(|u| u == "hostapd"));
        assert!(!cfg.logs.clearable_units.iter().any(|u| u == "hostapd"));
        assert_eq!(cfg.wifi.settle(), Duration::ZERO);
        assert_eq!(cfg.services.restartable, ["listener-ap", "dnsmasq", "ws-sync"]);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(matches!(
            load_config_from_toml_str("[paths\nroles_file = 1"),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.services.host_ap_service, "hostapd");
    }
}
