use async_trait::async_trait;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::Path;

// 在这里定义所有后端共享的 trait：副作用、只读探测、宿主机设置。

/// A network interface as seen by the live system probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    /// `ethernet`, `wifi` or `wifi-usb`.
    #[serde(rename = "type")]
    pub kind: String,
    pub operstate: String,
    pub mac: String,
    pub wireless: bool,
}

/// One IPv4 address bound to an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub interface: String,
    pub ip: Ipv4Addr,
    pub prefix: u8,
}

/// Privileged side effects issued after a successful save.
///
/// The core never retries or rolls these back.
#[async_trait]
pub trait SystemController: Send + Sync {
    async fn restart_service(&self, name: &str) -> crate::Result<()>;

    async fn stop_service(&self, name: &str) -> crate::Result<()>;

    /// `systemctl is-active` style state; `unknown` when it cannot be read.
    async fn service_status(&self, name: &str) -> String;

    async fn set_link(&self, iface: &str, up: bool) -> crate::Result<()>;

    async fn set_address(&self, iface: &str, ip: Ipv4Addr, prefix: u8) -> crate::Result<()>;

    async fn flush_addresses(&self, iface: &str) -> crate::Result<()>;

    /// Atomically installs `contents` at `path`.
    async fn install_file(&self, path: &Path, contents: &str) -> crate::Result<()>;

    /// Rotates the journal and vacuums the entries of `unit`.
    async fn vacuum_journal(&self, unit: &str) -> crate::Result<()>;

    /// Empties `path`; a missing file is left missing.
    async fn truncate_file(&self, path: &Path) -> crate::Result<()>;

    /// `wpa_cli -i <iface> <args>`, trimmed stdout.
    async fn wpa_cli(&self, iface: &str, args: &[&str]) -> crate::Result<String>;
}

/// Read-only, best-effort views of the live system.
///
/// Implementations swallow failures and return empty results; callers never
/// see an error from a probe.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Every interface except loopback.
    async fn list_interfaces(&self) -> Vec<InterfaceInfo>;

    async fn interface_exists(&self, iface: &str) -> bool;

    /// Every IPv4 address on the host, loopback included.
    async fn ipv4_addresses(&self) -> Vec<InterfaceAddress>;

    /// Raw dnsmasq lease file contents for `iface`.
    async fn read_leases(&self, iface: &str) -> String;

    /// Raw `/proc/net/arp` contents.
    async fn read_arp_table(&self) -> String;

    /// Raw `iw dev <iface> station dump` output.
    async fn station_dump(&self, iface: &str) -> String;

    async fn process_running(&self, pattern: &str) -> bool;

    /// Names of the active nftables tables.
    async fn firewall_tables(&self) -> Vec<String>;

    /// Sends one echo request to each target so that reachable hosts land
    /// in the ARP table.
    async fn ping_sweep(&self, targets: &[Ipv4Addr]);

    /// The last `lines` journal entries of `unit`.
    async fn journal_tail(&self, unit: &str, lines: usize) -> String;

    /// The last `lines` lines of `path`, `None` when it does not exist.
    async fn file_tail(&self, path: &Path, lines: usize) -> Option<String>;
}

/// The host platform's own settings store, used for the tethering mode.
#[async_trait]
pub trait TetherSettings: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    /// Returns `true` when the host accepted the value.
    async fn put(&self, key: &str, value: &str) -> bool;
}
