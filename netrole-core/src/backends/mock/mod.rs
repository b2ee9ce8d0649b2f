use crate::backends::utils::tail_lines;
use crate::traits::{InterfaceAddress, InterfaceInfo, NetworkProbe, SystemController, TetherSettings};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A side effect issued against the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RestartService(String),
    StopService(String),
    SetLink(String, bool),
    SetAddress(String, Ipv4Addr, u8),
    FlushAddresses(String),
    InstallFile(PathBuf),
    PutSetting(String, String),
    /// Number of targets pinged.
    PingSweep(usize),
    VacuumJournal(String),
    TruncateFile(PathBuf),
    WpaCli(String, Vec<String>),
}

#[derive(Debug)]
struct MockState {
    interfaces: Vec<InterfaceInfo>,
    addresses: Vec<InterfaceAddress>,
    leases: HashMap<String, String>,
    arp: String,
    station_dumps: HashMap<String, String>,
    processes: HashSet<String>,
    firewall_tables: Vec<String>,
    services: HashMap<String, String>,
    failing_services: HashSet<String>,
    settings: HashMap<String, String>,
    settings_available: bool,
    fail_installs: bool,
    files: BTreeMap<PathBuf, String>,
    journals: HashMap<String, String>,
    wpa_status: HashMap<String, String>,
    actions: Vec<Action>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            addresses: Vec::new(),
            leases: HashMap::new(),
            arp: String::new(),
            station_dumps: HashMap::new(),
            processes: HashSet::new(),
            firewall_tables: Vec::new(),
            services: HashMap::new(),
            failing_services: HashSet::new(),
            settings: HashMap::new(),
            settings_available: true,
            fail_installs: false,
            files: BTreeMap::new(),
            journals: HashMap::new(),
            wpa_status: HashMap::new(),
            actions: Vec::new(),
        }
    }
}

/// In-memory host used by tests: probe results come from fixtures and every
/// side effect is recorded instead of executed.
#[derive(Debug, Default)]
pub struct MockSystem {
    state: Mutex<MockState>,
}

impl MockSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============= fixtures =============

    pub fn add_interface(&self, name: &str, kind: &str) {
        let index = self.state().interfaces.len() as u8;
        self.state().interfaces.push(InterfaceInfo {
            name: name.to_string(),
            kind: kind.to_string(),
            operstate: "up".to_string(),
            mac: format!("b8:27:eb:00:00:{index:02x}"),
            wireless: kind.starts_with("wifi"),
        });
    }

    pub fn add_address(&self, iface: &str, ip: Ipv4Addr, prefix: u8) {
        self.state().addresses.push(InterfaceAddress {
            interface: iface.to_string(),
            ip,
            prefix,
        });
    }

    pub fn set_leases(&self, iface: &str, text: &str) {
        self.state().leases.insert(iface.to_string(), text.to_string());
    }

    pub fn set_arp_table(&self, text: &str) {
        self.state().arp = text.to_string();
    }

    pub fn set_station_dump(&self, iface: &str, text: &str) {
        self.state()
            .station_dumps
            .insert(iface.to_string(), text.to_string());
    }

    pub fn add_process(&self, pattern: &str) {
        self.state().processes.insert(pattern.to_string());
    }

    pub fn add_firewall_table(&self, name: &str) {
        self.state().firewall_tables.push(name.to_string());
    }

    pub fn set_service_state(&self, name: &str, state: &str) {
        self.state()
            .services
            .insert(name.to_string(), state.to_string());
    }

    /// Makes restart / stop of `name` fail.
    pub fn fail_service(&self, name: &str) {
        self.state().failing_services.insert(name.to_string());
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.state()
            .settings
            .insert(key.to_string(), value.to_string());
    }

    /// When false the settings API behaves as unreachable.
    pub fn set_settings_available(&self, available: bool) {
        self.state().settings_available = available;
    }

    pub fn fail_installs(&self, fail: bool) {
        self.state().fail_installs = fail;
    }

    /// Seeds a file as if it already existed on the host.
    pub fn set_file(&self, path: &Path, contents: &str) {
        self.state()
            .files
            .insert(path.to_path_buf(), contents.to_string());
    }

    pub fn set_journal(&self, unit: &str, text: &str) {
        self.state()
            .journals
            .insert(unit.to_string(), text.to_string());
    }

    /// Output of `wpa_cli -i <iface> status`.
    pub fn set_wpa_status(&self, iface: &str, text: &str) {
        self.state()
            .wpa_status
            .insert(iface.to_string(), text.to_string());
    }

    // ============= inspection =============

    pub fn actions(&self) -> Vec<Action> {
        self.state().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.state().actions.clear();
    }

    /// Contents most recently installed at `path`.
    pub fn file(&self, path: &Path) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.state().settings.get(key).cloned()
    }

    fn record(&self, action: Action) {
        debug!(?action, "mock action");
        self.state().actions.push(action);
    }

    fn service_result(&self, name: &str) -> Result<()> {
        if self.state().failing_services.contains(name) {
            return Err(Error::CommandFailed(format!("systemctl {name} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl SystemController for MockSystem {
    async fn restart_service(&self, name: &str) -> Result<()> {
        self.record(Action::RestartService(name.to_string()));
        self.service_result(name)?;
        self.set_service_state(name, "active");
        Ok(())
    }

    async fn stop_service(&self, name: &str) -> Result<()> {
        self.record(Action::StopService(name.to_string()));
        self.service_result(name)?;
        self.set_service_state(name, "inactive");
        Ok(())
    }

    async fn service_status(&self, name: &str) -> String {
        self.state()
            .services
            .get(name)
            .cloned()
            .unwrap_or_else(|| "inactive".to_string())
    }

    async fn set_link(&self, iface: &str, up: bool) -> Result<()> {
        self.record(Action::SetLink(iface.to_string(), up));
        Ok(())
    }

    async fn set_address(&self, iface: &str, ip: Ipv4Addr, prefix: u8) -> Result<()> {
        self.record(Action::SetAddress(iface.to_string(), ip, prefix));
        let mut state = self.state();
        state.addresses.retain(|a| a.interface != iface);
        state.addresses.push(InterfaceAddress {
            interface: iface.to_string(),
            ip,
            prefix,
        });
        Ok(())
    }

    async fn flush_addresses(&self, iface: &str) -> Result<()> {
        self.record(Action::FlushAddresses(iface.to_string()));
        self.state().addresses.retain(|a| a.interface != iface);
        Ok(())
    }

    async fn install_file(&self, path: &Path, contents: &str) -> Result<()> {
        self.record(Action::InstallFile(path.to_path_buf()));
        let mut state = self.state();
        if state.fail_installs {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot write {}", path.display()),
            )));
        }
        state.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    async fn vacuum_journal(&self, unit: &str) -> Result<()> {
        self.record(Action::VacuumJournal(unit.to_string()));
        self.state().journals.remove(unit);
        Ok(())
    }

    async fn truncate_file(&self, path: &Path) -> Result<()> {
        self.record(Action::TruncateFile(path.to_path_buf()));
        if let Some(contents) = self.state().files.get_mut(path) {
            contents.clear();
        }
        Ok(())
    }

    async fn wpa_cli(&self, iface: &str, args: &[&str]) -> Result<String> {
        self.record(Action::WpaCli(
            iface.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        if args == ["status"] {
            return Ok(self.state().wpa_status.get(iface).cloned().unwrap_or_default());
        }
        Ok("OK".to_string())
    }
}

#[async_trait]
impl NetworkProbe for MockSystem {
    async fn list_interfaces(&self) -> Vec<InterfaceInfo> {
        self.state().interfaces.clone()
    }

    async fn interface_exists(&self, iface: &str) -> bool {
        self.state().interfaces.iter().any(|i| i.name == iface)
    }

    async fn ipv4_addresses(&self) -> Vec<InterfaceAddress> {
        self.state().addresses.clone()
    }

    async fn read_leases(&self, iface: &str) -> String {
        self.state().leases.get(iface).cloned().unwrap_or_default()
    }

    async fn read_arp_table(&self) -> String {
        self.state().arp.clone()
    }

    async fn station_dump(&self, iface: &str) -> String {
        self.state()
            .station_dumps
            .get(iface)
            .cloned()
            .unwrap_or_default()
    }

    async fn process_running(&self, pattern: &str) -> bool {
        self.state().processes.contains(pattern)
    }

    async fn firewall_tables(&self) -> Vec<String> {
        self.state().firewall_tables.clone()
    }

    async fn ping_sweep(&self, targets: &[Ipv4Addr]) {
        self.record(Action::PingSweep(targets.len()));
    }

    async fn journal_tail(&self, unit: &str, lines: usize) -> String {
        let state = self.state();
        state
            .journals
            .get(unit)
            .map(|text| tail_lines(text, lines))
            .unwrap_or_default()
    }

    async fn file_tail(&self, path: &Path, lines: usize) -> Option<String> {
        self.state().files.get(path).map(|text| tail_lines(text, lines))
    }
}

#[async_trait]
impl TetherSettings for MockSystem {
    async fn get(&self, key: &str) -> Option<String> {
        let state = self.state();
        if !state.settings_available {
            return None;
        }
        state.settings.get(key).cloned()
    }

    async fn put(&self, key: &str, value: &str) -> bool {
        self.record(Action::PutSetting(key.to_string(), value.to_string()));
        let mut state = self.state();
        if !state.settings_available {
            return false;
        }
        state.settings.insert(key.to_string(), value.to_string());
        true
    }
}
