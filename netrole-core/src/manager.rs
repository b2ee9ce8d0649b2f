//! The control surface: validates operator requests, drives the store,
//! synthesizer, conflict detector and tether coordinator in order, and
//! issues the apply side effects.
//!
//! Only validation and I/O failures are returned as errors. Everything the
//! host does wrong after a successful write is reported in `advisories`.

use crate::clients::ClientReconciler;
use crate::config::ManagerConfig;
use crate::model::{role_summary, ApSettings, ClientRecord, Role, RoleConfig, DEFAULT_MASK};
use crate::store::RoleStore;
use crate::subnet::{prefix_mask, SubnetConflictDetector};
use crate::synth::{Artifacts, ConfigSynthesizer};
use crate::tether::{TetherCoordinator, TetherMode};
use crate::traits::{InterfaceInfo, NetworkProbe, SystemController, TetherSettings};
use crate::validate::{self, ApRequest, ValidationError};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Host offsets probed by a client scan.
const SCAN_FIRST_HOST: u32 = 10;
const SCAN_LAST_HOST: u32 = 254;

/// Interface used for client listing when no AP role is assigned.
const FALLBACK_AP_INTERFACE: &str = "wlan0";

/// Log source backed by the sync service's plain log file.
pub const SYNC_LOG_SOURCE: &str = "sync";

pub const DEFAULT_LOG_LINES: i64 = 50;
const LOG_LINES_MIN: i64 = 10;
const LOG_LINES_MAX: i64 = 200;

/// Shown for an interface that has never been configured.
const VIEW_DEFAULT_SSID: &str = "EAVESDROP";
const VIEW_DEFAULT_CHANNEL: u8 = 6;
const VIEW_DEFAULT_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 1);

#[derive(Debug, Clone, Serialize)]
pub struct RoleChange {
    pub interface: String,
    pub role: Role,
    /// Updated `iface -> role` summary.
    pub roles: BTreeMap<String, String>,
    pub tether_disabled: bool,
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceConfigView {
    pub interface: String,
    pub role: Role,
    pub ssid: String,
    pub channel: u8,
    pub password: String,
    pub ip: Ipv4Addr,
    pub mask: u8,
    pub subnet_conflict: Option<String>,
    /// Wireless interfaces present on the host, for the interface picker.
    pub wireless_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub interface: String,
    pub role: Role,
    pub message: String,
    pub subnet_conflict: Option<String>,
    pub tether_disabled: bool,
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientList {
    pub interface: String,
    pub clients: Vec<ClientRecord>,
    pub scanned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApStatus {
    pub interface: String,
    pub role: Role,
    pub label: &'static str,
    pub ssid: String,
    pub channel: u8,
    /// Live address in CIDR form, empty when the interface has none.
    pub live_ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub services: BTreeMap<String, String>,
    pub firewall_active: bool,
    pub tether_state: Option<String>,
    pub tether_label: &'static str,
    pub access_points: Vec<ApStatus>,
    pub client_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceView {
    #[serde(flatten)]
    pub info: InterfaceInfo,
    pub ip: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub test: String,
    pub pass: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub all_pass: bool,
    pub results: Vec<CheckResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogView {
    pub source: String,
    pub lines: usize,
    pub log: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsCleared {
    pub source: String,
    pub message: String,
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRestart {
    pub service: String,
    pub restarted: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WifiFix {
    pub interface: String,
    /// `wpa_state` after reassociation, empty when it could not be read.
    pub state: String,
    pub detail: String,
}

pub struct RoleManager {
    config: ManagerConfig,
    store: Mutex<RoleStore>,
    system: Arc<dyn SystemController>,
    probe: Arc<dyn NetworkProbe>,
    synth: ConfigSynthesizer,
    conflicts: SubnetConflictDetector,
    clients: ClientReconciler,
    tether: TetherCoordinator,
}

impl RoleManager {
    pub fn new(
        config: ManagerConfig,
        system: Arc<dyn SystemController>,
        probe: Arc<dyn NetworkProbe>,
        tether_settings: Arc<dyn TetherSettings>,
    ) -> Self {
        let store = RoleStore::new(&config.paths);
        let synth = ConfigSynthesizer::new(config.radio.clone(), config.paths.clone());
        let tether = TetherCoordinator::new(
            tether_settings,
            system.clone(),
            config.tether.interface.clone(),
            config.services.host_ap_service.clone(),
        );
        Self {
            store: Mutex::new(store),
            conflicts: SubnetConflictDetector::new(probe.clone()),
            clients: ClientReconciler::new(probe.clone()),
            synth,
            tether,
            system,
            probe,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub async fn roles(&self) -> BTreeMap<String, String> {
        let store = self.store.lock().await;
        role_summary(&store.load())
    }

    pub async fn interface_config(&self, iface: &str) -> Result<InterfaceConfigView> {
        validate::wireless_interface_name(iface)?;
        let stored = {
            let store = self.store.lock().await;
            store.load().remove(iface)
        };
        let cfg = stored.unwrap_or_else(|| RoleConfig::new(Role::Unassigned));

        let ip = cfg.ip.unwrap_or(VIEW_DEFAULT_IP);
        let mask = cfg.mask.unwrap_or(DEFAULT_MASK);
        let subnet_conflict = self.conflicts.check(ip, mask, iface).await;
        let wireless_interfaces = self
            .probe
            .list_interfaces()
            .await
            .into_iter()
            .filter(|i| i.wireless)
            .map(|i| i.name)
            .collect();

        Ok(InterfaceConfigView {
            interface: iface.to_string(),
            role: cfg.role,
            ssid: cfg.ssid.unwrap_or_else(|| VIEW_DEFAULT_SSID.to_string()),
            channel: cfg.channel.unwrap_or(VIEW_DEFAULT_CHANNEL),
            password: cfg.password.unwrap_or_default(),
            ip,
            mask,
            subnet_conflict,
            wireless_interfaces,
        })
    }

    /// Assigns `role` to `iface`. AP roles keep whatever AP fields are already
    /// stored and take role defaults for the rest; `unused` and `""` remove
    /// the entry.
    pub async fn assign_role(&self, iface: &str, role: &str) -> Result<RoleChange> {
        validate::interface_name(iface)?;
        let role: Role = role.parse()?;

        let store = self.store.lock().await;
        let mut roles = store.load();
        let previous = roles.get(iface).map(|c| c.role);

        if role.clears() {
            roles.remove(iface);
        } else {
            let mut cfg = roles
                .remove(iface)
                .unwrap_or_else(|| RoleConfig::new(role));
            cfg.role = role;
            cfg.fill_defaults();
            roles.insert(iface.to_string(), cfg);
        }
        store.save(&roles)?;
        info!(interface = %iface, role = %role, previous = ?previous, "role assigned");

        let mut advisories = Vec::new();
        if previous.is_some_and(Role::is_ap) && !role.is_ap() {
            if let Err(e) = self.system.flush_addresses(iface).await {
                warn!(interface = %iface, error = %e, "failed to release AP address");
                advisories.push(format!("Could not release AP address on {iface}: {e}"));
            }
            self.restart_ap_service(&mut advisories).await;
        }

        let tether = self.tether.reconcile(iface, previous, role).await;
        advisories.extend(tether.advisories);

        Ok(RoleChange {
            interface: iface.to_string(),
            role,
            roles: role_summary(&roles),
            tether_disabled: tether.disabled,
            advisories,
        })
    }

    /// Validates new AP parameters for `iface` on top of its stored record,
    /// installs the generated artifacts, stores the record and restarts the
    /// AP service. Fields the request leaves out keep their stored values.
    ///
    /// Artifacts are installed before the store is written. If either step
    /// fails, the artifacts of the previous record are put back and the store
    /// is left as it was.
    pub async fn save_config(&self, iface: &str, request: &ApRequest) -> Result<SaveOutcome> {
        validate::wireless_interface_name(iface)?;

        let store = self.store.lock().await;
        let mut roles = store.load();
        let current = roles
            .get(iface)
            .filter(|c| c.role.is_ap())
            .cloned()
            .ok_or(ValidationError::NotAnAccessPoint)?;
        let role = current.role;
        let ap = validate::ap_request(&current, request)?;

        let cfg = RoleConfig::from_settings(role, ap.clone());
        let artifacts = self.synth.synthesize(iface, &cfg)?;
        let committed = async {
            self.install_artifacts(iface, &artifacts).await?;
            roles.insert(iface.to_string(), cfg);
            store.save(&roles)
        };
        if let Err(e) = committed.await {
            warn!(interface = %iface, error = %e, "AP configuration not saved");
            self.reinstall_artifacts(iface, &current).await;
            return Err(e);
        }

        let subnet_conflict = self.conflicts.check(ap.ip, ap.mask, iface).await;

        let mut advisories = Vec::new();
        let tether = self.tether.reconcile(iface, Some(role), role).await;
        advisories.extend(tether.advisories);

        self.apply_address(iface, &ap, &mut advisories).await;
        self.restart_ap_service(&mut advisories).await;
        drop(store);

        let security = if ap.password.is_empty() { "Open" } else { "WPA2" };
        let mut message = format!(
            "{} restarted: {} ({}) on {} ({})",
            role.label(),
            security,
            ap.ssid,
            iface,
            ap.ip
        );
        if tether.disabled {
            message.push_str(" Host tether disabled.");
        }
        info!(interface = %iface, role = %role, ssid = %ap.ssid, "AP configuration applied");

        Ok(SaveOutcome {
            interface: iface.to_string(),
            role,
            message,
            subnet_conflict,
            tether_disabled: tether.disabled,
            advisories,
        })
    }

    /// Clients of `iface`, or of the first AP interface when none is given.
    pub async fn list_clients(&self, iface: Option<&str>) -> Result<ClientList> {
        let iface = match iface {
            Some(i) => {
                validate::interface_name(i)?;
                i.to_string()
            }
            None => self.default_ap_interface().await,
        };
        let clients = self.clients.list_clients(&iface).await;
        Ok(ClientList {
            interface: iface,
            clients,
            scanned: false,
        })
    }

    /// Pings the AP's DHCP range so statically addressed devices show up in
    /// the ARP table, then lists clients.
    pub async fn scan_clients(&self, iface: &str) -> Result<ClientList> {
        validate::wireless_interface_name(iface)?;
        let ip = {
            let store = self.store.lock().await;
            store.load().get(iface).and_then(|c| c.ip)
        };
        let ip = ip.ok_or(ValidationError::NoApAddress)?;

        let targets = scan_targets(ip);
        info!(interface = %iface, targets = targets.len(), "ping sweep");
        self.probe.ping_sweep(&targets).await;

        let clients = self.clients.list_clients(iface).await;
        Ok(ClientList {
            interface: iface.to_string(),
            clients,
            scanned: true,
        })
    }

    pub async fn status(&self) -> StatusReport {
        let roles = {
            let store = self.store.lock().await;
            store.load()
        };

        let mut services = BTreeMap::new();
        for name in &self.config.services.monitored {
            services.insert(name.clone(), self.system.service_status(name).await);
        }
        let firewall_active = self.firewall_active().await;

        let tether_state = self.tether.state().await;
        let addresses = self.probe.ipv4_addresses().await;

        let mut access_points = Vec::new();
        let mut client_count = 0;
        for (iface, cfg) in roles.iter().filter(|(_, c)| c.role.is_ap()) {
            let live_ip = addresses
                .iter()
                .find(|a| &a.interface == iface)
                .map(|a| format!("{}/{}", a.ip, a.prefix))
                .unwrap_or_default();
            client_count += self.clients.list_clients(iface).await.len();
            access_points.push(ApStatus {
                interface: iface.clone(),
                role: cfg.role,
                label: cfg.role.label(),
                ssid: cfg.ssid.clone().unwrap_or_default(),
                channel: cfg.channel.unwrap_or_default(),
                live_ip,
            });
        }

        StatusReport {
            services,
            firewall_active,
            tether_state: tether_state.map(|m| m.as_value().to_string()),
            tether_label: tether_state.map_or("unknown", TetherMode::label),
            access_points,
            client_count,
        }
    }

    pub async fn interfaces(&self) -> Vec<InterfaceView> {
        let roles = {
            let store = self.store.lock().await;
            store.load()
        };
        let addresses = self.probe.ipv4_addresses().await;
        self.probe
            .list_interfaces()
            .await
            .into_iter()
            .map(|info| {
                let ip = addresses
                    .iter()
                    .find(|a| a.interface == info.name)
                    .map(|a| a.ip.to_string())
                    .unwrap_or_default();
                let role = roles
                    .get(&info.name)
                    .map(|c| c.role.as_str().to_string())
                    .unwrap_or_default();
                InterfaceView { info, ip, role }
            })
            .collect()
    }

    pub async fn self_test(&self) -> SelfTestReport {
        let roles = {
            let store = self.store.lock().await;
            store.load()
        };
        let mut results = Vec::new();

        let ap_service = &self.config.services.ap_service;
        let state = self.system.service_status(ap_service).await;
        results.push(CheckResult {
            test: format!("{ap_service} service"),
            pass: state == "active",
            detail: state,
        });

        let addresses = self.probe.ipv4_addresses().await;
        for (iface, cfg) in roles.iter().filter(|(_, c)| c.role.is_ap()) {
            let tag = match cfg.role {
                Role::Sbs => "SBS",
                _ => "Listener",
            };
            if !self.probe.interface_exists(iface).await {
                results.push(CheckResult {
                    test: format!("{iface} ({tag})"),
                    pass: false,
                    detail: "interface not found".to_string(),
                });
                continue;
            }

            let ip = addresses
                .iter()
                .find(|a| &a.interface == iface)
                .map(|a| format!("{}/{}", a.ip, a.prefix));
            results.push(CheckResult {
                test: format!("{iface} IP ({tag})"),
                pass: ip.is_some(),
                detail: ip.unwrap_or_else(|| "no IP".to_string()),
            });

            let running = self.probe.process_running(&hostapd_pattern(iface)).await;
            results.push(CheckResult {
                test: format!("{iface} hostapd ({tag})"),
                pass: running,
                detail: if running { "running" } else { "stopped" }.to_string(),
            });
        }

        if roles.values().any(|c| c.role == Role::Listener) {
            let active = self.firewall_active().await;
            results.push(CheckResult {
                test: "nftables firewall".to_string(),
                pass: active,
                detail: if active { "active" } else { "inactive" }.to_string(),
            });
        }

        SelfTestReport {
            all_pass: results.iter().all(|r| r.pass),
            results,
        }
    }

    /// Tail of a service journal or of the sync log. `lines` is clamped to
    /// 10..=200.
    pub async fn logs(&self, source: &str, lines: i64) -> Result<LogView> {
        let lines = lines.clamp(LOG_LINES_MIN, LOG_LINES_MAX) as usize;
        let logs = &self.config.logs;
        let log = if source == SYNC_LOG_SOURCE {
            self.probe
                .file_tail(&logs.sync_log, lines)
                .await
                .unwrap_or_else(|| "(no sync.log found)".to_string())
        } else if logs.units.iter().any(|u| u == source) {
            self.probe.journal_tail(source, lines).await
        } else {
            return Err(ValidationError::InvalidLogSource.into());
        };
        Ok(LogView {
            source: source.to_string(),
            lines,
            log,
        })
    }

    /// Empties the sync log, or vacuums the journal of a clearable unit.
    pub async fn clear_logs(&self, source: &str) -> Result<LogsCleared> {
        let logs = &self.config.logs;
        let mut advisories = Vec::new();
        if source == SYNC_LOG_SOURCE {
            self.system.truncate_file(&logs.sync_log).await?;
        } else if logs.clearable_units.iter().any(|u| u == source) {
            if let Err(e) = self.system.vacuum_journal(source).await {
                warn!(unit = %source, error = %e, "journal vacuum failed");
                advisories.push(format!("Could not vacuum the {source} journal: {e}"));
            }
        } else {
            return Err(ValidationError::InvalidLogSource.into());
        }
        info!(source = %source, "logs cleared");
        Ok(LogsCleared {
            source: source.to_string(),
            message: format!("Logs cleared for {source}"),
            advisories,
        })
    }

    /// Restarts one of the configured `restartable` services.
    pub async fn restart_service(&self, name: &str) -> Result<ServiceRestart> {
        if !self.config.services.restartable.iter().any(|s| s == name) {
            return Err(ValidationError::InvalidService.into());
        }
        let (restarted, message) = match self.system.restart_service(name).await {
            Ok(()) => {
                info!(service = %name, "service restarted on request");
                (true, format!("{name} restarted"))
            }
            Err(e) => {
                warn!(service = %name, error = %e, "requested restart failed");
                (false, format!("Failed to restart {name}"))
            }
        };
        Ok(ServiceRestart {
            service: name.to_string(),
            restarted,
            message,
        })
    }

    /// Turns off management frame protection on the supplicant's first
    /// network and reassociates, for client radios that fail to join with
    /// `ieee80211w` enabled.
    pub async fn fix_wifi(&self, iface: &str) -> Result<WifiFix> {
        validate::wireless_interface_name(iface)?;

        let pmf = self.wpa_cli_text(iface, &["set_network", "0", "ieee80211w", "0"]).await;
        let reassociate = self.wpa_cli_text(iface, &["reassociate"]).await;
        tokio::time::sleep(self.config.wifi.settle()).await;
        let status = self.wpa_cli_text(iface, &["status"]).await;
        let state = parse_wpa_state(&status);
        info!(interface = %iface, state = %state, "wifi client reassociated");

        Ok(WifiFix {
            interface: iface.to_string(),
            state,
            detail: format!("ieee80211w={pmf}, reassociate={reassociate}"),
        })
    }

    /// `wpa_cli` output, or the error text when it could not run.
    async fn wpa_cli_text(&self, iface: &str, args: &[&str]) -> String {
        match self.system.wpa_cli(iface, args).await {
            Ok(out) => out,
            Err(e) => {
                warn!(interface = %iface, error = %e, "wpa_cli failed");
                e.to_string()
            }
        }
    }

    async fn default_ap_interface(&self) -> String {
        let store = self.store.lock().await;
        store
            .load()
            .into_iter()
            .find(|(_, c)| c.role.is_ap())
            .map(|(iface, _)| iface)
            .unwrap_or_else(|| FALLBACK_AP_INTERFACE.to_string())
    }

    async fn firewall_active(&self) -> bool {
        self.probe
            .firewall_tables()
            .await
            .iter()
            .any(|t| t.starts_with("listener_"))
    }

    async fn apply_address(&self, iface: &str, ap: &ApSettings, advisories: &mut Vec<String>) {
        let steps = async {
            self.system.flush_addresses(iface).await?;
            self.system.set_address(iface, ap.ip, ap.mask).await?;
            self.system.set_link(iface, true).await
        };
        if let Err(e) = steps.await {
            warn!(interface = %iface, error = %e, "failed to apply AP address");
            advisories.push(format!("Could not apply {}/{} to {iface}: {e}", ap.ip, ap.mask));
        }
    }

    async fn install_artifacts(&self, iface: &str, artifacts: &Artifacts) -> Result<()> {
        let paths = &self.config.paths;
        self.system
            .install_file(&paths.hostapd_conf(iface), &artifacts.hostapd)
            .await?;
        self.system
            .install_file(&paths.dnsmasq_conf(iface), &artifacts.dnsmasq)
            .await?;
        if let Some(rules) = &artifacts.firewall {
            self.system
                .install_file(&paths.firewall_rules(iface), rules)
                .await?;
        }
        Ok(())
    }

    /// Best effort: rewrites the artifacts of `previous` after a failed save.
    async fn reinstall_artifacts(&self, iface: &str, previous: &RoleConfig) {
        let restored = match self.synth.synthesize(iface, previous) {
            Ok(artifacts) => self.install_artifacts(iface, &artifacts).await,
            Err(e) => Err(e),
        };
        if let Err(e) = restored {
            warn!(interface = %iface, error = %e, "could not restore previous AP artifacts");
        }
    }

    async fn restart_ap_service(&self, advisories: &mut Vec<String>) {
        let service = &self.config.services.ap_service;
        if let Err(e) = self.system.restart_service(service).await {
            warn!(service = %service, error = %e, "AP service restart failed");
            advisories.push(format!("Could not restart {service}: {e}"));
        }
    }
}

/// `pgrep -f` pattern matching the hostapd instance serving `iface`.
pub fn hostapd_pattern(iface: &str) -> String {
    format!("hostapd.*{iface}")
}

/// `wpa_state` from `wpa_cli status` output.
pub fn parse_wpa_state(status: &str) -> String {
    status
        .lines()
        .find_map(|l| l.trim().strip_prefix("wpa_state="))
        .and_then(|v| v.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

/// `.10` to `.254` of the AP's /24.
pub fn scan_targets(ap_ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let network = u32::from(ap_ip) & prefix_mask(DEFAULT_MASK);
    (SCAN_FIRST_HOST..=SCAN_LAST_HOST)
        .map(|host| Ipv4Addr::from(network | host))
        .collect()
}
