//! Upgrades from the two older store generations:
//!
//! 1. flat strings, `{"wlan0": "listener"}`, with AP fields recovered from the
//!    previously generated hostapd config and the single-AP settings file;
//! 2. no store at all, only the single-AP `KEY=value` settings file.

use crate::model::{ApSettings, Role, RoleConfig, RoleMap};
use crate::validate;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, warn};

/// Ordered `key=value` lines. Lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues(Vec<(String, String)>);

impl KeyValues {
    pub fn parse(text: &str) -> Self {
        let pairs = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| {
                let t = l.trim_start();
                !t.is_empty() && !t.starts_with('#')
            })
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect();
        Self(pairs)
    }

    /// First non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }
}

/// Legacy files that may hold AP parameters. Absent files are `None`.
#[derive(Debug, Clone, Default)]
pub struct LegacySources {
    pub ap_conf: Option<KeyValues>,
    pub hostapd: Option<KeyValues>,
}

impl LegacySources {
    pub fn read(ap_conf: &Path, hostapd: &Path) -> Self {
        Self {
            ap_conf: read_key_values(ap_conf),
            hostapd: read_key_values(hostapd),
        }
    }

    fn ap_value(&self, key: &str) -> Option<&str> {
        self.ap_conf.as_ref().and_then(|kv| kv.get(key))
    }

    fn ap_ip(&self, key: &str) -> Option<Ipv4Addr> {
        self.ap_value(key).and_then(|v| validate::ipv4(v).ok())
    }

    fn ap_mask(&self, key: &str) -> Option<u8> {
        self.ap_value(key)
            .and_then(|v| v.trim().parse::<u8>().ok())
            .and_then(|m| validate::mask(m).ok())
    }

    /// Recovers ssid / channel / passphrase from the old hostapd config,
    /// keeping only values that still pass validation for `role`.
    fn recover_radio(&self, role: Role, ap: &mut ApSettings) {
        let Some(h) = &self.hostapd else { return };
        if let Some(ssid) = h.get("ssid").filter(|s| validate::ssid(s).is_ok()) {
            ap.ssid = ssid.to_string();
        }
        if let Some(ch) = h
            .get("channel")
            .and_then(|c| c.trim().parse::<i64>().ok())
            .and_then(|c| validate::channel(c).ok())
        {
            ap.channel = ch;
        }
        if let Some(pw) = h
            .get("wpa_passphrase")
            .filter(|p| validate::password(role, p).is_ok())
        {
            ap.password = pw.to_string();
        }
    }
}

fn read_key_values(path: &Path) -> Option<KeyValues> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(KeyValues::parse(&text)),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "legacy file not readable");
            None
        }
    }
}

/// Upgrades a store in which at least one value is a plain role string.
/// Structured entries present alongside are kept as they are.
pub(super) fn upgrade_flat(entries: &serde_json::Map<String, Value>, legacy: &LegacySources) -> RoleMap {
    let mut roles = RoleMap::new();
    for (iface, value) in entries {
        let cfg = match value {
            Value::String(name) => match Role::from_legacy(name) {
                Some(role) => upgrade_entry(role, legacy),
                None => {
                    warn!(interface = %iface, role = %name, "unknown legacy role, dropping entry");
                    continue;
                }
            },
            other => match serde_json::from_value::<RoleConfig>(other.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(interface = %iface, error = %e, "skipping malformed role entry");
                    continue;
                }
            },
        };
        if cfg.role.clears() {
            continue;
        }
        debug!(interface = %iface, role = %cfg.role, "migrated entry");
        roles.insert(iface.clone(), cfg);
    }
    roles
}

fn upgrade_entry(role: Role, legacy: &LegacySources) -> RoleConfig {
    let Some(mut ap) = ApSettings::defaults_for(role) else {
        return RoleConfig::new(role);
    };
    legacy.recover_radio(role, &mut ap);
    if let Some(ip) = legacy.ap_ip("AP_IP") {
        ap.ip = ip;
    }
    if let Some(mask) = legacy.ap_mask("AP_MASK") {
        ap.mask = mask;
    }
    RoleConfig::from_settings(role, ap)
}

/// Builds a store from the single-AP settings file: one `sbs` entry for the
/// configured interface and, when the show AP flag is set, one `listener`
/// entry on the other standard interface.
pub(super) fn from_single_ap(legacy: &LegacySources) -> RoleMap {
    let mut roles = RoleMap::new();
    if legacy.ap_conf.is_none() {
        return roles;
    }

    let primary = legacy
        .ap_value("WLAN_IF")
        .map(str::trim)
        .filter(|i| validate::interface_name(i).is_ok())
        .unwrap_or("wlan0")
        .to_string();

    roles.insert(primary.clone(), upgrade_entry(Role::Sbs, legacy));

    if legacy.ap_value("SHOW_AP_ENABLED").map(str::trim) == Some("1") {
        let secondary = if primary == "wlan0" { "wlan1" } else { "wlan0" };
        let Some(mut ap) = ApSettings::defaults_for(Role::Listener) else {
            return roles;
        };
        if let Some(ssid) = legacy
            .ap_value("SHOW_AP_SSID")
            .filter(|s| validate::ssid(s).is_ok())
        {
            ap.ssid = ssid.to_string();
        }
        if let Some(ip) = legacy.ap_ip("SHOW_AP_IP") {
            ap.ip = ip;
        }
        if let Some(mask) = legacy.ap_mask("SHOW_AP_MASK") {
            ap.mask = mask;
        }
        roles.insert(secondary.to_string(), RoleConfig::from_settings(Role::Listener, ap));
    }
    roles
}
