use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Persisted mapping of interface name to its role record.
///
/// A `BTreeMap` keeps key order stable so the serialized store diffs cleanly.
pub type RoleMap = BTreeMap<String, RoleConfig>;

pub const DEFAULT_MASK: u8 = 24;

/// The functional purpose assigned to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Single Board Show: the WPA2 access point the show runs on.
    #[serde(rename = "sbs")]
    Sbs,
    /// Audience-facing, client-isolated access point.
    #[serde(rename = "listener")]
    Listener,
    /// Internet / management uplink. Carries no AP fields.
    #[serde(rename = "show_network")]
    ShowNetwork,
    #[serde(rename = "unused")]
    Unused,
    #[serde(rename = "")]
    Unassigned,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Sbs => "sbs",
            Role::Listener => "listener",
            Role::ShowNetwork => "show_network",
            Role::Unused => "unused",
            Role::Unassigned => "",
        }
    }

    /// Roles that run hostapd + dnsmasq on the interface.
    pub fn is_ap(self) -> bool {
        matches!(self, Role::Sbs | Role::Listener)
    }

    /// Roles whose assignment removes the interface from the store.
    pub fn clears(self) -> bool {
        matches!(self, Role::Unused | Role::Unassigned)
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Sbs => "Single Board Show",
            Role::Listener => "Listener AP",
            Role::ShowNetwork => "Show Network",
            Role::Unused | Role::Unassigned => "Unused",
        }
    }

    /// Parses a role name from the flat-string store generation.
    ///
    /// In that generation `listener` named the show AP, which is `sbs` today.
    pub fn from_legacy(name: &str) -> Option<Role> {
        match name {
            "internet" | "show" => Some(Role::ShowNetwork),
            "listener" => Some(Role::Sbs),
            other => other.parse().ok(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sbs" => Ok(Role::Sbs),
            "listener" => Ok(Role::Listener),
            "show_network" => Ok(Role::ShowNetwork),
            "unused" => Ok(Role::Unused),
            "" => Ok(Role::Unassigned),
            _ => Err(crate::ValidationError::InvalidRole),
        }
    }
}

/// One interface's persisted role and access-point parameters.
///
/// AP fields are optional on disk; [`RoleConfig::fill_defaults`] is the one
/// place that decides what a role requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u8>,
}

/// A fully populated AP record, as consumed by the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApSettings {
    pub ssid: String,
    pub channel: u8,
    pub password: String,
    pub ip: Ipv4Addr,
    pub mask: u8,
}

impl ApSettings {
    pub fn defaults_for(role: Role) -> Option<ApSettings> {
        match role {
            Role::Sbs => Some(ApSettings {
                ssid: "EAVESDROP".to_string(),
                channel: 6,
                password: "Listen123".to_string(),
                ip: Ipv4Addr::new(192, 168, 40, 1),
                mask: DEFAULT_MASK,
            }),
            Role::Listener => Some(ApSettings {
                ssid: "SHOW_AUDIO".to_string(),
                channel: 11,
                password: String::new(),
                ip: Ipv4Addr::new(192, 168, 50, 1),
                mask: DEFAULT_MASK,
            }),
            _ => None,
        }
    }
}

impl RoleConfig {
    /// A bare record with no AP fields.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ssid: None,
            channel: None,
            password: None,
            ip: None,
            mask: None,
        }
    }

    /// A record as created on first assignment of `role`.
    pub fn with_defaults(role: Role) -> Self {
        let mut cfg = Self::new(role);
        cfg.fill_defaults();
        cfg
    }

    pub fn from_settings(role: Role, ap: ApSettings) -> Self {
        Self {
            role,
            ssid: Some(ap.ssid),
            channel: Some(ap.channel),
            password: Some(ap.password),
            ip: Some(ap.ip),
            mask: Some(ap.mask),
        }
    }

    /// AP roles get every missing field from the role defaults; other roles
    /// lose their AP fields.
    pub fn fill_defaults(&mut self) {
        let Some(d) = ApSettings::defaults_for(self.role) else {
            let role = self.role;
            *self = Self::new(role);
            return;
        };
        // sbs 必须是 WPA2，继承来的空密码或非法密码不能保留
        if self.role == Role::Sbs
            && self
                .password
                .as_deref()
                .is_some_and(|p| crate::validate::password(Role::Sbs, p).is_err())
        {
            self.password = None;
        }
        self.ssid.get_or_insert(d.ssid);
        self.channel.get_or_insert(d.channel);
        self.password.get_or_insert(d.password);
        self.ip.get_or_insert(d.ip);
        self.mask.get_or_insert(d.mask);
    }

    /// Returns the complete AP parameters, or a contract error when the
    /// record is not an AP role or is missing a field.
    pub fn ap_settings(&self) -> Result<ApSettings> {
        if !self.role.is_ap() {
            return Err(Error::Contract(format!(
                "role '{}' has no access-point settings",
                self.role
            )));
        }
        let missing = |field: &str| {
            Error::Contract(format!("{} record is missing '{}'", self.role, field))
        };
        Ok(ApSettings {
            ssid: self.ssid.clone().ok_or_else(|| missing("ssid"))?,
            channel: self.channel.ok_or_else(|| missing("channel"))?,
            password: self.password.clone().ok_or_else(|| missing("password"))?,
            ip: self.ip.ok_or_else(|| missing("ip"))?,
            mask: self.mask.ok_or_else(|| missing("mask"))?,
        })
    }
}

/// The dashboard-facing `iface -> role string` view of a store.
pub fn role_summary(roles: &RoleMap) -> BTreeMap<String, String> {
    roles
        .iter()
        .map(|(iface, cfg)| (iface.clone(), cfg.role.as_str().to_string()))
        .collect()
}

/// One client of an AP interface, merged from leases, ARP and the station dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientRecord {
    /// Uppercase, colon separated.
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    /// e.g. `-52 dBm`, empty when the radio does not currently see the client.
    pub signal: String,
    /// `HH:MM:SS`, empty when the radio does not currently see the client.
    #[serde(rename = "connectedDuration")]
    pub connected_duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_aliases_map_to_current_roles() {
        assert_eq!(Role::from_legacy("internet"), Some(Role::ShowNetwork));
        assert_eq!(Role::from_legacy("show"), Some(Role::ShowNetwork));
        assert_eq!(Role::from_legacy("listener"), Some(Role::Sbs));
        assert_eq!(Role::from_legacy("sbs"), Some(Role::Sbs));
        assert_eq!(Role::from_legacy("bogus"), None);
    }

    #[test]
    fn fill_defaults_keeps_existing_fields() {
        let mut cfg = RoleConfig::new(Role::Listener);
        cfg.ssid = Some("Front Row".to_string());
        cfg.fill_defaults();
        let ap = cfg.ap_settings().unwrap();
        assert_eq!(ap.ssid, "Front Row");
        assert_eq!(ap.channel, 11);
        assert_eq!(ap.password, "");
        assert_eq!(ap.ip, Ipv4Addr::new(192, 168, 50, 1));
    }

    #[test]
    fn non_ap_roles_carry_no_fields() {
        let mut cfg = RoleConfig::with_defaults(Role::Sbs);
        cfg.role = Role::ShowNetwork;
        cfg.fill_defaults();
        assert_eq!(cfg, RoleConfig::new(Role::ShowNetwork));
        assert!(matches!(cfg.ap_settings(), Err(Error::Contract(_))));
    }

    #[test]
    fn open_listener_becoming_sbs_gets_a_password() {
        let mut cfg = RoleConfig::with_defaults(Role::Listener);
        cfg.ssid = Some("Kept".to_string());
        cfg.role = Role::Sbs;
        cfg.fill_defaults();
        assert_eq!(cfg.password.as_deref(), Some("Listen123"));
        assert_eq!(cfg.ssid.as_deref(), Some("Kept"));
        assert_eq!(cfg.channel, Some(11));
    }

    #[test]
    fn incomplete_ap_record_is_a_contract_error() {
        let mut cfg = RoleConfig::with_defaults(Role::Sbs);
        cfg.ip = None;
        assert!(matches!(cfg.ap_settings(), Err(Error::Contract(_))));
    }

    #[test]
    fn record_serializes_with_role_first_and_no_empty_fields() {
        let json = serde_json::to_string(&RoleConfig::new(Role::ShowNetwork)).unwrap();
        assert_eq!(json, r#"{"role":"show_network"}"#);

        let json = serde_json::to_string(&RoleConfig::with_defaults(Role::Sbs)).unwrap();
        assert_eq!(
            json,
            r#"{"role":"sbs","ssid":"EAVESDROP","channel":6,"password":"Listen123","ip":"192.168.40.1","mask":24}"#
        );
    }
}
