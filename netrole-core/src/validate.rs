//! Input validation. Every check runs before anything is written, and the
//! `Display` text of each error is what the operator sees.

use crate::model::{ApSettings, DEFAULT_MASK, Role, RoleConfig};
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid interface name")]
    InvalidInterface,

    #[error("Invalid role")]
    InvalidRole,

    #[error("Interface must be assigned SBS or Listener AP role first")]
    NotAnAccessPoint,

    #[error("SSID must be 1-32 printable characters")]
    InvalidSsid,

    #[error("Channel must be 1-11")]
    InvalidChannel,

    #[error("SBS mode requires a password (8-63 characters)")]
    PasswordRequired,

    #[error("Password must be 8-63 characters (or empty for open network)")]
    InvalidPasswordLength,

    #[error("Password may only contain printable ASCII characters other than quotes and backslash")]
    InvalidPasswordCharacters,

    #[error("Invalid IP address")]
    InvalidIp,

    #[error("Subnet mask must be between /8 and /24")]
    InvalidMask,

    #[error("No AP IP configured")]
    NoApAddress,

    #[error("Invalid log source")]
    InvalidLogSource,

    #[error("Invalid service name")]
    InvalidService,
}

/// Raw, unvalidated AP parameters as they arrive from an operator.
///
/// A `None` field keeps the value already stored for the interface. An
/// empty `password` is a request for an open network, not an omission.
#[derive(Debug, Clone, Default)]
pub struct ApRequest {
    pub ssid: Option<String>,
    pub channel: Option<i64>,
    pub password: Option<String>,
    pub ip: Option<String>,
    pub mask: Option<u8>,
}

/// Interface names accepted for role assignment, e.g. `eth0`, `wlan1`.
pub fn interface_name(name: &str) -> Result<(), ValidationError> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    ok.then_some(()).ok_or(ValidationError::InvalidInterface)
}

/// Interface names accepted for AP configuration: `wlan` followed by digits.
pub fn wireless_interface_name(name: &str) -> Result<(), ValidationError> {
    match name.strip_prefix("wlan") {
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => Ok(()),
        _ => Err(ValidationError::InvalidInterface),
    }
}

pub fn ssid(ssid: &str) -> Result<(), ValidationError> {
    let len = ssid.chars().count();
    if !(1..=32).contains(&len) || ssid.len() > 32 || ssid.chars().any(char::is_control) {
        return Err(ValidationError::InvalidSsid);
    }
    Ok(())
}

pub fn channel(channel: i64) -> Result<u8, ValidationError> {
    match channel {
        1..=11 => Ok(channel as u8),
        _ => Err(ValidationError::InvalidChannel),
    }
}

/// WPA2-PSK passphrase rules. `sbs` must be secured; `listener` may be open.
pub fn password(role: Role, password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return match role {
            Role::Sbs => Err(ValidationError::PasswordRequired),
            _ => Ok(()),
        };
    }
    if !(8..=63).contains(&password.len()) {
        return Err(match role {
            Role::Sbs => ValidationError::PasswordRequired,
            _ => ValidationError::InvalidPasswordLength,
        });
    }
    let printable = password
        .bytes()
        .all(|b| (0x20..=0x7e).contains(&b) && !matches!(b, b'"' | b'\'' | b'\\'));
    if !printable {
        return Err(ValidationError::InvalidPasswordCharacters);
    }
    Ok(())
}

pub fn ipv4(ip: &str) -> Result<Ipv4Addr, ValidationError> {
    let addr: Ipv4Addr = ip.trim().parse().map_err(|_| ValidationError::InvalidIp)?;
    if addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast() || addr.is_loopback() {
        return Err(ValidationError::InvalidIp);
    }
    Ok(addr)
}

/// DHCP ranges are derived for /24 or wider networks only.
pub fn mask(mask: u8) -> Result<u8, ValidationError> {
    match mask {
        8..=24 => Ok(mask),
        _ => Err(ValidationError::InvalidMask),
    }
}

/// Validates an AP request against the interface's `current` record, in the
/// order the operator sees the messages. Omitted fields come from `current`,
/// then from the role defaults, and are validated like supplied ones.
pub fn ap_request(current: &RoleConfig, req: &ApRequest) -> Result<ApSettings, ValidationError> {
    let role = current.role;
    let defaults = ApSettings::defaults_for(role).ok_or(ValidationError::NotAnAccessPoint)?;

    let ssid_value = req
        .ssid
        .clone()
        .or_else(|| current.ssid.clone())
        .unwrap_or(defaults.ssid);
    ssid(&ssid_value)?;

    let channel = channel(
        req.channel
            .or(current.channel.map(i64::from))
            .unwrap_or(i64::from(defaults.channel)),
    )?;

    let password_value = req
        .password
        .clone()
        .or_else(|| current.password.clone())
        .unwrap_or(defaults.password);
    password(role, &password_value)?;

    let ip = match &req.ip {
        Some(raw) => ipv4(raw)?,
        None => current.ip.unwrap_or(defaults.ip),
    };
    let mask = mask(req.mask.or(current.mask).unwrap_or(DEFAULT_MASK))?;

    Ok(ApSettings {
        ssid: ssid_value,
        channel,
        password: password_value,
        ip,
        mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(password: &str) -> ApRequest {
        ApRequest {
            ssid: Some("EAVESDROP".into()),
            channel: Some(6),
            password: Some(password.into()),
            ip: Some("192.168.40.1".into()),
            mask: None,
        }
    }

    fn bare(role: Role) -> RoleConfig {
        RoleConfig::new(role)
    }

    #[test]
    fn interface_names() {
        assert!(interface_name("eth0").is_ok());
        assert!(interface_name("wlan1").is_ok());
        assert!(interface_name("").is_err());
        assert!(interface_name("wlan0; reboot").is_err());
        assert!(wireless_interface_name("wlan12").is_ok());
        assert!(wireless_interface_name("wlan").is_err());
        assert!(wireless_interface_name("eth0").is_err());
    }

    #[test]
    fn sbs_requires_a_passphrase() {
        assert_eq!(
            ap_request(&bare(Role::Sbs), &request("")),
            Err(ValidationError::PasswordRequired)
        );
        assert_eq!(
            ap_request(&bare(Role::Sbs), &request("Listen1")),
            Err(ValidationError::PasswordRequired)
        );
        let ap = ap_request(&bare(Role::Sbs), &request("Listen1234")).unwrap();
        assert_eq!(ap.mask, 24);
        assert_eq!(ap.ip, Ipv4Addr::new(192, 168, 40, 1));
    }

    #[test]
    fn listener_may_be_open() {
        assert!(ap_request(&bare(Role::Listener), &request("")).is_ok());
        assert_eq!(
            ap_request(&bare(Role::Listener), &request("short")),
            Err(ValidationError::InvalidPasswordLength)
        );
    }

    #[test]
    fn passphrase_rejects_quotes_and_backslash() {
        assert_eq!(
            password(Role::Listener, "pass\"word1"),
            Err(ValidationError::InvalidPasswordCharacters)
        );
        assert_eq!(
            password(Role::Sbs, "pass\\word1"),
            Err(ValidationError::InvalidPasswordCharacters)
        );
        assert_eq!(
            password(Role::Sbs, &"x".repeat(64)),
            Err(ValidationError::PasswordRequired)
        );
    }

    #[test]
    fn ssid_and_channel_bounds() {
        assert!(ssid("").is_err());
        assert!(ssid(&"a".repeat(33)).is_err());
        assert!(ssid("bad\nssid").is_err());
        assert!(ssid("Old Name").is_ok());
        assert_eq!(channel(0), Err(ValidationError::InvalidChannel));
        assert_eq!(channel(12), Err(ValidationError::InvalidChannel));
        assert_eq!(channel(11), Ok(11));
    }

    #[test]
    fn ip_and_mask() {
        assert!(ipv4("192.168.50.1").is_ok());
        assert!(ipv4("192.168.50").is_err());
        assert!(ipv4("0.0.0.0").is_err());
        assert_eq!(mask(25), Err(ValidationError::InvalidMask));
        assert_eq!(mask(16), Ok(16));
    }

    #[test]
    fn non_ap_role_rejected_first() {
        assert_eq!(
            ap_request(&bare(Role::ShowNetwork), &ApRequest::default()),
            Err(ValidationError::NotAnAccessPoint)
        );
    }

    #[test]
    fn omitted_fields_keep_the_stored_values() {
        let mut current = RoleConfig::with_defaults(Role::Listener);
        current.password = Some("Password1".into());
        current.mask = Some(16);
        current.channel = Some(3);

        let ap = ap_request(
            &current,
            &ApRequest {
                ssid: Some("Front Row".into()),
                ..ApRequest::default()
            },
        )
        .unwrap();
        assert_eq!(ap.ssid, "Front Row");
        assert_eq!(ap.channel, 3);
        assert_eq!(ap.password, "Password1");
        assert_eq!(ap.ip, Ipv4Addr::new(192, 168, 50, 1));
        assert_eq!(ap.mask, 16);

        // an explicit empty password still opens the network
        let open = ap_request(
            &current,
            &ApRequest {
                password: Some(String::new()),
                ..ApRequest::default()
            },
        )
        .unwrap();
        assert_eq!(open.password, "");
    }

    #[test]
    fn empty_request_on_a_bare_record_takes_role_defaults() {
        let ap = ap_request(&bare(Role::Sbs), &ApRequest::default()).unwrap();
        assert_eq!(ap, ApSettings::defaults_for(Role::Sbs).unwrap());
    }
}
