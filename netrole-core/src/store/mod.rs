//! Durable `interface -> RoleConfig` mapping.
//!
//! Loading never fails: a missing, empty or corrupt store degrades to
//! "nothing configured". Older store generations are upgraded on load and the
//! upgraded form is written back immediately, so migration runs once.

mod migration;

pub use migration::{KeyValues, LegacySources};

use crate::backends::utils::write_atomic;
use crate::config::PathsConfig;
use crate::model::{RoleConfig, RoleMap};
use crate::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RoleStore {
    path: PathBuf,
    legacy_ap_conf: PathBuf,
    legacy_hostapd_conf: PathBuf,
}

impl RoleStore {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            path: paths.roles_file.clone(),
            legacy_ap_conf: paths.legacy_ap_conf.clone(),
            legacy_hostapd_conf: paths.legacy_hostapd_conf.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the store, migrating older generations when found.
    pub fn load(&self) -> RoleMap {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "role store unreadable, treating as empty");
                String::new()
            }
        };

        let entries = if raw.trim().is_empty() {
            serde_json::Map::new()
        } else {
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!(path = %self.path.display(), "role store is not an object, treating as empty");
                    serde_json::Map::new()
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "role store is corrupt, treating as empty");
                    serde_json::Map::new()
                }
            }
        };

        let (roles, migrated) = if entries.values().any(Value::is_string) {
            info!("flat-string role store found, migrating");
            let legacy = LegacySources::read(&self.legacy_ap_conf, &self.legacy_hostapd_conf);
            (migration::upgrade_flat(&entries, &legacy), true)
        } else if entries.is_empty() && self.legacy_ap_conf.exists() {
            info!(path = %self.legacy_ap_conf.display(), "no role store, migrating single-AP settings");
            let legacy = LegacySources::read(&self.legacy_ap_conf, &self.legacy_hostapd_conf);
            let roles = migration::from_single_ap(&legacy);
            let migrated = !roles.is_empty();
            (roles, migrated)
        } else {
            (decode_structured(&entries), false)
        };

        if migrated {
            match self.save(&roles) {
                Ok(()) => info!(entries = roles.len(), "migrated role store written"),
                Err(e) => warn!(error = %e, "failed to persist migrated role store"),
            }
        }
        roles
    }

    /// Serializes deterministically and atomically replaces the store file.
    pub fn save(&self, roles: &RoleMap) -> Result<()> {
        let mut json = serde_json::to_string_pretty(roles)?;
        json.push('\n');

        write_atomic(&self.path, &json, 0o644)?;
        debug!(path = %self.path.display(), entries = roles.len(), "role store saved");
        Ok(())
    }
}

/// Decodes structured entries one at a time so a single bad record does not
/// take the rest of the store with it.
fn decode_structured(entries: &serde_json::Map<String, Value>) -> RoleMap {
    let mut roles = RoleMap::new();
    for (iface, value) in entries {
        match serde_json::from_value::<RoleConfig>(value.clone()) {
            Ok(cfg) if cfg.role.clears() => {
                debug!(interface = %iface, "dropping unmanaged entry");
            }
            Ok(cfg) => {
                roles.insert(iface.clone(), cfg);
            }
            Err(e) => {
                warn!(interface = %iface, error = %e, "skipping malformed role entry");
            }
        }
    }
    roles
}
