//! Keeps the host platform's own tethering AP off the radio that `sbs` uses.

use crate::model::Role;
use crate::traits::{SystemController, TetherSettings};
use std::sync::Arc;
use tracing::{info, warn};

/// Host settings key holding the tethering tri-state.
pub const TETHER_KEY: &str = "EnableTethering";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TetherMode {
    /// Host tethers only when it has no other connectivity (host default).
    Conditional,
    Enabled,
    Disabled,
}

impl TetherMode {
    pub fn as_value(self) -> &'static str {
        match self {
            TetherMode::Conditional => "0",
            TetherMode::Enabled => "1",
            TetherMode::Disabled => "2",
        }
    }

    pub fn from_value(v: &str) -> Option<Self> {
        match v.trim() {
            "0" => Some(TetherMode::Conditional),
            "1" => Some(TetherMode::Enabled),
            "2" => Some(TetherMode::Disabled),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TetherMode::Conditional => "conditional",
            TetherMode::Enabled => "enabled",
            TetherMode::Disabled => "disabled",
        }
    }
}

/// What a reconcile did. Failures are advisories, never errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TetherOutcome {
    /// Tethering was switched off for this assignment.
    pub disabled: bool,
    pub restored: bool,
    pub advisories: Vec<String>,
}

#[derive(Clone)]
pub struct TetherCoordinator {
    settings: Arc<dyn TetherSettings>,
    system: Arc<dyn SystemController>,
    interface: String,
    host_ap_service: String,
}

impl TetherCoordinator {
    pub fn new(
        settings: Arc<dyn TetherSettings>,
        system: Arc<dyn SystemController>,
        interface: impl Into<String>,
        host_ap_service: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            system,
            interface: interface.into(),
            host_ap_service: host_ap_service.into(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Current host mode; `None` when unreachable or unrecognised.
    pub async fn state(&self) -> Option<TetherMode> {
        let raw = self.settings.get(TETHER_KEY).await?;
        TetherMode::from_value(&raw)
    }

    /// Applies the tether policy for `iface` moving from `previous` to `new`.
    ///
    /// `sbs` on the tether interface disables tethering and stops the host's
    /// AP daemon. Moving that interface from an AP role to a non-AP role (or
    /// clearing it) restores the conditional default, unless the host already
    /// reports another mode; `sbs -> listener` leaves tethering disabled.
    /// Everything else is left alone.
    pub async fn reconcile(&self, iface: &str, previous: Option<Role>, new: Role) -> TetherOutcome {
        let mut outcome = TetherOutcome::default();
        if iface != self.interface {
            return outcome;
        }

        if new == Role::Sbs {
            if self.set_mode(TetherMode::Disabled, &mut outcome).await {
                outcome.disabled = true;
            }
            if let Err(e) = self.system.stop_service(&self.host_ap_service).await {
                warn!(service = %self.host_ap_service, error = %e, "failed to stop host AP service");
                outcome
                    .advisories
                    .push(format!("Could not stop {}: {e}", self.host_ap_service));
            }
        } else if previous.is_some_and(Role::is_ap) && !new.is_ap() {
            // 用户自己选的模式不覆盖
            if matches!(self.state().await, None | Some(TetherMode::Disabled)) {
                outcome.restored = self.set_mode(TetherMode::Conditional, &mut outcome).await;
            }
        }
        outcome
    }

    async fn set_mode(&self, mode: TetherMode, outcome: &mut TetherOutcome) -> bool {
        if self.settings.put(TETHER_KEY, mode.as_value()).await {
            info!(interface = %self.interface, mode = mode.label(), "host tethering updated");
            true
        } else {
            warn!(interface = %self.interface, mode = mode.label(), "host tethering update rejected");
            outcome
                .advisories
                .push(format!("Host tether could not be set to {}", mode.label()));
            false
        }
    }
}
