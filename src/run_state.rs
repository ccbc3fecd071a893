//! Power-source states and the daemon's shared runtime state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Power source the machine currently runs on. Drives profile selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Ac,
    Bat,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Ac => write!(f, "power_ac"),
            PowerState::Bat => write!(f, "power_bat"),
        }
    }
}

/// Runtime state every control loop reads at the start of a tick.
///
/// The state monitor is the single writer of `active_state`; the coordinator
/// is the single writer of `active_profile_name`. Loops only read.
#[derive(Debug, Clone)]
pub struct DaemonRunState {
    pub active_state: Option<PowerState>,
    pub active_profile_name: String,
}

impl DaemonRunState {
    pub fn new() -> Self {
        Self {
            active_state: None,
            active_profile_name: String::new(),
        }
    }
}

impl Default for DaemonRunState {
    fn default() -> Self {
        Self::new()
    }
}
