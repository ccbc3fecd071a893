//! Shared runtime context handed to every worker and the bus layer.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{ConfigManager, Profile};
use crate::event::EventBus;
use crate::run_state::{DaemonRunState, PowerState};
use crate::telemetry::TelemetryStore;

/// Everything a control loop needs at tick time.
///
/// Passed explicitly instead of living in globals; clones share the same
/// underlying state.
#[derive(Clone)]
pub struct RunContext {
    pub config: ConfigManager,
    pub run_state: Arc<RwLock<DaemonRunState>>,
    pub telemetry: TelemetryStore,
    pub events: EventBus,
}

impl RunContext {
    pub fn new(config: ConfigManager) -> Self {
        Self {
            config,
            run_state: Arc::new(RwLock::new(DaemonRunState::new())),
            telemetry: TelemetryStore::new(),
            events: EventBus::new(),
        }
    }

    /// Snapshot of the profile the daemon currently runs under.
    pub async fn active_profile(&self) -> Profile {
        let name = self.run_state.read().await.active_profile_name.clone();
        match self.config.find_profile(&name).await {
            Some(profile) => profile,
            // Before the first state poll the name is empty; resolve from
            // the AC mapping so early ticks still get a usable profile.
            None => self.config.profile_for_state(PowerState::Ac).await,
        }
    }

    /// Records the freshly resolved state and profile name. Called by the
    /// state monitor, which is the single writer.
    pub async fn set_active(&self, state: PowerState, profile_name: String) {
        let mut run_state = self.run_state.write().await;
        run_state.active_state = Some(state);
        run_state.active_profile_name = profile_name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::config::DEFAULT_PROFILE_NAME;

    async fn context_in(dir: &TempDir) -> RunContext {
        let config = ConfigManager::load(Some(dir.path().to_path_buf()))
            .await
            .unwrap();
        RunContext::new(config)
    }

    #[tokio::test]
    async fn active_profile_before_first_poll_uses_ac_mapping() {
        let dir = TempDir::new().unwrap();
        let context = context_in(&dir).await;

        let profile = context.active_profile().await;
        assert_eq!(profile.name, DEFAULT_PROFILE_NAME);
    }

    #[tokio::test]
    async fn set_active_is_visible_to_clones() {
        let dir = TempDir::new().unwrap();
        let context = context_in(&dir).await;
        let alias = context.clone();

        context
            .set_active(PowerState::Bat, "Powersave".to_string())
            .await;

        let run_state = alias.run_state.read().await;
        assert_eq!(run_state.active_state, Some(PowerState::Bat));
        assert_eq!(run_state.active_profile_name, "Powersave");
    }
}
