//! Power-source monitor driving profile switches.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use std::fs;

use crate::app_context::RunContext;
use crate::event::Event;
use crate::run_state::PowerState;
use crate::scheduler::ControlLoop;
use crate::sysfs::BoolAttr;

/// Finds the `online` attribute of the first mains power supply under
/// `power_supply_dir`, identified by a `type` payload of `Mains`.
pub fn find_ac_attribute(power_supply_dir: &Path) -> Option<BoolAttr> {
    let entries = fs::read_dir(power_supply_dir).ok()?;
    for entry in entries.flatten() {
        let kind = fs::read_to_string(entry.path().join("type")).unwrap_or_default();
        if kind.trim() == "Mains" {
            let attr = BoolAttr::new(entry.path().join("online"));
            if attr.is_available() {
                return Some(attr);
            }
        }
    }
    None
}

/// Polls the AC adapter every 500ms and publishes [`Event::StateChanged`]
/// when the power source flips. The coordinator reacts by restarting every
/// control loop under the newly mapped profile.
pub struct StateSwitcherWorker {
    ctx: RunContext,
    ac_online: Option<BoolAttr>,
    last_state: Option<PowerState>,
}

impl StateSwitcherWorker {
    pub fn new(ctx: RunContext, ac_online: Option<BoolAttr>) -> Self {
        if ac_online.is_none() {
            warn!("No mains power supply found, assuming AC permanently");
        }
        Self {
            ctx,
            ac_online,
            last_state: None,
        }
    }

    /// Current power source. A read failure counts as AC so the machine
    /// never gets stuck in a battery profile on sensor trouble.
    fn poll_state(&self) -> PowerState {
        let on_ac = self
            .ac_online
            .as_ref()
            .and_then(|attr| attr.read_opt())
            .unwrap_or(true);
        if on_ac { PowerState::Ac } else { PowerState::Bat }
    }

    async fn resolve_and_record(&mut self, state: PowerState) {
        let name = self.ctx.config.profile_for_state(state).await.name;
        self.ctx.set_active(state, name.clone()).await;
        self.last_state = Some(state);
        info!("Power state {state}, profile '{name}'");
    }
}

#[async_trait]
impl ControlLoop for StateSwitcherWorker {
    fn name(&self) -> &str {
        "state-switcher"
    }

    fn period(&self) -> Duration {
        Duration::from_millis(500)
    }

    /// Resolves the state without publishing, so a restart cycle does not
    /// trigger another restart.
    async fn on_start(&mut self) -> Result<()> {
        let state = self.poll_state();
        self.resolve_and_record(state).await;
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        let state = self.poll_state();
        if self.last_state == Some(state) {
            return Ok(());
        }

        self.resolve_and_record(state).await;
        if let Err(e) = self.ctx.events.publish(Event::StateChanged(state)) {
            warn!("State change had no listeners: {e}");
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::config::ConfigManager;

    fn fake_power_supply(dir: &TempDir, name: &str, kind: &str, online: &str) {
        let supply = dir.path().join(name);
        fs::create_dir_all(&supply).unwrap();
        fs::write(supply.join("type"), kind).unwrap();
        fs::write(supply.join("online"), online).unwrap();
    }

    async fn context_in(dir: &TempDir) -> RunContext {
        let config = ConfigManager::load(Some(dir.path().join("etc")))
            .await
            .unwrap();
        RunContext::new(config)
    }

    #[test]
    fn finds_mains_supply_among_batteries() {
        let dir = TempDir::new().unwrap();
        let battery = dir.path().join("BAT0");
        fs::create_dir_all(&battery).unwrap();
        fs::write(battery.join("type"), "Battery\n").unwrap();
        fake_power_supply(&dir, "AC", "Mains\n", "1\n");

        let attr = find_ac_attribute(dir.path()).unwrap();
        assert_eq!(attr.read_opt(), Some(true));
    }

    #[test]
    fn no_mains_supply_yields_none() {
        let dir = TempDir::new().unwrap();
        assert!(find_ac_attribute(dir.path()).is_none());
    }

    #[tokio::test]
    async fn first_poll_records_state_without_event() {
        let dir = TempDir::new().unwrap();
        fake_power_supply(&dir, "AC", "Mains", "0");

        let ctx = context_in(&dir).await;
        let attr = find_ac_attribute(dir.path());
        let mut worker = StateSwitcherWorker::new(ctx.clone(), attr);

        // No subscriber exists; on_start must not publish anything.
        worker.on_start().await.unwrap();

        let run_state = ctx.run_state.read().await;
        assert_eq!(run_state.active_state, Some(PowerState::Bat));
    }

    #[tokio::test]
    async fn flip_publishes_state_changed_once() {
        let dir = TempDir::new().unwrap();
        fake_power_supply(&dir, "AC", "Mains", "1");

        let ctx = context_in(&dir).await;
        let mut events = ctx.events.subscribe();
        let attr = find_ac_attribute(dir.path());
        let mut worker = StateSwitcherWorker::new(ctx.clone(), attr);

        worker.on_start().await.unwrap();
        worker.on_tick().await.unwrap();
        // Unchanged source, still no event pending.
        assert!(events.try_recv().is_err());

        // Pull the plug.
        fs::write(dir.path().join("AC").join("online"), "0").unwrap();
        worker.on_tick().await.unwrap();
        match events.try_recv().unwrap() {
            Event::StateChanged(state) => assert_eq!(state, PowerState::Bat),
            other => panic!("unexpected event {other:?}"),
        }

        // Stable again; no duplicate.
        worker.on_tick().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_failure_falls_open_to_ac() {
        let dir = TempDir::new().unwrap();
        fake_power_supply(&dir, "AC", "Mains", "0");

        let ctx = context_in(&dir).await;
        let attr = find_ac_attribute(dir.path());
        let mut worker = StateSwitcherWorker::new(ctx.clone(), attr);
        worker.on_start().await.unwrap();
        assert_eq!(worker.last_state, Some(PowerState::Bat));

        // The attribute disappears mid-run.
        fs::remove_file(dir.path().join("AC").join("online")).unwrap();
        let mut events = ctx.events.subscribe();
        worker.on_tick().await.unwrap();

        assert_eq!(worker.last_state, Some(PowerState::Ac));
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::StateChanged(PowerState::Ac)
        ));
    }
}
