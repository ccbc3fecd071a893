//! Charging profile, priority and battery threshold control.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::{info, warn};

use crate::app_context::RunContext;
use crate::scheduler::ControlLoop;
use crate::sysfs::{IntAttr, StringAttr, StringListAttr};

/// Firmware charging endpoints, constructed by worker and bus layer alike.
/// Holds only paths, so building a second instance is free.
#[derive(Clone)]
pub struct ChargingControl {
    profile: StringAttr,
    available_profiles: StringListAttr,
    priority: StringAttr,
    available_priorities: StringListAttr,
    start_threshold: IntAttr,
    end_threshold: IntAttr,
    charge_type: StringAttr,
}

impl ChargingControl {
    /// `platform_root` hosts the EC charging directories, `battery_root`
    /// the battery power_supply node.
    pub fn new(platform_root: &Path, battery_root: &Path) -> Self {
        let profile_dir = platform_root.join("charging_profile");
        let priority_dir = platform_root.join("charging_priority");
        Self {
            profile: StringAttr::new(profile_dir.join("charging_profile")),
            available_profiles: StringListAttr::new(profile_dir.join("charging_profiles_available")),
            priority: StringAttr::new(priority_dir.join("charging_prio")),
            available_priorities: StringListAttr::new(priority_dir.join("charging_prios_available")),
            start_threshold: IntAttr::new(battery_root.join("charge_control_start_threshold")),
            end_threshold: IntAttr::new(battery_root.join("charge_control_end_threshold")),
            charge_type: StringAttr::new(battery_root.join("charge_type")),
        }
    }

    pub fn available_profiles(&self) -> Vec<String> {
        self.available_profiles.read_opt().unwrap_or_default()
    }

    pub fn profile(&self) -> Option<String> {
        self.profile.read_opt()
    }

    pub fn set_profile(&self, value: &str) -> Result<()> {
        let available = self.available_profiles();
        if !available.iter().any(|p| p == value) {
            bail!("Charging profile '{value}' not offered (available: {available:?})");
        }
        self.profile.write(&value.to_string())
    }

    pub fn available_priorities(&self) -> Vec<String> {
        self.available_priorities.read_opt().unwrap_or_default()
    }

    pub fn priority(&self) -> Option<String> {
        self.priority.read_opt()
    }

    pub fn set_priority(&self, value: &str) -> Result<()> {
        let available = self.available_priorities();
        if !available.iter().any(|p| p == value) {
            bail!("Charging priority '{value}' not offered (available: {available:?})");
        }
        self.priority.write(&value.to_string())
    }

    pub fn thresholds(&self) -> (Option<i64>, Option<i64>) {
        (
            self.start_threshold.read_opt(),
            self.end_threshold.read_opt(),
        )
    }

    pub fn set_thresholds(&self, start: i64, end: i64) -> Result<()> {
        if !(0..=100).contains(&start) || !(0..=100).contains(&end) || start >= end {
            bail!("Invalid charge thresholds {start}..{end}");
        }
        // End first while raising, start first while lowering, so the
        // kernel never sees start >= end.
        if Some(end) > self.end_threshold.read_opt() {
            self.end_threshold.write(&end)?;
            self.start_threshold.write(&start)
        } else {
            self.start_threshold.write(&start)?;
            self.end_threshold.write(&end)
        }
    }

    pub fn charge_type(&self) -> Option<String> {
        self.charge_type.read_opt()
    }

    pub fn set_charge_type(&self, value: &str) -> Result<()> {
        self.charge_type.write(&value.to_string())
    }
}

/// Re-applies the persisted charging choices every ten seconds, so a
/// firmware reset or EC hiccup does not silently revert them.
pub struct ChargingWorker {
    ctx: RunContext,
    control: ChargingControl,
}

impl ChargingWorker {
    pub fn new(ctx: RunContext, control: ChargingControl) -> Self {
        Self { ctx, control }
    }

    async fn apply_persisted(&self) {
        let (profile, priority) = {
            let settings = self.ctx.config.settings().await;
            (
                settings.charging_profile.clone(),
                settings.charging_priority.clone(),
            )
        };

        if let Some(profile) = profile {
            if self.control.profile().as_deref() != Some(profile.as_str()) {
                if let Err(e) = self.control.set_profile(&profile) {
                    warn!("Charging profile: {e:#}");
                }
            }
        }
        if let Some(priority) = priority {
            if self.control.priority().as_deref() != Some(priority.as_str()) {
                if let Err(e) = self.control.set_priority(&priority) {
                    warn!("Charging priority: {e:#}");
                }
            }
        }
    }
}

#[async_trait]
impl ControlLoop for ChargingWorker {
    fn name(&self) -> &str {
        "charging"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.control.available_profiles().is_empty() {
            info!("No charging profile support detected");
        }
        self.apply_persisted().await;
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        self.apply_persisted().await;
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }
}
