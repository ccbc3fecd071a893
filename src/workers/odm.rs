//! Platform profile and TDP power-limit loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

use crate::app_context::RunContext;
use crate::scheduler::ControlLoop;
use crate::sysfs::{IntAttr, StringAttr, StringListAttr};

/// One firmware TDP slot with its advertised bounds.
struct TdpSlot {
    value: IntAttr,
    min: IntAttr,
    max: IntAttr,
}

impl TdpSlot {
    fn new(odm_root: &Path, index: usize) -> Self {
        Self {
            value: IntAttr::new(odm_root.join(format!("tdp{index}"))),
            min: IntAttr::new(odm_root.join(format!("tdp{index}_min"))),
            max: IntAttr::new(odm_root.join(format!("tdp{index}_max"))),
        }
    }

    fn apply(&self, requested: i64) {
        let min = self.min.read_opt().unwrap_or(i64::MIN);
        let max = self.max.read_opt().unwrap_or(i64::MAX);
        let clamped = requested.clamp(min, max);
        if self.value.read_opt() == Some(clamped) {
            return;
        }
        if let Err(e) = self.value.write(&clamped) {
            warn!("TDP slot: {e:#}");
        }
    }
}

/// Enumerates `tdp0`, `tdp1`, ... until the first missing slot.
fn discover_tdp_slots(odm_root: &Path) -> Vec<TdpSlot> {
    let mut slots = Vec::new();
    for index in 0.. {
        let slot = TdpSlot::new(odm_root, index);
        if !slot.value.is_available() {
            break;
        }
        slots.push(slot);
    }
    slots
}

/// Applies the ODM block of the active profile every five seconds.
pub struct OdmWorker {
    ctx: RunContext,
    platform_profile: StringAttr,
    profile_choices: StringListAttr,
    tdp_slots: Vec<TdpSlot>,
}

impl OdmWorker {
    /// `acpi_root` is `/sys/firmware/acpi`, `odm_root` the platform device
    /// directory carrying the TDP slots.
    pub fn new(ctx: RunContext, acpi_root: impl Into<PathBuf>, odm_root: impl Into<PathBuf>) -> Self {
        let acpi_root = acpi_root.into();
        let odm_root = odm_root.into();
        Self {
            ctx,
            platform_profile: StringAttr::new(acpi_root.join("platform_profile")),
            profile_choices: StringListAttr::new(acpi_root.join("platform_profile_choices")),
            tdp_slots: discover_tdp_slots(&odm_root),
        }
    }

    async fn apply(&self) {
        let odm = self.ctx.active_profile().await.odm;

        if let Some(wanted) = &odm.platform_profile {
            let choices = self.profile_choices.read_opt().unwrap_or_default();
            if choices.iter().any(|c| c == wanted) {
                if self.platform_profile.read_opt().as_deref() != Some(wanted.as_str()) {
                    if let Err(e) = self.platform_profile.write(wanted) {
                        warn!("Platform profile: {e:#}");
                    }
                }
            } else if self.platform_profile.is_available() {
                warn!("Platform profile '{wanted}' not offered (choices: {choices:?})");
            }
        }

        for (slot, requested) in self.tdp_slots.iter().zip(&odm.tdp_limits) {
            slot.apply(*requested);
        }
    }
}

#[async_trait]
impl ControlLoop for OdmWorker {
    fn name(&self) -> &str {
        "odm"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn on_start(&mut self) -> Result<()> {
        if !self.platform_profile.is_available() && self.tdp_slots.is_empty() {
            info!("No platform profile or TDP control detected");
        }
        self.apply().await;
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        self.apply().await;
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }
}
