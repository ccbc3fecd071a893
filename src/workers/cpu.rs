//! CPU frequency, governor and core-count reconciliation.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

use crate::app_context::RunContext;
use crate::config::CpuProfile;
use crate::scheduler::ControlLoop;
use crate::sysfs::{BoolAttr, IntAttr, RangeListAttr, StringAttr, StringListAttr};
use crate::telemetry::Stamped;

/// Governors tried in order when the profile names none, on drivers other
/// than intel_pstate.
const FALLBACK_GOVERNORS: [&str; 3] = ["ondemand", "schedutil", "conservative"];

/// Attribute set of one logical core.
pub struct CpuCore {
    pub index: u32,
    online: BoolAttr,
    scaling_driver: StringAttr,
    scaling_governor: StringAttr,
    available_governors: StringListAttr,
    energy_performance_preference: StringAttr,
    scaling_min_freq: IntAttr,
    scaling_max_freq: IntAttr,
    cpuinfo_min_freq: IntAttr,
    cpuinfo_max_freq: IntAttr,
}

impl CpuCore {
    pub fn new(cpu_root: &Path, index: u32) -> Self {
        let core = cpu_root.join(format!("cpu{index}"));
        let cpufreq = core.join("cpufreq");
        Self {
            index,
            online: BoolAttr::new(core.join("online")),
            scaling_driver: StringAttr::new(cpufreq.join("scaling_driver")),
            scaling_governor: StringAttr::new(cpufreq.join("scaling_governor")),
            available_governors: StringListAttr::new(cpufreq.join("scaling_available_governors")),
            energy_performance_preference: StringAttr::new(
                cpufreq.join("energy_performance_preference"),
            ),
            scaling_min_freq: IntAttr::new(cpufreq.join("scaling_min_freq")),
            scaling_max_freq: IntAttr::new(cpufreq.join("scaling_max_freq")),
            cpuinfo_min_freq: IntAttr::new(cpufreq.join("cpuinfo_min_freq")),
            cpuinfo_max_freq: IntAttr::new(cpufreq.join("cpuinfo_max_freq")),
        }
    }

    fn is_online(&self) -> bool {
        // cpu0 has no online attribute and is always up.
        self.online_attr_missing() || self.online.read_opt().unwrap_or(false)
    }

    fn online_attr_missing(&self) -> bool {
        !self.online.is_available()
    }

    fn set_online(&self, online: bool) {
        if self.online_attr_missing() {
            return;
        }
        if self.online.read_opt() == Some(online) {
            return;
        }
        if let Err(e) = self.online.write(&online) {
            warn!("cpu{}: {e:#}", self.index);
        }
    }

    /// Writes `value` only when the attribute exists and currently differs.
    fn reconcile_str(&self, attr: &StringAttr, value: &str) {
        if !attr.is_available() {
            return;
        }
        if attr.read_opt().as_deref() == Some(value) {
            return;
        }
        if let Err(e) = attr.write(&value.to_string()) {
            warn!("cpu{}: {e:#}", self.index);
        }
    }

    fn reconcile_int(&self, attr: &IntAttr, value: i64) {
        if !attr.is_available() {
            return;
        }
        if attr.read_opt() == Some(value) {
            return;
        }
        if let Err(e) = attr.write(&value) {
            warn!("cpu{}: {e:#}", self.index);
        }
    }

    /// Governor to run under, honoring driver constraints.
    fn choose_governor(&self, requested: Option<&str>) -> Option<String> {
        if self.scaling_driver.read_opt().as_deref() == Some("intel_pstate") {
            return Some("powersave".to_string());
        }

        let available = self.available_governors.read_opt()?;
        if let Some(requested) = requested {
            if available.iter().any(|g| g == requested) {
                return Some(requested.to_string());
            }
            warn!("cpu{}: governor '{requested}' not offered", self.index);
        }
        FALLBACK_GOVERNORS
            .iter()
            .find(|g| available.iter().any(|a| a == *g))
            .map(|g| (*g).to_string())
    }

    fn apply(&self, profile: &CpuProfile) {
        if let Some(governor) = self.choose_governor(profile.governor.as_deref()) {
            self.reconcile_str(&self.scaling_governor, &governor);
        }

        let epp = profile
            .energy_performance_preference
            .as_deref()
            .unwrap_or("default");
        self.reconcile_str(&self.energy_performance_preference, epp);

        let hw_min = self.cpuinfo_min_freq.read_opt();
        let hw_max = self.cpuinfo_max_freq.read_opt();
        if let (Some(hw_min), Some(hw_max)) = (hw_min, hw_max) {
            let min = profile
                .scaling_min_freq
                .map_or(hw_min, |f| f.clamp(hw_min, hw_max));
            let max = profile
                .scaling_max_freq
                .map_or(hw_max, |f| f.clamp(hw_min, hw_max));
            self.reconcile_int(&self.scaling_min_freq, min.min(max));
            self.reconcile_int(&self.scaling_max_freq, max);
        }
    }

    /// Restores kernel defaults for this core.
    fn reset(&self) {
        self.set_online(true);
        if let Some(governor) = self.choose_governor(None) {
            self.reconcile_str(&self.scaling_governor, &governor);
        }
        self.reconcile_str(&self.energy_performance_preference, "default");
        if let Some(hw_min) = self.cpuinfo_min_freq.read_opt() {
            self.reconcile_int(&self.scaling_min_freq, hw_min);
        }
        if let Some(hw_max) = self.cpuinfo_max_freq.read_opt() {
            self.reconcile_int(&self.scaling_max_freq, hw_max);
        }
    }
}

/// Reconciles the CPU block of the active profile every three seconds and
/// samples package power draw from the RAPL energy counter.
pub struct CpuWorker {
    ctx: RunContext,
    cores: Vec<CpuCore>,
    no_turbo: BoolAttr,
    energy_uj: IntAttr,
    power_limit_uw: IntAttr,
    last_energy: Option<(i64, Instant)>,
}

impl CpuWorker {
    /// `cpu_root` is `/sys/devices/system/cpu`, `powercap_root` the RAPL
    /// package domain directory.
    pub fn new(ctx: RunContext, cpu_root: impl Into<PathBuf>, powercap_root: impl Into<PathBuf>) -> Self {
        let cpu_root = cpu_root.into();
        let powercap_root = powercap_root.into();

        let present = RangeListAttr::new(cpu_root.join("present"));
        let cores: Vec<CpuCore> = present
            .read_opt()
            .unwrap_or_default()
            .into_iter()
            .map(|index| CpuCore::new(&cpu_root, index))
            .collect();
        if cores.is_empty() {
            warn!("No CPU cores enumerated under {}", cpu_root.display());
        }

        Self {
            ctx,
            cores,
            no_turbo: BoolAttr::new(cpu_root.join("intel_pstate/no_turbo")),
            energy_uj: IntAttr::new(powercap_root.join("energy_uj")),
            power_limit_uw: IntAttr::new(powercap_root.join("constraint_0_power_limit_uw")),
            last_energy: None,
        }
    }

    async fn apply_profile(&self) {
        let profile = self.ctx.active_profile().await;
        let cpu = &profile.cpu;

        let total = self.cores.len() as u32;
        let want = cpu.online_cores.unwrap_or(total).clamp(1, total.max(1));
        for core in &self.cores {
            core.set_online(core.index < want);
        }

        for core in &self.cores {
            if core.is_online() {
                core.apply(cpu);
            }
        }

        if self.no_turbo.is_available() && self.no_turbo.read_opt() != Some(cpu.no_turbo) {
            if let Err(e) = self.no_turbo.write(&cpu.no_turbo) {
                warn!("no_turbo: {e:#}");
            }
        }
    }

    /// Derives average power draw since the previous sample from the
    /// monotonically increasing RAPL energy counter.
    async fn sample_power(&mut self) {
        let limit_mw = self.power_limit_uw.read_opt().map(|uw| uw / 1000);

        let draw_mw = self.energy_uj.read_opt().and_then(|uj| {
            let now = Instant::now();
            let draw = self.last_energy.and_then(|(prev_uj, prev_at)| {
                let elapsed = now.duration_since(prev_at);
                if uj < prev_uj || elapsed.is_zero() {
                    // Counter wrapped; skip this interval.
                    return None;
                }
                // µJ over µs gives watts; scale to milliwatts.
                Some(((uj - prev_uj) as f64 / elapsed.as_micros() as f64 * 1000.0) as i64)
            });
            self.last_energy = Some((uj, now));
            draw
        });

        self.ctx
            .telemetry
            .update(|t| {
                t.cpu_power_limit_mw = limit_mw;
                if let Some(mw) = draw_mw {
                    t.cpu_power_draw_mw = Some(Stamped::now(mw));
                }
            })
            .await;
    }
}

#[async_trait]
impl ControlLoop for CpuWorker {
    fn name(&self) -> &str {
        "cpu"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(3)
    }

    async fn on_start(&mut self) -> Result<()> {
        self.last_energy = None;
        self.apply_profile().await;
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        self.apply_profile().await;
        self.sample_power().await;
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        info!("Restoring CPU defaults");
        for core in &self.cores {
            core.reset();
        }
        if self.no_turbo.is_available() {
            let _ = self.no_turbo.write(&false);
        }
        Ok(())
    }
}
