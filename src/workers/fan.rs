//! Fan speed control loop.
//!
//! Each fan pairs a temperature sensor with a pwm actuator. Raw readings
//! run through the smoothing filter and the hysteresis curve lookup before
//! a speed is written, and every decision lands in telemetry for the bus.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

use crate::app_context::RunContext;
use crate::fan_curve::{FanLogic, FanTable};
use crate::scheduler::ControlLoop;
use crate::sysfs::IntAttr;

/// pwm_enable payloads per the hwmon convention.
const PWM_MODE_MANUAL: i64 = 1;
const PWM_MODE_AUTO: i64 = 2;

/// Sysfs endpoints of one controllable fan.
pub struct FanEndpoints {
    pub name: String,
    /// Temperature in millidegrees Celsius.
    pub temp_input: IntAttr,
    /// Duty cycle, 0..=255.
    pub pwm: IntAttr,
    pub pwm_enable: IntAttr,
}

impl FanEndpoints {
    pub fn new(hwmon_dir: &Path, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temp_input: IntAttr::new(hwmon_dir.join("temp1_input")),
            pwm: IntAttr::new(hwmon_dir.join("pwm1")),
            pwm_enable: IntAttr::new(hwmon_dir.join("pwm1_enable")),
        }
    }

    fn controllable(&self) -> bool {
        self.temp_input.is_available() && self.pwm.is_available()
    }
}

/// Scans an hwmon class directory for chips exposing both a temperature
/// sensor and a pwm actuator.
pub fn discover_fans(hwmon_root: &Path) -> Vec<FanEndpoints> {
    let Ok(entries) = fs::read_dir(hwmon_root) else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    dirs.sort();

    dirs.into_iter()
        .filter_map(|dir| {
            let name = fs::read_to_string(dir.join("name"))
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|_| {
                    dir.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
            let endpoints = FanEndpoints::new(&dir, name);
            endpoints.controllable().then_some(endpoints)
        })
        .collect()
}

struct FanUnit {
    endpoints: FanEndpoints,
    logic: FanLogic,
    warned_unavailable: bool,
}

/// Drives every discovered fan once per second while the active profile
/// asks for manual control.
pub struct FanWorker {
    ctx: RunContext,
    fans: Vec<FanUnit>,
    controlling: bool,
}

impl FanWorker {
    pub fn new(ctx: RunContext, endpoints: Vec<FanEndpoints>) -> Self {
        let fans = endpoints
            .into_iter()
            .map(|endpoints| FanUnit {
                endpoints,
                logic: FanLogic::new(FanTable::default()),
                warned_unavailable: false,
            })
            .collect();
        Self {
            ctx,
            fans,
            controlling: false,
        }
    }

    fn set_mode(&self, mode: i64) {
        for unit in &self.fans {
            if unit.endpoints.pwm_enable.is_available() {
                if let Err(e) = unit.endpoints.pwm_enable.write(&mode) {
                    warn!("Fan '{}': {e:#}", unit.endpoints.name);
                }
            }
        }
    }
}

#[async_trait]
impl ControlLoop for FanWorker {
    fn name(&self) -> &str {
        "fan"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn on_start(&mut self) -> Result<()> {
        let profile = self.ctx.active_profile().await;
        self.controlling = profile.fan.use_control && !self.fans.is_empty();

        if !self.controlling {
            info!("Fan control disabled, firmware keeps automatic mode");
            self.set_mode(PWM_MODE_AUTO);
            return Ok(());
        }

        let table = profile.fan.fan_table()?;
        for unit in &mut self.fans {
            // Sample history survives profile switches; only the curve and
            // its cursor change.
            unit.logic.set_table(table.clone());
        }
        self.set_mode(PWM_MODE_MANUAL);
        info!("Fan control active on {} fans", self.fans.len());
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        if !self.controlling {
            return Ok(());
        }

        for (index, unit) in self.fans.iter_mut().enumerate() {
            let Some(milli_celsius) = unit.endpoints.temp_input.read_opt() else {
                if !unit.warned_unavailable {
                    warn!("Fan '{}' temperature unreadable", unit.endpoints.name);
                    unit.warned_unavailable = true;
                }
                continue;
            };
            unit.warned_unavailable = false;

            let celsius = (milli_celsius / 1000) as i32;
            unit.logic.report_temperature(celsius);
            let percent = unit.logic.speed_percent();

            let duty = i64::from(percent) * 255 / 100;
            if let Err(e) = unit.endpoints.pwm.write(&duty) {
                warn!("Fan '{}': {e:#}", unit.endpoints.name);
                continue;
            }

            self.ctx.telemetry.record_fan(index, celsius, percent).await;
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        if self.controlling {
            info!("Returning fans to automatic control");
            self.set_mode(PWM_MODE_AUTO);
            self.controlling = false;
        }
        Ok(())
    }
}
