//! Display panel backlight loop.
//!
//! Applies the profile's brightness percentage to every backlight driver
//! under the backlight class directory. Reads go through
//! `actual_brightness`, writes through `brightness`; the raw value seen at
//! start is written back on stop so leaving a profile hands the panel back
//! the way it was found.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

use crate::app_context::RunContext;
use crate::scheduler::ControlLoop;
use crate::sysfs::IntAttr;

/// Sysfs endpoints of one backlight driver.
pub struct DisplayEndpoints {
    pub name: String,
    /// Reads `actual_brightness`, writes `brightness`.
    brightness: IntAttr,
    max_brightness: IntAttr,
}

impl DisplayEndpoints {
    pub fn new(driver_dir: &Path, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brightness: IntAttr::with_write_path(
                driver_dir.join("actual_brightness"),
                driver_dir.join("brightness"),
            ),
            max_brightness: IntAttr::new(driver_dir.join("max_brightness")),
        }
    }

    fn usable(&self) -> bool {
        self.brightness.is_available() && self.max_brightness.is_available()
    }

    /// Raw driver value for a percentage, rounded to the nearest step.
    fn raw_for_percent(&self, percent: u8) -> Option<i64> {
        let max = self.max_brightness.read_opt()?;
        Some((i64::from(percent) * max + 50) / 100)
    }

    fn apply_percent(&self, percent: u8) {
        let Some(raw) = self.raw_for_percent(percent) else {
            return;
        };
        if self.brightness.read_opt() == Some(raw) {
            return;
        }
        if let Err(e) = self.brightness.write(&raw) {
            warn!("Display '{}': {e:#}", self.name);
        }
    }
}

/// Scans a backlight class directory for drivers exposing both the
/// brightness pair and `max_brightness`.
pub fn discover_displays(backlight_root: &Path) -> Vec<DisplayEndpoints> {
    let Ok(entries) = fs::read_dir(backlight_root) else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    dirs.sort();

    dirs.into_iter()
        .filter_map(|dir| {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let endpoints = DisplayEndpoints::new(&dir, name);
            endpoints.usable().then_some(endpoints)
        })
        .collect()
}

struct DisplayUnit {
    endpoints: DisplayEndpoints,
    saved_raw: Option<i64>,
}

/// Reconciles panel brightness with the active profile every three seconds
/// while the profile opts in (`use_brightness`).
pub struct DisplayBacklightWorker {
    ctx: RunContext,
    displays: Vec<DisplayUnit>,
    controlling: bool,
}

impl DisplayBacklightWorker {
    pub fn new(ctx: RunContext, endpoints: Vec<DisplayEndpoints>) -> Self {
        let displays = endpoints
            .into_iter()
            .map(|endpoints| DisplayUnit {
                endpoints,
                saved_raw: None,
            })
            .collect();
        Self {
            ctx,
            displays,
            controlling: false,
        }
    }

    async fn wanted_percent(&self) -> Option<u8> {
        let display = self.ctx.active_profile().await.display;
        if !display.use_brightness {
            return None;
        }
        display.brightness
    }
}

#[async_trait]
impl ControlLoop for DisplayBacklightWorker {
    fn name(&self) -> &str {
        "display-backlight"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(3)
    }

    async fn on_start(&mut self) -> Result<()> {
        let percent = self.wanted_percent().await;
        self.controlling = percent.is_some() && !self.displays.is_empty();

        let Some(percent) = percent else {
            info!("Display backlight left to the desktop");
            return Ok(());
        };

        for unit in &mut self.displays {
            if unit.saved_raw.is_none() {
                // A zero reading means the panel is off; not worth restoring.
                unit.saved_raw = unit.endpoints.brightness.read_opt().filter(|&v| v > 0);
            }
            unit.endpoints.apply_percent(percent);
        }
        info!("Display brightness set to {percent}% on {} panels", self.displays.len());
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        if !self.controlling {
            return Ok(());
        }
        // Late-loading drivers and external writes both show up as drift.
        if let Some(percent) = self.wanted_percent().await {
            for unit in &self.displays {
                unit.endpoints.apply_percent(percent);
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        for unit in &mut self.displays {
            if let Some(raw) = unit.saved_raw.take() {
                if let Err(e) = unit.endpoints.brightness.write(&raw) {
                    warn!("Display '{}' restore: {e:#}", unit.endpoints.name);
                }
            }
        }
        self.controlling = false;
        Ok(())
    }
}
