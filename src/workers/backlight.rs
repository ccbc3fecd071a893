//! Keyboard backlight loop.
//!
//! Applies the profile's brightness and color, consumes set requests sent
//! over the bus and mirrors the hardware state into telemetry. Hotkey
//! changes made by the firmware are picked up by observing the brightness
//! attribute; the worker's own writes are suppressed from that observation
//! so they are not mistaken for user input.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::broadcast;

use crate::app_context::RunContext;
use crate::event::Event;
use crate::scheduler::ControlLoop;
use crate::sysfs::{HexAttr, IntAttr};

pub struct KeyboardBacklightWorker {
    ctx: RunContext,
    brightness: IntAttr,
    max_brightness: IntAttr,
    color: HexAttr,
    requests: broadcast::Receiver<Event>,
    suppress_observation: bool,
}

impl KeyboardBacklightWorker {
    /// `leds_dir` is the `kbd_backlight` LED class directory.
    pub fn new(ctx: RunContext, leds_dir: &Path) -> Self {
        let requests = ctx.events.subscribe();
        Self {
            ctx,
            brightness: IntAttr::new(leds_dir.join("brightness")),
            max_brightness: IntAttr::new(leds_dir.join("max_brightness")),
            color: HexAttr::new(leds_dir.join("color")),
            requests,
            suppress_observation: false,
        }
    }

    fn clamp_brightness(&self, value: i64) -> i64 {
        let max = self.max_brightness.read_opt().unwrap_or(i64::MAX);
        value.clamp(0, max)
    }

    async fn write_state(&mut self, brightness: i64, color: Option<u64>) {
        let brightness = self.clamp_brightness(brightness);
        if let Err(e) = self.brightness.write(&brightness) {
            warn!("Keyboard backlight: {e:#}");
            return;
        }
        if let Some(color) = color {
            if self.color.is_available() {
                if let Err(e) = self.color.write(&color) {
                    warn!("Keyboard backlight color: {e:#}");
                }
            }
        }

        self.suppress_observation = true;
        self.ctx
            .telemetry
            .update(|t| {
                t.keyboard_backlight.brightness = Some(brightness);
                if color.is_some() {
                    t.keyboard_backlight.color = color;
                }
            })
            .await;
    }

    async fn drain_requests(&mut self) {
        loop {
            match self.requests.try_recv() {
                Ok(Event::KeyboardBacklightSet { brightness, color }) => {
                    self.write_state(brightness, color).await;
                }
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Keyboard backlight lagged {n} events");
                }
                Err(_) => break,
            }
        }
    }

    /// Mirrors hardware state changed outside the daemon, e.g. by the
    /// brightness hotkey.
    async fn observe(&mut self) {
        let Some(current) = self.brightness.read_opt() else {
            return;
        };
        if self.suppress_observation {
            self.suppress_observation = false;
            return;
        }

        let known = self.ctx.telemetry.snapshot().await.keyboard_backlight.brightness;
        if known != Some(current) {
            self.ctx
                .telemetry
                .update(|t| t.keyboard_backlight.brightness = Some(current))
                .await;
        }
    }
}

#[async_trait]
impl ControlLoop for KeyboardBacklightWorker {
    fn name(&self) -> &str {
        "keyboard-backlight"
    }

    fn period(&self) -> Duration {
        Duration::from_millis(500)
    }

    async fn on_start(&mut self) -> Result<()> {
        if !self.brightness.is_available() {
            info!("No keyboard backlight found");
            return Ok(());
        }

        let max = self.max_brightness.read_opt();
        self.ctx
            .telemetry
            .update(|t| t.keyboard_backlight.max_brightness = max)
            .await;

        let backlight = self.ctx.active_profile().await.keyboard_backlight;
        if let Some(brightness) = backlight.brightness {
            self.write_state(brightness, backlight.color).await;
        }
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        if !self.brightness.is_available() {
            return Ok(());
        }
        self.drain_requests().await;
        self.observe().await;
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
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::config::{ConfigManager, Profile};
    use crate::run_state::PowerState;

    fn fake_backlight(root: &Path) -> PathBuf {
        let leds = root.join("kbd_backlight");
        fs::create_dir_all(&leds).unwrap();
        fs::write(leds.join("brightness"), "100\n").unwrap();
        fs::write(leds.join("max_brightness"), "255\n").unwrap();
        fs::write(leds.join("color"), "ffffff\n").unwrap();
        leds
    }

    async fn context_with_backlight(dir: &TempDir, brightness: Option<i64>) -> RunContext {
        let etc = dir.path().join("etc");
        fs::create_dir_all(&etc).unwrap();
        let mut profile = Profile::named("Test");
        profile.keyboard_backlight.brightness = brightness;
        let profiles = vec![Profile::named("Default"), profile];
        fs::write(
            etc.join("profiles.yml"),
            serde_yaml::to_string(&profiles).unwrap(),
        )
        .unwrap();

        let config = ConfigManager::load(Some(etc)).await.unwrap();
        let ctx = RunContext::new(config);
        ctx.set_active(PowerState::Ac, "Test".to_string()).await;
        ctx
    }

    #[tokio::test]
    async fn start_applies_profile_brightness() {
        let dir = TempDir::new().unwrap();
        let leds = fake_backlight(dir.path());

        let ctx = context_with_backlight(&dir, Some(60)).await;
        let mut worker = KeyboardBacklightWorker::new(ctx.clone(), &leds);
        worker.on_start().await.unwrap();

        assert_eq!(fs::read_to_string(leds.join("brightness")).unwrap(), "60");
        let snapshot = ctx.telemetry.snapshot().await;
        assert_eq!(snapshot.keyboard_backlight.brightness, Some(60));
        assert_eq!(snapshot.keyboard_backlight.max_brightness, Some(255));
    }

    #[tokio::test]
    async fn bus_request_is_applied_with_clamping() {
        let dir = TempDir::new().unwrap();
        let leds = fake_backlight(dir.path());

        let ctx = context_with_backlight(&dir, None).await;
        let mut worker = KeyboardBacklightWorker::new(ctx.clone(), &leds);
        worker.on_start().await.unwrap();

        ctx.events
            .publish(Event::KeyboardBacklightSet {
                brightness: 10_000,
                color: Some(0x00ff_0000),
            })
            .unwrap();
        worker.on_tick().await.unwrap();

        assert_eq!(fs::read_to_string(leds.join("brightness")).unwrap(), "255");
        assert_eq!(fs::read_to_string(leds.join("color")).unwrap(), "ff0000");
        assert_eq!(
            ctx.telemetry.snapshot().await.keyboard_backlight.color,
            Some(0x00ff_0000)
        );
    }

    #[tokio::test]
    async fn own_write_is_not_observed_as_external_change() {
        let dir = TempDir::new().unwrap();
        let leds = fake_backlight(dir.path());

        let ctx = context_with_backlight(&dir, None).await;
        let mut worker = KeyboardBacklightWorker::new(ctx.clone(), &leds);
        worker.on_start().await.unwrap();

        ctx.events
            .publish(Event::KeyboardBacklightSet {
                brightness: 40,
                color: None,
            })
            .unwrap();
        worker.on_tick().await.unwrap();
        assert!(!worker.suppress_observation);
        assert_eq!(
            ctx.telemetry.snapshot().await.keyboard_backlight.brightness,
            Some(40)
        );
    }

    #[tokio::test]
    async fn hotkey_change_is_mirrored_into_telemetry() {
        let dir = TempDir::new().unwrap();
        let leds = fake_backlight(dir.path());

        let ctx = context_with_backlight(&dir, Some(60)).await;
        let mut worker = KeyboardBacklightWorker::new(ctx.clone(), &leds);
        worker.on_start().await.unwrap();
        worker.on_tick().await.unwrap();

        // Firmware hotkey bumps the brightness directly.
        fs::write(leds.join("brightness"), "200\n").unwrap();
        worker.on_tick().await.unwrap();

        assert_eq!(
            ctx.telemetry.snapshot().await.keyboard_backlight.brightness,
            Some(200)
        );
    }
}
