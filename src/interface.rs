//! D-Bus surface of the daemon.
//!
//! Served at `/io/github/hwprofiled` under the well-known name
//! `io.github.hwprofiled`. Telemetry getters read the shared store, the
//! setters go through the same validation the workers use, and `Stop`
//! wakes the coordinator through an event-listener notification.

use event_listener::Event as StopEvent;
use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::app_context::RunContext;
use crate::event::Event;
use crate::run_state::PowerState;
use crate::workers::charging::ChargingControl;

fn fdo_err(e: anyhow::Error) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{e:#}"))
}

pub struct DBusInterface {
    pub ctx: RunContext,
    pub charging: ChargingControl,
    pub stop: StopEvent,
    pub version: String,
}

#[interface(name = "io.github.hwprofiled")]
impl DBusInterface {
    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    async fn stop(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        emitter.stopped().await?;
        self.stop.notify(1);
        Ok(())
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    // Fan telemetry

    async fn fan_count(&self) -> u32 {
        self.ctx.telemetry.snapshot().await.fans.len() as u32
    }

    /// Latest smoothed temperature of one fan as (°C, unix ms).
    async fn fan_temperature(&self, index: u32) -> zbus::fdo::Result<(i32, u64)> {
        let snapshot = self.ctx.telemetry.snapshot().await;
        snapshot
            .fans
            .get(index as usize)
            .and_then(|fan| fan.temp_celsius)
            .map(|s| (s.value, s.timestamp_ms))
            .ok_or_else(|| zbus::fdo::Error::Failed(format!("No reading for fan {index}")))
    }

    /// Latest decided speed of one fan as (percent, unix ms).
    async fn fan_speed(&self, index: u32) -> zbus::fdo::Result<(u8, u64)> {
        let snapshot = self.ctx.telemetry.snapshot().await;
        snapshot
            .fans
            .get(index as usize)
            .and_then(|fan| fan.speed_percent)
            .map(|s| (s.value, s.timestamp_ms))
            .ok_or_else(|| zbus::fdo::Error::Failed(format!("No reading for fan {index}")))
    }

    // Power telemetry

    async fn cpu_power(&self) -> zbus::fdo::Result<(i64, u64)> {
        self.ctx
            .telemetry
            .snapshot()
            .await
            .cpu_power_draw_mw
            .map(|s| (s.value, s.timestamp_ms))
            .ok_or_else(|| zbus::fdo::Error::Failed("No CPU power reading".to_string()))
    }

    #[zbus(property)]
    async fn cpu_power_limit(&self) -> i64 {
        self.ctx
            .telemetry
            .snapshot()
            .await
            .cpu_power_limit_mw
            .unwrap_or(-1)
    }

    /// GPU readings as (draw mW, limit mW, freq kHz); -1 marks absent.
    async fn gpu_info(&self) -> (i64, i64, i64) {
        let gpu = self.ctx.telemetry.snapshot().await.gpu;
        (
            gpu.power_draw_mw.unwrap_or(-1),
            gpu.power_limit_mw.unwrap_or(-1),
            gpu.freq_khz.unwrap_or(-1),
        )
    }

    // Charging

    async fn charging_profiles_available(&self) -> Vec<String> {
        self.charging.available_profiles()
    }

    async fn charging_profile(&self) -> String {
        self.charging.profile().unwrap_or_default()
    }

    async fn set_charging_profile(&self, profile: String) -> zbus::fdo::Result<()> {
        self.charging.set_profile(&profile).map_err(fdo_err)?;
        self.ctx.config.settings_mut().await.charging_profile = Some(profile);
        self.ctx.config.save_settings().await.map_err(fdo_err)
    }

    async fn charging_priorities_available(&self) -> Vec<String> {
        self.charging.available_priorities()
    }

    async fn charging_priority(&self) -> String {
        self.charging.priority().unwrap_or_default()
    }

    async fn set_charging_priority(&self, priority: String) -> zbus::fdo::Result<()> {
        self.charging.set_priority(&priority).map_err(fdo_err)?;
        self.ctx.config.settings_mut().await.charging_priority = Some(priority);
        self.ctx.config.save_settings().await.map_err(fdo_err)
    }

    /// Battery charge window as (start%, end%); -1 marks absent.
    async fn charge_thresholds(&self) -> (i64, i64) {
        let (start, end) = self.charging.thresholds();
        (start.unwrap_or(-1), end.unwrap_or(-1))
    }

    async fn set_charge_thresholds(&self, start: i64, end: i64) -> zbus::fdo::Result<()> {
        self.charging.set_thresholds(start, end).map_err(fdo_err)
    }

    async fn charge_type(&self) -> String {
        self.charging.charge_type().unwrap_or_default()
    }

    async fn set_charge_type(&self, value: String) -> zbus::fdo::Result<()> {
        self.charging.set_charge_type(&value).map_err(fdo_err)
    }

    // Keyboard backlight

    /// Current backlight state as (brightness, max, color); -1 marks
    /// absent values, color is an RGB integer.
    async fn keyboard_backlight(&self) -> (i64, i64, i64) {
        let kb = self.ctx.telemetry.snapshot().await.keyboard_backlight;
        (
            kb.brightness.unwrap_or(-1),
            kb.max_brightness.unwrap_or(-1),
            kb.color.map_or(-1, |c| c as i64),
        )
    }

    /// Requests a backlight change; the backlight loop performs the write
    /// so there is a single writer to the hardware.
    async fn set_keyboard_backlight(&self, brightness: i64, color: i64) -> zbus::fdo::Result<()> {
        let color = (color >= 0).then_some(color as u64);
        self.ctx
            .events
            .publish(Event::KeyboardBacklightSet { brightness, color })
            .map_err(fdo_err)
    }

    // Profiles

    async fn profiles(&self) -> Vec<String> {
        self.ctx.config.profile_names().await
    }

    #[zbus(property)]
    async fn active_profile(&self) -> String {
        self.ctx.run_state.read().await.active_profile_name.clone()
    }

    /// Binds `profile` to the current power state and restarts the loops.
    async fn set_active_profile(&self, profile: String) -> zbus::fdo::Result<()> {
        if self.ctx.config.find_profile(&profile).await.is_none() {
            return Err(zbus::fdo::Error::Failed(format!(
                "No such profile '{profile}'"
            )));
        }

        let state = self
            .ctx
            .run_state
            .read()
            .await
            .active_state
            .unwrap_or(PowerState::Ac);
        self.ctx
            .config
            .settings_mut()
            .await
            .state_map
            .insert(state, profile.clone());
        self.ctx.config.save_settings().await.map_err(fdo_err)?;
        self.ctx.set_active(state, profile.clone()).await;

        info!("Profile '{profile}' activated for {state} over the bus");
        self.ctx
            .events
            .publish(Event::ConfigurationChanged)
            .map_err(fdo_err)
    }
}
