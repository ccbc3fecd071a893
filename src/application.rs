//! Application wiring and builder.

use std::path::PathBuf;

use anyhow::Result;
use log::{info, warn};
use zbus::connection;

use crate::app_context::RunContext;
use crate::config::ConfigManager;
use crate::coordinator::SystemCoordinator;
use crate::interface::DBusInterface;
use crate::scheduler::Scheduler;
use crate::workers::backlight::KeyboardBacklightWorker;
use crate::workers::charging::{ChargingControl, ChargingWorker};
use crate::workers::cpu::CpuWorker;
use crate::workers::display::{DisplayBacklightWorker, discover_displays};
use crate::workers::fan::{FanWorker, discover_fans};
use crate::workers::gpu::GpuInfoWorker;
use crate::workers::odm::OdmWorker;
use crate::workers::state_switcher::{StateSwitcherWorker, find_ac_attribute};
use crate::workers::webcam::{WebcamWorker, find_webcam_attribute};

pub const DBUS_NAME: &str = "io.github.hwprofiled";
pub const DBUS_PATH: &str = "/io/github/hwprofiled";

/// Sysfs locations the workers attach to. Overridable for tests and
/// unusual kernels.
#[derive(Debug, Clone)]
pub struct SysfsRoots {
    pub cpu: PathBuf,
    pub powercap: PathBuf,
    pub hwmon: PathBuf,
    pub power_supply: PathBuf,
    pub video4linux: PathBuf,
    pub kbd_backlight: PathBuf,
    pub display_backlight: PathBuf,
    pub acpi: PathBuf,
    pub platform: PathBuf,
    pub battery: PathBuf,
    pub gpu_hwmon: PathBuf,
}

impl Default for SysfsRoots {
    fn default() -> Self {
        Self {
            cpu: PathBuf::from("/sys/devices/system/cpu"),
            powercap: PathBuf::from("/sys/class/powercap/intel-rapl:0"),
            hwmon: PathBuf::from("/sys/class/hwmon"),
            power_supply: PathBuf::from("/sys/class/power_supply"),
            video4linux: PathBuf::from("/sys/class/video4linux"),
            kbd_backlight: PathBuf::from("/sys/class/leds/kbd_backlight"),
            display_backlight: PathBuf::from("/sys/class/backlight"),
            acpi: PathBuf::from("/sys/firmware/acpi"),
            platform: PathBuf::from("/sys/devices/platform/ec"),
            battery: PathBuf::from("/sys/class/power_supply/BAT0"),
            gpu_hwmon: PathBuf::from("/sys/class/drm/card0/device/hwmon"),
        }
    }
}

/// Orchestrates the daemon from construction to shutdown.
pub struct Application {
    config_manager: ConfigManager,
    roots: SysfsRoots,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Wires the context, workers and bus together and blocks until the
    /// daemon shuts down.
    pub async fn run(self) -> Result<()> {
        let ctx = RunContext::new(self.config_manager);
        let roots = self.roots;

        let mut scheduler = Scheduler::new();
        scheduler.register(StateSwitcherWorker::new(
            ctx.clone(),
            find_ac_attribute(&roots.power_supply),
        ));
        scheduler.register(CpuWorker::new(ctx.clone(), &roots.cpu, &roots.powercap));
        scheduler.register(FanWorker::new(ctx.clone(), discover_fans(&roots.hwmon)));
        scheduler.register(ChargingWorker::new(
            ctx.clone(),
            ChargingControl::new(&roots.platform, &roots.battery),
        ));
        scheduler.register(WebcamWorker::new(
            ctx.clone(),
            find_webcam_attribute(&roots.video4linux),
        ));
        scheduler.register(KeyboardBacklightWorker::new(ctx.clone(), &roots.kbd_backlight));
        scheduler.register(DisplayBacklightWorker::new(
            ctx.clone(),
            discover_displays(&roots.display_backlight),
        ));
        scheduler.register(OdmWorker::new(ctx.clone(), &roots.acpi, &roots.platform));
        scheduler.register(GpuInfoWorker::new(ctx.clone(), &roots.gpu_hwmon));

        let stop = event_listener::Event::new();
        let stop_listener = stop.listen();

        let iface = DBusInterface {
            ctx: ctx.clone(),
            charging: ChargingControl::new(&roots.platform, &roots.battery),
            stop,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        // The daemon keeps reconciling hardware even when the bus is down.
        let _conn = match connection::Builder::system()
            .and_then(|builder| builder.name(DBUS_NAME))
            .and_then(|builder| builder.serve_at(DBUS_PATH, iface))
        {
            Ok(builder) => match builder.build().await {
                Ok(conn) => {
                    info!("D-Bus interface published as {DBUS_NAME}");
                    Some(conn)
                }
                Err(e) => {
                    warn!("D-Bus unavailable, running without bus: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("D-Bus setup failed, running without bus: {e}");
                None
            }
        };

        SystemCoordinator::new(ctx, scheduler).run(stop_listener).await
    }
}

/// Builder for [`Application`].
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
    roots: SysfsRoots,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
            roots: SysfsRoots::default(),
        }
    }

    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    pub fn with_sysfs_roots(mut self, roots: SysfsRoots) -> Self {
        self.roots = roots;
        self
    }

    pub fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow::anyhow!("Configuration manager is required"))?;
        Ok(Application {
            config_manager,
            roots: self.roots,
        })
    }
}
