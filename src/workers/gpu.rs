//! GPU telemetry loop. Read-only; machines without a dGPU simply report
//! nothing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::app_context::RunContext;
use crate::scheduler::ControlLoop;
use crate::sysfs::IntAttr;

pub struct GpuInfoWorker {
    ctx: RunContext,
    /// Average power draw in microwatts.
    power_average: IntAttr,
    /// Power cap in microwatts.
    power_cap: IntAttr,
    /// Core clock in hertz.
    freq_input: IntAttr,
}

impl GpuInfoWorker {
    /// `gpu_hwmon` is the hwmon directory of the GPU, when one exists.
    pub fn new(ctx: RunContext, gpu_hwmon: impl Into<PathBuf>) -> Self {
        let gpu_hwmon = gpu_hwmon.into();
        Self {
            ctx,
            power_average: IntAttr::new(gpu_hwmon.join("power1_average")),
            power_cap: IntAttr::new(gpu_hwmon.join("power1_cap")),
            freq_input: IntAttr::new(gpu_hwmon.join("freq1_input")),
        }
    }

    async fn sample(&self) {
        let draw_mw = self.power_average.read_opt().map(|uw| uw / 1000);
        let limit_mw = self.power_cap.read_opt().map(|uw| uw / 1000);
        let freq_khz = self.freq_input.read_opt().map(|hz| hz / 1000);

        self.ctx
            .telemetry
            .update(|t| {
                t.gpu.power_draw_mw = draw_mw;
                t.gpu.power_limit_mw = limit_mw;
                t.gpu.freq_khz = freq_khz;
            })
            .await;
    }
}

#[async_trait]
impl ControlLoop for GpuInfoWorker {
    fn name(&self) -> &str {
        "gpu-info"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn on_start(&mut self) -> Result<()> {
        if !self.power_average.is_available() {
            info!("No GPU power telemetry available");
        }
        self.sample().await;
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        self.sample().await;
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
    use tempfile::TempDir;

    use crate::config::ConfigManager;

    async fn context_in(dir: &TempDir) -> RunContext {
        let config = ConfigManager::load(Some(dir.path().join("etc")))
            .await
            .unwrap();
        RunContext::new(config)
    }

    #[tokio::test]
    async fn samples_convert_units() {
        let dir = TempDir::new().unwrap();
        let hwmon = dir.path().join("hwmon3");
        fs::create_dir_all(&hwmon).unwrap();
        fs::write(hwmon.join("power1_average"), "42000000\n").unwrap();
        fs::write(hwmon.join("power1_cap"), "80000000\n").unwrap();
        fs::write(hwmon.join("freq1_input"), "1500000000\n").unwrap();

        let ctx = context_in(&dir).await;
        let mut worker = GpuInfoWorker::new(ctx.clone(), &hwmon);
        worker.on_tick().await.unwrap();

        let gpu = ctx.telemetry.snapshot().await.gpu;
        assert_eq!(gpu.power_draw_mw, Some(42_000));
        assert_eq!(gpu.power_limit_mw, Some(80_000));
        assert_eq!(gpu.freq_khz, Some(1_500_000));
    }

    #[tokio::test]
    async fn absent_gpu_reports_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context_in(&dir).await;
        let mut worker = GpuInfoWorker::new(ctx.clone(), dir.path().join("nope"));

        worker.on_start().await.unwrap();
        worker.on_tick().await.unwrap();

        let gpu = ctx.telemetry.snapshot().await.gpu;
        assert_eq!(gpu.power_draw_mw, None);
        assert_eq!(gpu.power_limit_mw, None);
        assert_eq!(gpu.freq_khz, None);
    }
}
