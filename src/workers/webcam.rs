//! Webcam enable/disable loop.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

use crate::app_context::RunContext;
use crate::scheduler::ControlLoop;
use crate::sysfs::BoolAttr;

/// Finds the USB `authorized` toggle of the first video4linux device.
pub fn find_webcam_attribute(video4linux_root: &Path) -> Option<BoolAttr> {
    let entries = fs::read_dir(video4linux_root).ok()?;
    let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    paths.into_iter().find_map(|dir| {
        let attr = BoolAttr::new(dir.join("device").join("authorized"));
        attr.is_available().then_some(attr)
    })
}

/// Applies the profile's webcam block every ten seconds. Profiles that do
/// not opt in (`use_status`) leave the device untouched.
pub struct WebcamWorker {
    ctx: RunContext,
    authorized: Option<BoolAttr>,
    disabled_by_us: bool,
}

impl WebcamWorker {
    pub fn new(ctx: RunContext, authorized: Option<BoolAttr>) -> Self {
        Self {
            ctx,
            authorized,
            disabled_by_us: false,
        }
    }

    async fn apply(&mut self) {
        let Some(attr) = &self.authorized else {
            return;
        };

        let webcam = self.ctx.active_profile().await.webcam;
        if !webcam.use_status {
            return;
        }

        if attr.read_opt() != Some(webcam.status) {
            if let Err(e) = attr.write(&webcam.status) {
                warn!("Webcam: {e:#}");
                return;
            }
        }
        self.disabled_by_us = !webcam.status;
    }
}

#[async_trait]
impl ControlLoop for WebcamWorker {
    fn name(&self) -> &str {
        "webcam"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.authorized.is_none() {
            info!("No controllable webcam found");
        }
        self.apply().await;
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<()> {
        self.apply().await;
        Ok(())
    }

    /// A webcam the daemon disabled comes back when the daemon leaves.
    async fn on_stop(&mut self) -> Result<()> {
        if self.disabled_by_us {
            if let Some(attr) = &self.authorized {
                if let Err(e) = attr.write(&true) {
                    warn!("Webcam re-enable: {e:#}");
                }
            }
            self.disabled_by_us = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::config::{ConfigManager, Profile};
    use crate::run_state::PowerState;

    fn fake_webcam(root: &Path) -> PathBuf {
        let device = root.join("video0").join("device");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("authorized"), "1\n").unwrap();
        device.join("authorized")
    }

    async fn context_with_webcam_profile(
        dir: &TempDir,
        status: bool,
        use_status: bool,
    ) -> RunContext {
        let etc = dir.path().join("etc");
        fs::create_dir_all(&etc).unwrap();
        let mut profile = Profile::named("Test");
        profile.webcam.status = status;
        profile.webcam.use_status = use_status;
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

    #[test]
    fn discovery_finds_authorized_toggle() {
        let dir = TempDir::new().unwrap();
        let path = fake_webcam(dir.path());
        let attr = find_webcam_attribute(dir.path()).unwrap();
        assert_eq!(attr.read_path(), path);
    }

    #[tokio::test]
    async fn opted_in_profile_disables_webcam() {
        let dir = TempDir::new().unwrap();
        let path = fake_webcam(dir.path());

        let ctx = context_with_webcam_profile(&dir, false, true).await;
        let mut worker = WebcamWorker::new(ctx, find_webcam_attribute(dir.path()));
        worker.on_start().await.unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
    }

    #[tokio::test]
    async fn profile_without_opt_in_is_hands_off() {
        let dir = TempDir::new().unwrap();
        let path = fake_webcam(dir.path());

        let ctx = context_with_webcam_profile(&dir, false, false).await;
        let mut worker = WebcamWorker::new(ctx, find_webcam_attribute(dir.path()));
        worker.on_start().await.unwrap();
        worker.on_tick().await.unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "1");
    }

    #[tokio::test]
    async fn stop_reenables_a_webcam_we_disabled() {
        let dir = TempDir::new().unwrap();
        let path = fake_webcam(dir.path());

        let ctx = context_with_webcam_profile(&dir, false, true).await;
        let mut worker = WebcamWorker::new(ctx, find_webcam_attribute(dir.path()));
        worker.on_start().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");

        worker.on_stop().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }
}
