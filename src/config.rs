//! Settings and profile store.
//!
//! Two YAML files live in the configuration directory: `settings.yml` maps
//! power states to profile names and persists charging choices,
//! `profiles.yml` holds the profile list. [`ConfigManager`] owns both behind
//! `Arc<RwLock<..>>` so the bus layer and the control loops share one copy.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::fan_curve::{FanTable, FanTableEntry};
use crate::run_state::PowerState;

/// Name of the built-in profile every state falls back to.
pub const DEFAULT_PROFILE_NAME: &str = "Default";

/// Per-state profile assignment plus persisted charging choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Which profile is active in each power state.
    #[serde(default = "defaults::state_map")]
    pub state_map: HashMap<PowerState, String>,

    /// Charging profile to re-apply on startup, if the hardware offers one.
    #[serde(default)]
    pub charging_profile: Option<String>,

    /// Charging priority to re-apply on startup (USB-C PD machines).
    #[serde(default)]
    pub charging_priority: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_map: defaults::state_map(),
            charging_profile: None,
            charging_priority: None,
        }
    }
}

impl Settings {
    /// Profile name assigned to `state`, falling back to the default
    /// profile when the mapping is missing.
    pub fn profile_name_for(&self, state: PowerState) -> String {
        match self.state_map.get(&state) {
            Some(name) => name.clone(),
            None => {
                warn!("No profile mapped for {state}, using {DEFAULT_PROFILE_NAME}");
                DEFAULT_PROFILE_NAME.to_string()
            }
        }
    }
}

/// CPU section of a profile. `None` fields leave the kernel default alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuProfile {
    /// Number of cores to keep online; `None` keeps all of them.
    #[serde(default)]
    pub online_cores: Option<u32>,

    /// Lower scaling frequency bound in kHz.
    #[serde(default)]
    pub scaling_min_freq: Option<i64>,

    /// Upper scaling frequency bound in kHz.
    #[serde(default)]
    pub scaling_max_freq: Option<i64>,

    /// Requested scaling governor. Driver constraints may override it.
    #[serde(default)]
    pub governor: Option<String>,

    /// Energy/performance preference hint.
    #[serde(default)]
    pub energy_performance_preference: Option<String>,

    /// Disable turbo frequencies (intel_pstate only).
    #[serde(default)]
    pub no_turbo: bool,
}

/// Fan section of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanProfile {
    /// When false the firmware keeps automatic fan control.
    #[serde(default = "defaults::enabled")]
    pub use_control: bool,

    /// Temperature breakpoints, validated into a [`FanTable`] on use.
    #[serde(default = "defaults::fan_table")]
    pub table: Vec<FanTableEntry>,
}

impl Default for FanProfile {
    fn default() -> Self {
        Self {
            use_control: true,
            table: defaults::fan_table(),
        }
    }
}

impl FanProfile {
    pub fn fan_table(&self) -> Result<FanTable> {
        FanTable::new(self.table.clone())
    }
}

/// Webcam section of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebcamProfile {
    /// Desired webcam power state.
    #[serde(default = "defaults::enabled")]
    pub status: bool,

    /// When false the profile leaves the webcam alone.
    #[serde(default)]
    pub use_status: bool,
}

impl Default for WebcamProfile {
    fn default() -> Self {
        Self {
            status: true,
            use_status: false,
        }
    }
}

/// Display panel backlight section of a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayBacklightProfile {
    /// Panel brightness in percent; `None` leaves it untouched.
    #[serde(default)]
    pub brightness: Option<u8>,

    /// When false the profile leaves the panel brightness alone.
    #[serde(default)]
    pub use_brightness: bool,
}

/// Keyboard backlight section of a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyboardBacklightProfile {
    /// Brightness in hardware units; `None` leaves it untouched.
    #[serde(default)]
    pub brightness: Option<i64>,

    /// RGB color as a bare hex integer for per-color capable keyboards.
    #[serde(default)]
    pub color: Option<u64>,
}

/// Platform/ODM section of a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OdmProfile {
    /// Firmware platform profile name, e.g. "quiet" or "performance".
    #[serde(default)]
    pub platform_profile: Option<String>,

    /// TDP limit values in the order the firmware advertises its slots.
    #[serde(default)]
    pub tdp_limits: Vec<i64>,
}

/// One named hardware profile. Applied wholesale, never diffed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,

    #[serde(default)]
    pub cpu: CpuProfile,

    #[serde(default)]
    pub fan: FanProfile,

    #[serde(default)]
    pub webcam: WebcamProfile,

    #[serde(default)]
    pub display: DisplayBacklightProfile,

    #[serde(default)]
    pub keyboard_backlight: KeyboardBacklightProfile,

    #[serde(default)]
    pub odm: OdmProfile,
}

impl Profile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu: CpuProfile::default(),
            fan: FanProfile::default(),
            webcam: WebcamProfile::default(),
            display: DisplayBacklightProfile::default(),
            keyboard_backlight: KeyboardBacklightProfile::default(),
            odm: OdmProfile::default(),
        }
    }
}

mod defaults {
    use std::collections::HashMap;

    use crate::fan_curve::FanTableEntry;
    use crate::run_state::PowerState;

    use super::DEFAULT_PROFILE_NAME;

    pub fn state_map() -> HashMap<PowerState, String> {
        HashMap::from([
            (PowerState::Ac, DEFAULT_PROFILE_NAME.to_string()),
            (PowerState::Bat, DEFAULT_PROFILE_NAME.to_string()),
        ])
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn fan_table() -> Vec<FanTableEntry> {
        crate::fan_curve::FanTable::default().entries().to_vec()
    }
}

/// Built-in profile list written out on first start.
pub fn default_profiles() -> Vec<Profile> {
    let mut powersave = Profile::named("Powersave");
    powersave.cpu.governor = Some("powersave".to_string());
    powersave.cpu.no_turbo = true;
    powersave.cpu.energy_performance_preference = Some("power".to_string());
    powersave.odm.platform_profile = Some("quiet".to_string());

    vec![Profile::named(DEFAULT_PROFILE_NAME), powersave]
}

fn validate_settings(settings: &Settings, profiles: &[Profile]) -> Result<()> {
    for (state, name) in &settings.state_map {
        if !profiles.iter().any(|p| p.name == *name) {
            // Lenient on purpose: resolution falls back to the default profile.
            warn!("Settings map {state} to unknown profile '{name}'");
        }
    }
    Ok(())
}

fn validate_profiles(profiles: &[Profile]) -> Result<()> {
    if !profiles.iter().any(|p| p.name == DEFAULT_PROFILE_NAME) {
        bail!("Profile list must contain a '{DEFAULT_PROFILE_NAME}' profile");
    }
    for (i, profile) in profiles.iter().enumerate() {
        if profile.name.trim().is_empty() {
            bail!("Profile at index {i} has an empty name");
        }
        if profiles[..i].iter().any(|p| p.name == profile.name) {
            bail!("Duplicate profile name '{}'", profile.name);
        }
        profile
            .fan
            .fan_table()
            .with_context(|| format!("Invalid fan table in profile '{}'", profile.name))?;
        if let Some(percent) = profile.display.brightness {
            if percent > 100 {
                bail!(
                    "Display brightness {percent}% in profile '{}' is out of range",
                    profile.name
                );
            }
        }
    }
    Ok(())
}

fn locate_config_dir() -> PathBuf {
    if let Some(dir) = env::var_os("HWPROFILED_CONFIG") {
        return PathBuf::from(dir);
    }
    PathBuf::from("/etc/hwprofiled")
}

/// Owner of the settings and profile files.
///
/// Cloning is cheap; clones share the same locked state.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings: Arc<RwLock<Settings>>,
    profiles: Arc<RwLock<Vec<Profile>>>,
    dir: PathBuf,
}

impl ConfigManager {
    /// Loads both files from `dir` (or the standard location). Missing
    /// files are created from built-in defaults so a first start works on
    /// a pristine machine.
    pub async fn load(dir: Option<PathBuf>) -> Result<Self> {
        let dir = dir.unwrap_or_else(locate_config_dir);
        info!("Loading configuration from: {}", dir.display());

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;

        let manager = Self {
            settings: Arc::new(RwLock::new(Settings::default())),
            profiles: Arc::new(RwLock::new(default_profiles())),
            dir,
        };

        let settings_path = manager.settings_path();
        if settings_path.exists() {
            *manager.settings.write().await = read_yaml(&settings_path)?;
        } else {
            write_yaml(&settings_path, &*manager.settings.read().await)?;
        }

        let profiles_path = manager.profiles_path();
        if profiles_path.exists() {
            let profiles: Vec<Profile> = read_yaml(&profiles_path)?;
            validate_profiles(&profiles)?;
            *manager.profiles.write().await = profiles;
        } else {
            write_yaml(&profiles_path, &*manager.profiles.read().await)?;
        }

        validate_settings(
            &*manager.settings.read().await,
            &manager.profiles.read().await,
        )?;

        Ok(manager)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join("settings.yml")
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.dir.join("profiles.yml")
    }

    pub async fn settings(&self) -> tokio::sync::RwLockReadGuard<'_, Settings> {
        self.settings.read().await
    }

    pub async fn settings_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, Settings> {
        self.settings.write().await
    }

    pub async fn profile_names(&self) -> Vec<String> {
        self.profiles
            .read()
            .await
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Snapshot of the named profile, if it exists.
    pub async fn find_profile(&self, name: &str) -> Option<Profile> {
        self.profiles
            .read()
            .await
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Resolves `state` to a profile snapshot. An unknown mapping falls
    /// back to the built-in default profile.
    pub async fn profile_for_state(&self, state: PowerState) -> Profile {
        let name = self.settings.read().await.profile_name_for(state);
        match self.find_profile(&name).await {
            Some(profile) => profile,
            None => {
                warn!("Profile '{name}' not found, using {DEFAULT_PROFILE_NAME}");
                self.find_profile(DEFAULT_PROFILE_NAME)
                    .await
                    .unwrap_or_else(|| Profile::named(DEFAULT_PROFILE_NAME))
            }
        }
    }

    /// Re-reads both files from disk.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading configuration from: {}", self.dir.display());

        let settings: Settings = read_yaml(&self.settings_path())?;
        let profiles: Vec<Profile> = read_yaml(&self.profiles_path())?;
        validate_profiles(&profiles)?;
        validate_settings(&settings, &profiles)?;

        *self.settings.write().await = settings;
        *self.profiles.write().await = profiles;
        info!("Configuration reloaded");
        Ok(())
    }

    /// Persists the in-memory settings.
    pub async fn save_settings(&self) -> Result<()> {
        write_yaml(&self.settings_path(), &*self.settings.read().await)
    }

    /// Validates a candidate settings file and installs it atomically.
    pub async fn replace_settings(&self, candidate: &Path) -> Result<()> {
        let settings: Settings = read_yaml(candidate)?;
        validate_settings(&settings, &self.profiles.read().await)?;

        install_file(candidate, &self.settings_path())?;
        *self.settings.write().await = settings;
        info!("Settings replaced from {}", candidate.display());
        Ok(())
    }

    /// Validates a candidate profiles file and installs it atomically.
    pub async fn replace_profiles(&self, candidate: &Path) -> Result<()> {
        let profiles: Vec<Profile> = read_yaml(candidate)?;
        validate_profiles(&profiles)?;

        install_file(candidate, &self.profiles_path())?;
        *self.profiles.write().await = profiles;
        info!("Profiles replaced from {}", candidate.display());
        Ok(())
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_yaml::to_string(value).context("Failed to serialize configuration")?;

    let tmp_path = path.with_extension("yml.tmp");
    fs::write(&tmp_path, content)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move config to {}", path.display()))
}

fn install_file(candidate: &Path, target: &Path) -> Result<()> {
    let tmp_path = target.with_extension("yml.tmp");
    fs::copy(candidate, &tmp_path)
        .with_context(|| format!("Failed to stage {}", candidate.display()))?;
    fs::rename(&tmp_path, target)
        .with_context(|| format!("Failed to install {}", target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn manager_in(dir: &TempDir) -> ConfigManager {
        ConfigManager::load(Some(dir.path().to_path_buf()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_start_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir).await;

        assert!(manager.settings_path().exists());
        assert!(manager.profiles_path().exists());
        assert!(
            manager
                .profile_names()
                .await
                .contains(&DEFAULT_PROFILE_NAME.to_string())
        );
    }

    #[tokio::test]
    async fn loads_existing_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("settings.yml"),
            "state_map:\n  ac: Performance\n  bat: Powersave\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("profiles.yml"),
            r#"
- name: Default
- name: Performance
  cpu:
    governor: performance
  odm:
    platform_profile: performance
    tdp_limits: [45, 60]
- name: Powersave
  cpu:
    no_turbo: true
"#,
        )
        .unwrap();

        let manager = manager_in(&dir).await;
        assert_eq!(
            manager.settings().await.profile_name_for(PowerState::Ac),
            "Performance"
        );

        let performance = manager.find_profile("Performance").await.unwrap();
        assert_eq!(performance.cpu.governor.as_deref(), Some("performance"));
        assert_eq!(performance.odm.tdp_limits, vec![45, 60]);
        assert!(!performance.cpu.no_turbo);

        let powersave = manager.find_profile("Powersave").await.unwrap();
        assert!(powersave.cpu.no_turbo);
    }

    #[tokio::test]
    async fn profiles_without_default_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("profiles.yml"), "- name: OnlyOne\n").unwrap();

        let result = ConfigManager::load(Some(dir.path().to_path_buf())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_state_mapping_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("settings.yml"),
            "state_map:\n  ac: NoSuchProfile\n",
        )
        .unwrap();

        let manager = manager_in(&dir).await;
        let profile = manager.profile_for_state(PowerState::Ac).await;
        assert_eq!(profile.name, DEFAULT_PROFILE_NAME);

        // BAT has no mapping at all; same fallback.
        let profile = manager.profile_for_state(PowerState::Bat).await;
        assert_eq!(profile.name, DEFAULT_PROFILE_NAME);
    }

    #[tokio::test]
    async fn replace_profiles_validates_before_install() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir).await;

        let bad = dir.path().join("candidate.yml");
        fs::write(&bad, "- name: Default\n- name: Default\n").unwrap();
        assert!(manager.replace_profiles(&bad).await.is_err());

        // The active file keeps the previous content.
        assert!(
            manager
                .profile_names()
                .await
                .contains(&"Powersave".to_string())
        );
    }

    #[tokio::test]
    async fn replace_profiles_installs_valid_candidate() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir).await;

        let good = dir.path().join("candidate.yml");
        fs::write(&good, "- name: Default\n- name: Gaming\n").unwrap();
        manager.replace_profiles(&good).await.unwrap();

        assert!(manager.find_profile("Gaming").await.is_some());
        let on_disk = fs::read_to_string(manager.profiles_path()).unwrap();
        assert!(on_disk.contains("Gaming"));
    }

    #[tokio::test]
    async fn invalid_fan_table_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir).await;

        let bad = dir.path().join("candidate.yml");
        fs::write(
            &bad,
            "- name: Default\n  fan:\n    table:\n      - temp: 50\n        speed: 140\n",
        )
        .unwrap();
        assert!(manager.replace_profiles(&bad).await.is_err());
    }

    #[tokio::test]
    async fn display_brightness_over_hundred_percent_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir).await;

        let bad = dir.path().join("candidate.yml");
        fs::write(
            &bad,
            "- name: Default\n  display:\n    brightness: 140\n    use_brightness: true\n",
        )
        .unwrap();
        assert!(manager.replace_profiles(&bad).await.is_err());
    }

    #[tokio::test]
    async fn reload_picks_up_external_edits() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir).await;

        fs::write(
            manager.settings_path(),
            "state_map:\n  ac: Powersave\n  bat: Powersave\n",
        )
        .unwrap();
        manager.reload().await.unwrap();

        assert_eq!(
            manager.settings().await.profile_name_for(PowerState::Bat),
            "Powersave"
        );
    }

    #[tokio::test]
    async fn charging_choices_survive_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir).await;

        manager.settings_mut().await.charging_profile = Some("high_capacity".to_string());
        manager.save_settings().await.unwrap();
        manager.reload().await.unwrap();

        assert_eq!(
            manager.settings().await.charging_profile.as_deref(),
            Some("high_capacity")
        );
    }

    #[test]
    fn default_fan_table_is_valid() {
        let profile = FanProfile::default();
        let table = profile.fan_table().unwrap();
        assert_eq!(table.min_entry().speed, 0);
        assert_eq!(table.max_entry().speed, 100);
    }
}
