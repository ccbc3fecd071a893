//! Live hardware telemetry shared between the control loops and the bus.
//!
//! Each worker writes only its own fields; the D-Bus layer reads snapshots.
//! Values carry the wall-clock time they were sampled so a consumer can
//! tell a stale reading from a fresh one.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use zvariant::Type;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A sampled value together with its sample time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct Stamped<T: Type> {
    pub value: T,
    pub timestamp_ms: u64,
}

impl<T: Type> Stamped<T> {
    pub fn now(value: T) -> Self {
        Self {
            value,
            timestamp_ms: now_ms(),
        }
    }
}

/// Readings for one fan.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanTelemetry {
    pub temp_celsius: Option<Stamped<i32>>,
    pub speed_percent: Option<Stamped<u8>>,
}

/// GPU readings; all optional since many machines have no dGPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuTelemetry {
    pub power_draw_mw: Option<i64>,
    pub power_limit_mw: Option<i64>,
    pub freq_khz: Option<i64>,
}

/// Last keyboard backlight state the daemon wrote or observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyboardBacklightTelemetry {
    pub brightness: Option<i64>,
    pub max_brightness: Option<i64>,
    pub color: Option<u64>,
}

/// The full telemetry record.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub fans: Vec<FanTelemetry>,
    pub cpu_power_draw_mw: Option<Stamped<i64>>,
    pub cpu_power_limit_mw: Option<i64>,
    pub gpu: GpuTelemetry,
    pub keyboard_backlight: KeyboardBacklightTelemetry,
}

/// Shared handle to the telemetry record. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct TelemetryStore {
    inner: Arc<RwLock<Telemetry>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Telemetry {
        self.inner.read().await.clone()
    }

    /// Applies a mutation under the write lock.
    pub async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Telemetry),
    {
        let mut guard = self.inner.write().await;
        mutate(&mut guard);
    }

    /// Records one fan reading, growing the fan list on first contact.
    pub async fn record_fan(&self, index: usize, temp_celsius: i32, speed_percent: u8) {
        self.update(|t| {
            if t.fans.len() <= index {
                t.fans.resize_with(index + 1, FanTelemetry::default);
            }
            t.fans[index].temp_celsius = Some(Stamped::now(temp_celsius));
            t.fans[index].speed_percent = Some(Stamped::now(speed_percent));
        })
        .await;
    }
}
