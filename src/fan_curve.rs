//! Temperature to fan-speed mapping with anti-oscillation hysteresis.
//!
//! A [`FanTable`] is a sorted list of (temperature, speed percent)
//! breakpoints. [`FanLogic`] pairs one table with one [`ValueFilter`] and a
//! private decision cursor; falling temperatures ramp the speed down slowly
//! instead of snapping, which keeps audible fan flapping away.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::value_filter::ValueFilter;

/// Number of decision ticks a lower table index is held back before the
/// speed is allowed to drop one step.
const FALL_HOLD_TICKS: u8 = 5;

/// One breakpoint of a fan table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanTableEntry {
    pub temp: i32,
    pub speed: u8,
}

/// Ordered-by-temperature fan curve. Always contains at least one entry;
/// replaced wholesale on profile change, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanTable {
    entries: Vec<FanTableEntry>,
}

impl Default for FanTable {
    /// Conservative built-in curve, silent below 50°C and saturated at
    /// 90°C. Used until a profile installs its own table.
    fn default() -> Self {
        let entries = [(20, 0), (50, 20), (60, 35), (70, 50), (80, 75), (90, 100)]
            .into_iter()
            .map(|(temp, speed)| FanTableEntry { temp, speed })
            .collect();
        Self { entries }
    }
}

impl FanTable {
    pub fn new(mut entries: Vec<FanTableEntry>) -> Result<Self> {
        if entries.is_empty() {
            bail!("fan table must contain at least one entry");
        }
        for entry in &entries {
            if entry.speed > 100 {
                bail!(
                    "fan table speed {}% at {}°C is out of range",
                    entry.speed,
                    entry.temp
                );
            }
        }
        entries.sort_by_key(|e| e.temp);
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FanTableEntry] {
        &self.entries
    }

    pub fn min_entry(&self) -> FanTableEntry {
        self.entries[0]
    }

    pub fn max_entry(&self) -> FanTableEntry {
        self.entries[self.entries.len() - 1]
    }

    /// Index of the first entry with `temp >= temperature`, clamped to the
    /// table bounds. Binary search makes the behavior well defined for
    /// tables with gaps between integer temperatures.
    fn ceiling_index(&self, temperature: i32) -> usize {
        if temperature <= self.min_entry().temp {
            return 0;
        }
        if temperature > self.max_entry().temp {
            return self.entries.len() - 1;
        }
        self.entries.partition_point(|e| e.temp < temperature)
    }
}

/// Per-fan decision state: the table index chosen last and the hold
/// counter for falling temperatures. Owned by exactly one `FanLogic`.
#[derive(Debug, Clone, Copy, Default)]
struct DecisionState {
    last_index: Option<usize>,
    fall_ticks: u8,
}

/// Smoothing filter plus hysteresis-aware curve lookup for a single fan.
#[derive(Debug, Clone)]
pub struct FanLogic {
    table: FanTable,
    filter: ValueFilter,
    state: DecisionState,
    latest_speed: u8,
}

impl FanLogic {
    pub fn new(table: FanTable) -> Self {
        let latest_speed = table.min_entry().speed;
        Self {
            table,
            filter: ValueFilter::new(),
            state: DecisionState::default(),
            latest_speed,
        }
    }

    /// Replaces the fan table, keeping the sample buffer. The decision
    /// cursor is reset since indices into the old table are meaningless.
    pub fn set_table(&mut self, table: FanTable) {
        self.table = table;
        self.state = DecisionState::default();
    }

    /// Feeds one raw temperature reading and recomputes the target speed.
    pub fn report_temperature(&mut self, temperature: i32) {
        self.filter.add_sample(temperature);
        if let Some(effective) = self.filter.filtered_value() {
            self.latest_speed = self.decide(effective);
        }
    }

    /// Target speed in percent decided from the samples reported so far.
    pub fn speed_percent(&self) -> u8 {
        self.latest_speed
    }

    /// Smoothed temperature currently driving the decision, if any sample
    /// has been reported.
    pub fn filtered_temp(&self) -> Option<i32> {
        self.filter.filtered_value()
    }

    fn decide(&mut self, effective_temp: i32) -> u8 {
        let found = self.table.ceiling_index(effective_temp);

        let chosen = match self.state.last_index {
            None => found,
            // Rising or steady temperature applies immediately.
            Some(last) if found >= last => found,
            // Falling: hold the old index for FALL_HOLD_TICKS decisions,
            // then step down a single index per unlock.
            Some(last) => {
                self.state.fall_ticks = (self.state.fall_ticks + 1) % FALL_HOLD_TICKS;
                if self.state.fall_ticks == 0 {
                    last.saturating_sub(1)
                } else {
                    last
                }
            }
        };

        if found >= chosen {
            self.state.fall_ticks = 0;
        }
        self.state.last_index = Some(chosen);
        self.table.entries()[chosen].speed
    }
}
