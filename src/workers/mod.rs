//! Control loop implementations, one per hardware concern.

pub mod backlight;
pub mod charging;
pub mod cpu;
pub mod display;
pub mod fan;
pub mod gpu;
pub mod odm;
pub mod state_switcher;
pub mod webcam;
