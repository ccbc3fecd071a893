//! # hwprofiled
//!
//! A privileged Linux daemon that keeps a laptop's runtime hardware state
//! in line with user-selected profiles. It reads and writes kernel sysfs
//! attribute files for CPU frequency and core control, fan speed, charging
//! behavior, webcam, keyboard backlight and the platform profile, and
//! publishes live telemetry over D-Bus.
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) runs the main
//!   event loop and owns the [`Scheduler`](scheduler::Scheduler)
//! - [`ControlLoop`](scheduler::ControlLoop) implementations under
//!   [`workers`] each reconcile one hardware concern on their own period
//! - [`EventBus`](event::EventBus) decouples the bus layer and the state
//!   monitor from the coordinator
//! - [`RunContext`](app_context::RunContext) carries the shared state:
//!   configuration, run state and telemetry
//!
//! ## Example
//!
//! ```no_run
//! use hwprofiled::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod event;
pub mod fan_curve;
pub mod interface;
pub mod range_set;
pub mod run_state;
pub mod scheduler;
pub mod single_instance;
pub mod sysfs;
pub mod telemetry;
pub mod value_filter;
pub mod workers;
