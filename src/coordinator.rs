//! Daemon lifecycle: runs the scheduler and reacts to events and signals.

use anyhow::{Context, Result, bail};
use event_listener::EventListener;
use log::{info, warn};
use tokio::signal::unix::{SignalKind, signal};

use crate::app_context::RunContext;
use crate::event::Event;
use crate::scheduler::Scheduler;

/// Owns the scheduler and the main event loop.
///
/// The coordinator is the only place that calls `restart_all`; workers and
/// the bus layer request it indirectly by publishing events.
pub struct SystemCoordinator {
    ctx: RunContext,
    scheduler: Scheduler,
}

impl SystemCoordinator {
    pub fn new(ctx: RunContext, scheduler: Scheduler) -> Self {
        Self { ctx, scheduler }
    }

    /// Starts every loop and blocks until SIGINT, SIGTERM, a bus `Stop`
    /// call or a `SystemShutdown` event. Always runs the orderly scheduler
    /// stop before returning, so fans are back under firmware control.
    pub async fn run(&mut self, stop_listener: EventListener) -> Result<()> {
        self.scheduler.start().await?;

        let mut events = self.ctx.events.subscribe();
        let mut sigint = signal(SignalKind::interrupt()).context("SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("SIGTERM handler")?;
        tokio::pin!(stop_listener);

        info!("Entering main event loop");
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("SIGINT received, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    break;
                }
                _ = &mut stop_listener => {
                    info!("Stop requested over the bus, shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if self.handle_event(event).await? {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event bus lagged by {n} messages");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            bail!("Event bus closed unexpectedly");
                        }
                    }
                }
            }
        }

        self.scheduler.stop().await
    }

    /// Returns true when the daemon should shut down.
    async fn handle_event(&mut self, event: Event) -> Result<bool> {
        match event {
            Event::StateChanged(state) => {
                info!("Power state changed to {state}, restarting loops");
                self.scheduler.restart_all().await?;
            }
            Event::ConfigurationChanged => {
                info!("Configuration changed, restarting loops");
                self.scheduler.restart_all().await?;
            }
            Event::SystemShutdown => {
                info!("Shutdown event received");
                return Ok(true);
            }
            // Consumed by the backlight loop.
            Event::KeyboardBacklightSet { .. } => {}
        }
        Ok(false)
    }
}
