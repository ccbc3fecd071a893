//! Periodic execution of control loops.
//!
//! Each registered [`ControlLoop`] gets its own timer task with an
//! independent period. The scheduler serializes lifecycle calls against
//! ticks through a per-loop mutex, so `restart_all` never preempts a tick
//! in flight; it waits for the loop to finish and runs between ticks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shortest and longest permitted loop periods. Out-of-range periods are
/// clamped with a warning.
const MIN_PERIOD: Duration = Duration::from_millis(100);
const MAX_PERIOD: Duration = Duration::from_secs(100);

/// How long `stop` waits for each timer task to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// One periodically executed unit of hardware reconciliation.
#[async_trait]
pub trait ControlLoop: Send {
    fn name(&self) -> &str;
    fn period(&self) -> Duration;

    /// Applies the active profile to the hardware. Runs before the first
    /// tick and again after every restart.
    async fn on_start(&mut self) -> Result<()>;

    /// One reconciliation pass. Errors are logged and do not stop the
    /// loop or the daemon.
    async fn on_tick(&mut self) -> Result<()>;

    /// Returns the hardware to a safe state.
    async fn on_stop(&mut self) -> Result<()>;
}

struct Registration {
    name: String,
    period: Duration,
    worker: Arc<Mutex<dyn ControlLoop>>,
}

/// Owner of every control loop, in registration order.
pub struct Scheduler {
    loops: Vec<Registration>,
    cancel: CancellationToken,
    tick_tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            loops: Vec::new(),
            cancel: CancellationToken::new(),
            tick_tasks: Vec::new(),
        }
    }

    /// Registers a loop. Order of registration is the order lifecycle
    /// calls run in.
    pub fn register<L: ControlLoop + 'static>(&mut self, worker: L) {
        let name = worker.name().to_string();
        let mut period = worker.period();
        if period < MIN_PERIOD || period > MAX_PERIOD {
            let clamped = period.clamp(MIN_PERIOD, MAX_PERIOD);
            warn!(
                "Loop '{}' period {:?} out of range, clamped to {:?}",
                name, period, clamped
            );
            period = clamped;
        }

        self.loops.push(Registration {
            name,
            period,
            worker: Arc::new(Mutex::new(worker)),
        });
    }

    /// Runs every `on_start` in registration order, then spawns one timer
    /// task per loop.
    pub async fn start(&mut self) -> Result<()> {
        for registration in &self.loops {
            registration.worker.lock().await.on_start().await?;
        }

        for registration in &self.loops {
            let worker = Arc::clone(&registration.worker);
            let period = registration.period;
            let name = registration.name.clone();
            let token = self.cancel.child_token();

            self.tick_tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first interval tick fires immediately; on_start
                // already ran, so swallow it.
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            let mut worker = worker.lock().await;
                            if let Err(e) = worker.on_tick().await {
                                warn!("Loop '{}' tick failed: {:#}", name, e);
                            }
                        }
                    }
                }
            }));
        }

        info!("Scheduler started with {} loops", self.loops.len());
        Ok(())
    }

    /// Stops and starts every loop: all `on_stop` calls in registration
    /// order, then all `on_start` calls. Timer tasks keep running and pick
    /// the restarted loops back up on their next tick.
    pub async fn restart_all(&self) -> Result<()> {
        info!("Restarting all {} loops", self.loops.len());

        for registration in &self.loops {
            if let Err(e) = registration.worker.lock().await.on_stop().await {
                warn!("Loop '{}' failed to stop: {:#}", registration.name, e);
            }
        }
        for registration in &self.loops {
            if let Err(e) = registration.worker.lock().await.on_start().await {
                warn!("Loop '{}' failed to start: {:#}", registration.name, e);
            }
        }
        Ok(())
    }

    /// Cancels all timer tasks and drains them, then runs every `on_stop`
    /// in registration order so each loop leaves the hardware in a safe
    /// state.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        for handle in self.tick_tasks.drain(..) {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Timer task panicked: {e}"),
                Err(_) => warn!("Timer task did not stop within {SHUTDOWN_TIMEOUT:?}"),
            }
        }

        for registration in &self.loops {
            if let Err(e) = registration.worker.lock().await.on_stop().await {
                warn!("Loop '{}' failed to stop: {:#}", registration.name, e);
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
