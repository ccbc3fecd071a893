//! Event-driven communication between the bus layer, workers and the
//! coordinator.

use anyhow::Result;
use tokio::sync::broadcast;

use crate::run_state::PowerState;

/// Application events published through the [`EventBus`].
///
/// Workers and the D-Bus interface never call into the coordinator directly;
/// they publish an event and the coordinator reacts.
#[derive(Debug, Clone)]
pub enum Event {
    /// The power source changed (or was determined for the first time).
    /// The coordinator responds by restarting every control loop under the
    /// newly resolved profile.
    StateChanged(PowerState),
    /// Settings or profiles were replaced on disk and reloaded; all loops
    /// must re-apply their hardware state.
    ConfigurationChanged,
    /// A keyboard backlight change was requested over the bus.
    KeyboardBacklightSet { brightness: i64, color: Option<u64> },
    /// Orderly daemon shutdown was requested.
    SystemShutdown,
}

/// Publish-subscribe bus on a tokio broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Publishes an event to all subscribers. Errors when nobody listens.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Creates a subscriber receiving every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
