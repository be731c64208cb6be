//! Dashboard fan-out: pushes the event stream to connected subscribers.
//!
//! Built on a broadcast channel sized to the per-subscriber buffer. A
//! subscriber that falls more than the buffer behind observes `Lagged`
//! and is disconnected by its transport handler.

use crate::event::Event;
use tokio::sync::broadcast;
use tracing::debug;

/// Per-subscriber buffer; a subscriber lagging past this many events is
/// dropped.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Broadcast hub for dashboard subscribers.
pub struct DashboardHub {
    tx: broadcast::Sender<Event>,
}

impl DashboardHub {
    /// Hub with the standard subscriber buffer.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { tx }
    }

    /// Attach a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        debug!("dashboard subscriber attached");
        self.tx.subscribe()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Push an event to every subscriber. With no subscribers the event
    /// is discarded.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for DashboardHub {
    fn default() -> Self {
        Self::new()
    }
}
