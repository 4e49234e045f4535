//! Broadcast channel carrying [`PipelineEvent`]s
//!
//! Emitting never blocks. Without subscribers an event is discarded, and a
//! receiver that falls more than `capacity` events behind loses the oldest
//! ones (`RecvError::Lagged`).

use super::PipelineEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered events per bus unless a capacity is given
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out point shared by the budgeter, sampler and verifier runner
///
/// Clones share the same channel.
///
/// ```rust,ignore
/// let bus = EventBus::new(256);
/// let mut rx = bus.subscribe();
/// let sampler = AdaptiveSelfConsistency::new(config)?.with_event_bus(bus.clone());
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         tracing::debug!(kind = event.event_type(), "pipeline event");
///     }
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<PipelineEvent>>,
}

impl EventBus {
    /// `capacity` is clamped to at least one slot
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    pub fn emit(&self, event: PipelineEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    /// Receiver for events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// Emit on an optional bus, building the event only when a bus is present
pub(crate) fn emit(bus: Option<&EventBus>, event: impl FnOnce() -> PipelineEvent) {
    if let Some(bus) = bus {
        bus.emit(event());
    }
}
