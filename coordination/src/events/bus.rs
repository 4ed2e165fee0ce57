//! Event bus for table status
//!
//! Pub/sub messaging over a Tokio broadcast channel. Publishing never blocks
//! the orchestrator: lagging subscribers lose the oldest events.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::types::TableEvent;
use crate::contracts::TableId;
use crate::escalation::FailureCategory;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<TableEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: TableEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => trace!(event_type, receivers = count, "Event published"),
            // No receivers is fine
            Err(_) => trace!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects the events a subscriber cares about. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    table_id: Option<TableId>,
    kinds: Vec<&'static str>,
    categories: Vec<FailureCategory>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only events from one table.
    pub fn table(mut self, table_id: &TableId) -> Self {
        self.table_id = Some(table_id.clone());
        self
    }

    /// Only these event kinds, as named by [`TableEvent::event_type`].
    pub fn kinds(mut self, kinds: &[&'static str]) -> Self {
        self.kinds.extend_from_slice(kinds);
        self
    }

    /// Only signals raised for these categories. Non-signal events pass.
    pub fn categories(mut self, categories: &[FailureCategory]) -> Self {
        self.categories.extend_from_slice(categories);
        self
    }

    pub fn matches(&self, event: &TableEvent) -> bool {
        if self.table_id.as_ref().is_some_and(|t| t != event.table_id()) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.event_type()) {
            return false;
        }
        match event {
            TableEvent::SignalRaised { category, .. } if !self.categories.is_empty() => {
                self.categories.contains(category)
            }
            _ => true,
        }
    }
}

/// Receiver that yields only events accepted by its filter.
///
/// A lagging receiver skips what it missed and keeps going; only a closed bus
/// ends the stream.
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<TableEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<TableEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<TableEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Filtered subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::Severity;
    use crate::round::RoundState;
    use chrono::Utc;

    fn state_changed(table: &str, to: RoundState) -> TableEvent {
        TableEvent::StateChanged {
            table_id: TableId::new(table),
            from: RoundState::Closed,
            to,
            round_id: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    fn signal(table: &str, category: FailureCategory) -> TableEvent {
        TableEvent::SignalRaised {
            table_id: TableId::new(table),
            category,
            severity: Severity::Warn,
            attempt: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(state_changed("R-01", RoundState::Starting));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "state_changed");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(state_changed("R-01", RoundState::Starting));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_type(), e2.event_type());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert!(!bus.has_subscribers());
        bus.publish(state_changed("R-01", RoundState::Starting));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .table(&TableId::new("R-01"))
            .kinds(&["state_changed"]);

        let other_table = state_changed("R-02", RoundState::Starting);
        let other_kind = signal("R-01", FailureCategory::NoStart);

        assert!(filter.matches(&state_changed("R-01", RoundState::Starting)));
        assert!(!filter.matches(&other_table));
        assert!(!filter.matches(&other_kind));
    }

    #[test]
    fn test_category_filter_only_narrows_signals() {
        let filter = EventFilter::new().categories(&[FailureCategory::NoDeal]);

        assert!(filter.matches(&signal("R-01", FailureCategory::NoDeal)));
        assert!(!filter.matches(&signal("R-01", FailureCategory::NoStart)));
        assert!(filter.matches(&state_changed("R-01", RoundState::Error)));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().table(&TableId::new("target")));

        bus.publish(state_changed("other", RoundState::Starting));
        bus.publish(state_changed("target", RoundState::Error));

        match filtered.recv().await {
            Some(TableEvent::StateChanged { to, .. }) => assert_eq!(to, RoundState::Error),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_filtered_receiver_ends_with_bus() {
        let bus = EventBus::new();
        let mut filtered = bus.subscribe_filtered(EventFilter::new());
        drop(bus);
        assert!(filtered.recv().await.is_none());
    }
}
