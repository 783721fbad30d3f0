//! Event bus for broadcasting engine events.
//!
//! External collaborators (notification service, email) subscribe here to
//! learn about committed lifecycle changes. Publishing never blocks the
//! engine: with no subscribers, events are simply dropped.

use market_types::MarketEvent;
use tokio::sync::broadcast;

/// Broadcast channel carrying [`MarketEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<MarketEvent>,
}

impl EventBus {
	/// Creates a new event bus with the given channel capacity.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Publishes an event to all current subscribers.
	///
	/// Returns Err only when there are no subscribers, which callers may
	/// ignore.
	pub fn publish(&self, event: MarketEvent) -> Result<(), Box<broadcast::error::SendError<MarketEvent>>> {
		self.sender.send(event).map(|_| ()).map_err(Box::new)
	}

	/// Creates a new subscription to engine events.
	pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
		self.sender.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use market_types::OrderEvent;

	#[tokio::test]
	async fn test_subscriber_receives_published_event() {
		let bus = EventBus::new(16);
		let mut receiver = bus.subscribe();

		bus.publish(MarketEvent::Order(OrderEvent::Accepted {
			order_id: "o1".to_string(),
			at: Utc::now(),
		}))
		.unwrap();

		let event = receiver.recv().await.unwrap();
		assert_eq!(event.order_id(), "o1");
	}

	#[tokio::test]
	async fn test_publish_without_subscribers_is_err_not_panic() {
		let bus = EventBus::new(16);
		let result = bus.publish(MarketEvent::Order(OrderEvent::Accepted {
			order_id: "o1".to_string(),
			at: Utc::now(),
		}));
		assert!(result.is_err());
	}
}
