//! Pool lifecycle events
//!
//! Events reach synchronous [`PoolEventListener`]s first and are then
//! published on a broadcast channel. Receivers that fall behind lag; they
//! never block the emitter.

use crate::health::HealthStatus;
use crate::role::PoolRole;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle signal emitted by the manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
	ConnectionOpened {
		role: PoolRole,
		timestamp: DateTime<Utc>,
	},
	ConnectionAcquired {
		role: PoolRole,
		connection_id: String,
		timestamp: DateTime<Utc>,
	},
	ConnectionReleased {
		role: PoolRole,
		connection_id: String,
		timestamp: DateTime<Utc>,
	},
	/// The connection was closed instead of returned
	ConnectionRemoved {
		role: PoolRole,
		connection_id: String,
		reason: String,
		timestamp: DateTime<Utc>,
	},
	PoolError {
		role: PoolRole,
		message: String,
		timestamp: DateTime<Utc>,
	},
	HealthCheckCompleted {
		status: HealthStatus,
		timestamp: DateTime<Utc>,
	},
	HealthCheckFailed {
		role: PoolRole,
		message: String,
		timestamp: DateTime<Utc>,
	},
	HealthStatusChanged {
		previous: HealthStatus,
		current: HealthStatus,
		timestamp: DateTime<Utc>,
	},
	PoolsClosed {
		timestamp: DateTime<Utc>,
	},
}

impl PoolEvent {
	pub fn connection_opened(role: PoolRole) -> Self {
		Self::ConnectionOpened {
			role,
			timestamp: Utc::now(),
		}
	}

	pub fn connection_acquired(role: PoolRole, connection_id: impl Into<String>) -> Self {
		Self::ConnectionAcquired {
			role,
			connection_id: connection_id.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn connection_released(role: PoolRole, connection_id: impl Into<String>) -> Self {
		Self::ConnectionReleased {
			role,
			connection_id: connection_id.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn connection_removed(
		role: PoolRole,
		connection_id: impl Into<String>,
		reason: impl Into<String>,
	) -> Self {
		Self::ConnectionRemoved {
			role,
			connection_id: connection_id.into(),
			reason: reason.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn pool_error(role: PoolRole, message: impl Into<String>) -> Self {
		Self::PoolError {
			role,
			message: message.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn health_check_completed(status: HealthStatus) -> Self {
		Self::HealthCheckCompleted {
			status,
			timestamp: Utc::now(),
		}
	}

	pub fn health_check_failed(role: PoolRole, message: impl Into<String>) -> Self {
		Self::HealthCheckFailed {
			role,
			message: message.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn health_status_changed(previous: HealthStatus, current: HealthStatus) -> Self {
		Self::HealthStatusChanged {
			previous,
			current,
			timestamp: Utc::now(),
		}
	}

	pub fn pools_closed() -> Self {
		Self::PoolsClosed {
			timestamp: Utc::now(),
		}
	}

	/// Stable snake_case name of the variant
	pub fn name(&self) -> &'static str {
		match self {
			Self::ConnectionOpened { .. } => "connection_opened",
			Self::ConnectionAcquired { .. } => "connection_acquired",
			Self::ConnectionReleased { .. } => "connection_released",
			Self::ConnectionRemoved { .. } => "connection_removed",
			Self::PoolError { .. } => "pool_error",
			Self::HealthCheckCompleted { .. } => "health_check_completed",
			Self::HealthCheckFailed { .. } => "health_check_failed",
			Self::HealthStatusChanged { .. } => "health_status_changed",
			Self::PoolsClosed { .. } => "pools_closed",
		}
	}

	pub fn timestamp(&self) -> DateTime<Utc> {
		match self {
			Self::ConnectionOpened { timestamp, .. }
			| Self::ConnectionAcquired { timestamp, .. }
			| Self::ConnectionReleased { timestamp, .. }
			| Self::ConnectionRemoved { timestamp, .. }
			| Self::PoolError { timestamp, .. }
			| Self::HealthCheckCompleted { timestamp, .. }
			| Self::HealthCheckFailed { timestamp, .. }
			| Self::HealthStatusChanged { timestamp, .. }
			| Self::PoolsClosed { timestamp } => *timestamp,
		}
	}

	/// Pool the event concerns, if it concerns a single one
	pub fn role(&self) -> Option<PoolRole> {
		match self {
			Self::ConnectionOpened { role, .. }
			| Self::ConnectionAcquired { role, .. }
			| Self::ConnectionReleased { role, .. }
			| Self::ConnectionRemoved { role, .. }
			| Self::PoolError { role, .. }
			| Self::HealthCheckFailed { role, .. } => Some(*role),
			_ => None,
		}
	}
}

impl fmt::Display for PoolEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.role() {
			Some(role) => write!(f, "{}[{}]", self.name(), role),
			None => f.write_str(self.name()),
		}
	}
}

/// Receives events synchronously on the emitting task.
///
/// Implementations must be quick and must not block.
pub trait PoolEventListener: Send + Sync {
	fn on_event(&self, event: &PoolEvent);
}

impl<F> PoolEventListener for F
where
	F: Fn(&PoolEvent) + Send + Sync,
{
	fn on_event(&self, event: &PoolEvent) {
		self(event)
	}
}

/// Fan-out point shared by every component of a manager
#[derive(Clone)]
pub struct EventEmitter {
	listeners: Arc<RwLock<Vec<Arc<dyn PoolEventListener>>>>,
	sender: broadcast::Sender<PoolEvent>,
}

impl EventEmitter {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
		Self {
			listeners: Arc::new(RwLock::new(Vec::new())),
			sender,
		}
	}

	pub fn add_listener(&self, listener: Arc<dyn PoolEventListener>) {
		self.listeners.write().push(listener);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
		self.sender.subscribe()
	}

	pub fn emit(&self, event: PoolEvent) {
		// Snapshot so a listener may register further listeners
		let listeners = self.listeners.read().clone();
		for listener in listeners.iter() {
			listener.on_event(&event);
		}
		// No subscribers is not an error
		let _ = self.sender.send(event);
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.read().len()
	}
}

impl Default for EventEmitter {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for EventEmitter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventEmitter")
			.field("listeners", &self.listener_count())
			.field("subscribers", &self.sender.receiver_count())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[rstest]
	fn test_listener_receives_events_in_order() {
		// Arrange
		let emitter = EventEmitter::new();
		let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
		let sink = seen.clone();
		emitter.add_listener(Arc::new(move |event: &PoolEvent| {
			sink.lock().push(event.name());
		}));

		// Act
		emitter.emit(PoolEvent::connection_acquired(PoolRole::Primary, "c1"));
		emitter.emit(PoolEvent::connection_released(PoolRole::Primary, "c1"));

		// Assert
		assert_eq!(
			*seen.lock(),
			vec!["connection_acquired", "connection_released"]
		);
	}

	#[rstest]
	#[tokio::test]
	async fn test_subscriber_receives_broadcast() {
		// Arrange
		let emitter = EventEmitter::new();
		let mut rx = emitter.subscribe();

		// Act
		emitter.emit(PoolEvent::pools_closed());

		// Assert
		let event = rx.recv().await.unwrap();
		assert!(matches!(event, PoolEvent::PoolsClosed { .. }));
		assert_eq!(event.role(), None);
	}

	#[rstest]
	fn test_emit_without_subscribers_is_silent() {
		// Arrange
		let emitter = EventEmitter::new();
		let count = Arc::new(AtomicUsize::new(0));
		let counter = count.clone();
		emitter.add_listener(Arc::new(move |_: &PoolEvent| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));

		// Act
		emitter.emit(PoolEvent::pool_error(PoolRole::Replica, "boom"));

		// Assert
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[rstest]
	fn test_display_includes_role() {
		// Act
		let rendered = PoolEvent::health_check_failed(PoolRole::Analytics, "down").to_string();

		// Assert
		assert_eq!(rendered, "health_check_failed[analytics]");
	}
}
