//! Role-to-pool registry

use crate::acquire::AcquireCounters;
use crate::backend::{PhysicalPool, SqlxPool};
use crate::error::{PoolError, PoolResult};
use crate::events::{EventEmitter, PoolEvent};
use crate::metrics::PoolStats;
use crate::role::PoolRole;
use portal_db_conf::{DatabaseSettings, PoolEndpointConfig};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// A physical pool together with its configuration and counters
pub struct RegisteredPool {
	role: PoolRole,
	backend: Arc<dyn PhysicalPool>,
	config: PoolEndpointConfig,
	counters: Arc<AcquireCounters>,
}

impl RegisteredPool {
	pub fn role(&self) -> PoolRole {
		self.role
	}

	pub fn backend(&self) -> &Arc<dyn PhysicalPool> {
		&self.backend
	}

	pub fn config(&self) -> &PoolEndpointConfig {
		&self.config
	}

	pub fn counters(&self) -> &Arc<AcquireCounters> {
		&self.counters
	}

	/// Current occupancy merged with acquisition counters.
	///
	/// Active connections come from the checked-out counter; the backend
	/// only supplies the number of open sessions.
	pub fn stats(&self) -> PoolStats {
		PoolStats {
			waiting_requests: self.counters.waiting(),
			acquired_total: self.counters.acquired_total(),
			released_total: self.counters.released_total(),
			acquire_timeouts: self.counters.acquire_timeouts(),
			..PoolStats::from_state(
				self.backend.state(),
				self.counters.checked_out(),
				self.config.max_connections,
			)
		}
	}
}

impl fmt::Debug for RegisteredPool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RegisteredPool")
			.field("role", &self.role)
			.field("endpoint", &self.backend.describe())
			.field("max_connections", &self.config.max_connections)
			.finish()
	}
}

/// Maps each configured role to its pool.
///
/// Filled once at startup; read-only afterwards apart from closing.
#[derive(Debug)]
pub struct PoolRegistry {
	pools: BTreeMap<PoolRole, RegisteredPool>,
	events: EventEmitter,
	closed: AtomicBool,
}

impl PoolRegistry {
	/// An empty registry with its own event emitter
	pub fn new() -> Self {
		Self::with_events(EventEmitter::new())
	}

	pub fn with_events(events: EventEmitter) -> Self {
		Self {
			pools: BTreeMap::new(),
			events,
			closed: AtomicBool::new(false),
		}
	}

	/// Build sqlx pools for every configured role.
	///
	/// Connections are opened lazily, so no I/O happens here.
	pub fn connect(settings: &DatabaseSettings) -> PoolResult<Self> {
		settings.validate()?;

		let mut registry = Self::new();
		registry.register(PoolRole::Primary, settings.primary.clone())?;
		if let Some(replica) = &settings.replica {
			registry.register(PoolRole::Replica, replica.clone())?;
		}
		if let Some(analytics) = &settings.analytics {
			registry.register(PoolRole::Analytics, analytics.clone())?;
		}
		registry.ensure_primary()?;
		Ok(registry)
	}

	/// Create an sqlx pool for `role`
	pub fn register(&mut self, role: PoolRole, config: PoolEndpointConfig) -> PoolResult<()> {
		config
			.validate()
			.map_err(|reason| PoolError::Config(format!("{} pool: {}", role, reason)))?;
		let backend = SqlxPool::connect_lazy(role, &config, self.events.clone())?;
		self.register_backend(role, Arc::new(backend), config)
	}

	/// Register an already constructed pool for `role`
	pub fn register_backend(
		&mut self,
		role: PoolRole,
		backend: Arc<dyn PhysicalPool>,
		config: PoolEndpointConfig,
	) -> PoolResult<()> {
		if self.pools.contains_key(&role) {
			return Err(PoolError::Config(format!(
				"{} pool is already registered",
				role
			)));
		}
		info!(
			pool = %role,
			endpoint = %backend.describe(),
			max_connections = config.max_connections,
			"Registered connection pool"
		);
		self.pools.insert(
			role,
			RegisteredPool {
				role,
				backend,
				config,
				counters: Arc::new(AcquireCounters::default()),
			},
		);
		Ok(())
	}

	pub fn ensure_primary(&self) -> PoolResult<()> {
		if self.contains(PoolRole::Primary) {
			Ok(())
		} else {
			Err(PoolError::Config(
				"primary pool configuration is required".to_string(),
			))
		}
	}

	pub fn get(&self, role: PoolRole) -> PoolResult<&RegisteredPool> {
		self.pools.get(&role).ok_or(PoolError::NotConfigured(role))
	}

	pub fn contains(&self, role: PoolRole) -> bool {
		self.pools.contains_key(&role)
	}

	pub fn roles(&self) -> Vec<PoolRole> {
		self.pools.keys().copied().collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &RegisteredPool> {
		self.pools.values()
	}

	pub fn events(&self) -> &EventEmitter {
		&self.events
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Close every pool; later calls do nothing
	pub async fn close_all(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			debug!("Connection pools already closed");
			return;
		}
		for pool in self.pools.values() {
			pool.backend.close().await;
			debug!(pool = %pool.role, "Connection pool closed");
		}
		info!(pools = self.pools.len(), "All connection pools closed");
		self.events.emit(PoolEvent::pools_closed());
	}
}

impl Default for PoolRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::MockPool;
	use rstest::rstest;

	#[rstest]
	fn test_missing_primary_is_rejected() {
		// Arrange
		let mock = MockPool::new(2);
		let mut registry = PoolRegistry::new();
		registry
			.register_backend(PoolRole::Replica, Arc::new(mock.clone()), mock.endpoint_config())
			.unwrap();

		// Act
		let result = registry.ensure_primary();

		// Assert
		assert!(matches!(result, Err(PoolError::Config(_))));
	}

	#[rstest]
	fn test_get_unconfigured_role() {
		// Arrange
		let mock = MockPool::new(2);
		let registry = crate::testing::mock_registry(&[(PoolRole::Primary, mock)]).unwrap();

		// Act
		let result = registry.get(PoolRole::Analytics);

		// Assert
		assert!(matches!(
			result,
			Err(PoolError::NotConfigured(PoolRole::Analytics))
		));
		assert_eq!(registry.roles(), vec![PoolRole::Primary]);
	}

	#[rstest]
	fn test_duplicate_registration_is_rejected() {
		// Arrange
		let mock = MockPool::new(2);
		let mut registry = crate::testing::mock_registry(&[(PoolRole::Primary, mock.clone())]).unwrap();

		// Act
		let result =
			registry.register_backend(PoolRole::Primary, Arc::new(mock.clone()), mock.endpoint_config());

		// Assert
		assert!(matches!(result, Err(PoolError::Config(ref msg)) if msg.contains("already")));
	}

	#[rstest]
	#[tokio::test]
	async fn test_close_all_is_idempotent() {
		// Arrange
		let mock = MockPool::new(2);
		let registry = crate::testing::mock_registry(&[(PoolRole::Primary, mock.clone())]).unwrap();
		let mut events = registry.events().subscribe();

		// Act
		registry.close_all().await;
		registry.close_all().await;

		// Assert
		assert!(registry.is_closed());
		assert!(mock.is_closed());
		assert!(matches!(
			events.try_recv().unwrap(),
			PoolEvent::PoolsClosed { .. }
		));
		assert!(events.try_recv().is_err());
	}

	#[rstest]
	fn test_connect_rejects_invalid_settings() {
		// Arrange
		let settings = DatabaseSettings::new(
			PoolEndpointConfig::postgres("db", 5432, "", "app", ""),
		);

		// Act
		let result = PoolRegistry::connect(&settings);

		// Assert
		assert!(matches!(result, Err(PoolError::Config(_))));
	}

	#[rstest]
	#[tokio::test]
	async fn test_connect_is_lazy() {
		// Arrange
		let settings = DatabaseSettings::new(
			PoolEndpointConfig::postgres("127.0.0.1", 1, "portal", "app", "secret"),
		)
		.with_replica(PoolEndpointConfig::postgres("127.0.0.1", 2, "portal", "app", "secret"));

		// Act
		let registry = PoolRegistry::connect(&settings).unwrap();

		// Assert
		assert_eq!(registry.roles(), vec![PoolRole::Primary, PoolRole::Replica]);
		let stats = registry.get(PoolRole::Primary).unwrap().stats();
		assert_eq!(stats.total_connections, 0);
		assert_eq!(stats.max_connections, 20);
		assert!(!format!("{:?}", registry).contains("secret"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_stats_follow_checked_out_clients_not_driver_state() {
		// Arrange
		let mock = MockPool::new(2);
		let registry = crate::testing::mock_registry(&[(PoolRole::Primary, mock.clone())]).unwrap();
		let pool = registry.get(PoolRole::Primary).unwrap();
		let acquirer = crate::acquire::ClientAcquirer::new(registry.events().clone());
		let client = acquirer.acquire(pool, None).await.unwrap();
		// A session the driver still counts as busy, e.g. one whose return
		// to the idle queue has not run yet
		let lingering = mock.acquire().await.unwrap();

		// Act
		let during = pool.stats();
		client.release();
		let after = pool.stats();

		// Assert
		assert_eq!(during.active_connections, 1);
		assert_eq!(during.total_connections, 2);
		assert_eq!(after.active_connections, 0);
		assert_eq!(after.idle_connections, 2);
		assert_eq!(
			after.total_connections - after.idle_connections,
			after.active_connections
		);
		drop(lingering);
	}
}
