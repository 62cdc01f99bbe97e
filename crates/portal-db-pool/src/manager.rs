//! The pool manager facade
//!
//! ## Usage Examples
//!
//! ```no_run
//! use portal_db_pool::{PoolManager, QueryOptions, QueryValue};
//! use portal_db_conf::{DatabaseSettings, Env};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::from_env(&Env::new())?;
//! let manager = PoolManager::connect(&settings)?;
//!
//! let users = manager
//!     .query(
//!         "SELECT id, name FROM users WHERE active = $1",
//!         &[QueryValue::Bool(true)],
//!         QueryOptions::new().prefer_replica(),
//!     )
//!     .await?;
//! println!("{} active users", users.row_count);
//!
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

use crate::acquire::{ClientAcquirer, PooledClient};
use crate::error::{PoolError, PoolResult};
use crate::events::{EventEmitter, PoolEvent, PoolEventListener};
use crate::executor::QueryExecutor;
use crate::health::{HealthMonitor, HealthReport, HealthStatus};
use crate::metrics::{MetricsCollector, PoolMetricsSnapshot, PoolStats};
use crate::options::QueryOptions;
use crate::registry::PoolRegistry;
use crate::role::PoolRole;
use crate::transaction::TransactionCoordinator;
use crate::types::{QueryResult, QueryValue};
use futures::future::BoxFuture;
use portal_db_conf::{DEFAULT_HEALTH_CHECK_INTERVAL, DatabaseSettings, RetrySettings};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Runtime policies of a manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
	pub retry: RetrySettings,
	/// Zero disables the background health check
	pub health_check_interval: Duration,
}

impl Default for ManagerOptions {
	fn default() -> Self {
		Self {
			retry: RetrySettings::default(),
			health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
		}
	}
}

impl ManagerOptions {
	pub fn with_retry(mut self, retry: RetrySettings) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
		self.health_check_interval = interval;
		self
	}
}

impl From<&DatabaseSettings> for ManagerOptions {
	fn from(settings: &DatabaseSettings) -> Self {
		Self {
			retry: settings.retry.clone(),
			health_check_interval: settings.health_check_interval,
		}
	}
}

struct ManagerInner {
	registry: Arc<PoolRegistry>,
	acquirer: ClientAcquirer,
	executor: QueryExecutor,
	transactions: TransactionCoordinator,
	health: Arc<HealthMonitor>,
	metrics: Arc<MetricsCollector>,
	events: EventEmitter,
	closed: AtomicBool,
}

/// Entry point for queries, transactions, health and metrics.
///
/// Cloning is cheap; clones share the same pools.
#[derive(Clone)]
pub struct PoolManager {
	inner: Arc<ManagerInner>,
}

impl PoolManager {
	/// Build sqlx pools from `settings`.
	///
	/// No connection is opened here. When a health check interval is set,
	/// the first probe runs right away in the background, which requires a
	/// Tokio runtime.
	pub fn connect(settings: &DatabaseSettings) -> PoolResult<Self> {
		let registry = PoolRegistry::connect(settings)?;
		Self::with_registry(registry, ManagerOptions::from(settings))
	}

	/// Build a manager over an already populated registry
	pub fn with_registry(registry: PoolRegistry, options: ManagerOptions) -> PoolResult<Self> {
		registry.ensure_primary()?;

		let registry = Arc::new(registry);
		let events = registry.events().clone();
		let metrics = Arc::new(MetricsCollector::new());
		let acquirer = ClientAcquirer::new(events.clone());
		let executor = QueryExecutor::new(acquirer.clone(), metrics.clone(), &options.retry);
		let transactions = TransactionCoordinator::new(acquirer.clone(), metrics.clone());
		let health = HealthMonitor::new(registry.clone(), acquirer.clone(), metrics.clone());

		if !options.health_check_interval.is_zero() {
			if tokio::runtime::Handle::try_current().is_ok() {
				health.start(options.health_check_interval);
			} else {
				warn!("No Tokio runtime available, background health checks are disabled");
			}
		}

		info!(
			pools = ?registry.roles(),
			max_retries = options.retry.max_retries,
			"Database pool manager initialized"
		);

		Ok(Self {
			inner: Arc::new(ManagerInner {
				registry,
				acquirer,
				executor,
				transactions,
				health,
				metrics,
				events,
				closed: AtomicBool::new(false),
			}),
		})
	}

	/// Pool a call with `options` would be routed to
	pub fn resolve(&self, options: &QueryOptions) -> PoolRole {
		PoolRole::select(options, |role| self.inner.registry.contains(role))
	}

	/// Execute one statement with retries on the selected pool
	pub async fn query(
		&self,
		sql: &str,
		params: &[QueryValue],
		options: QueryOptions,
	) -> PoolResult<QueryResult> {
		let role = self.resolve(&options);
		self.query_with_pool(role, sql, params, options).await
	}

	/// Execute one statement on an explicit pool, bypassing selection
	pub async fn query_with_pool(
		&self,
		role: PoolRole,
		sql: &str,
		params: &[QueryValue],
		options: QueryOptions,
	) -> PoolResult<QueryResult> {
		self.ensure_open()?;
		let pool = self.inner.registry.get(role)?;
		self.inner.executor.execute(pool, sql, params, &options).await
	}

	/// Run `f` inside a transaction on the selected pool.
	///
	/// # Examples
	///
	/// ```no_run
	/// use portal_db_pool::{PoolError, PoolManager, QueryOptions, QueryValue};
	///
	/// # async fn example(manager: PoolManager) -> Result<(), PoolError> {
	/// let moved = manager
	///     .transaction(QueryOptions::new(), |client| {
	///         Box::pin(async move {
	///             client
	///                 .query("UPDATE accounts SET balance = balance - $1 WHERE id = 1", &[QueryValue::Int(10)])
	///                 .await?;
	///             let credit = client
	///                 .query("UPDATE accounts SET balance = balance + $1 WHERE id = 2", &[QueryValue::Int(10)])
	///                 .await?;
	///             Ok::<_, PoolError>(credit.row_count)
	///         })
	///     })
	///     .await?;
	/// assert_eq!(moved, 1);
	/// # Ok(())
	/// # }
	/// ```
	pub async fn transaction<F, T, E>(&self, options: QueryOptions, f: F) -> Result<T, E>
	where
		F: for<'c> FnOnce(&'c mut PooledClient) -> BoxFuture<'c, Result<T, E>> + Send,
		T: Send,
		E: From<PoolError> + Send,
	{
		self.ensure_open()?;
		let role = self.resolve(&options);
		let pool = self.inner.registry.get(role)?;
		self.inner.transactions.run(pool, options.timeout, f).await
	}

	/// Check out a client the caller returns by dropping or releasing it
	pub async fn get_client(&self, options: QueryOptions) -> PoolResult<PooledClient> {
		self.ensure_open()?;
		let role = self.resolve(&options);
		let pool = self.inner.registry.get(role)?;
		let timeout = options.timeout.unwrap_or(pool.config().connect_timeout);
		self.inner.acquirer.acquire(pool, Some(timeout)).await
	}

	/// Metrics with freshly sampled pool gauges
	pub fn metrics(&self) -> PoolMetricsSnapshot {
		for pool in self.inner.registry.iter() {
			self.inner.metrics.sample_pool_state(pool.role(), pool.stats());
		}
		self.inner.metrics.snapshot()
	}

	pub fn reset_metrics(&self) {
		self.inner.metrics.reset();
	}

	pub fn pool_stats(&self) -> BTreeMap<PoolRole, PoolStats> {
		self.inner
			.registry
			.iter()
			.map(|pool| (pool.role(), pool.stats()))
			.collect()
	}

	/// Probe every pool now; `true` unless the primary failed
	pub async fn perform_health_check(&self) -> bool {
		if self.is_closed() {
			return false;
		}
		self.inner.health.check_all().await.status.is_operational()
	}

	/// Result of the most recent check; `false` before the first one
	pub fn is_healthy(&self) -> bool {
		self.inner.health.status().is_operational()
	}

	pub fn health_status(&self) -> HealthStatus {
		self.inner.health.status()
	}

	pub fn health_report(&self) -> HealthReport {
		self.inner.health.report()
	}

	pub fn subscribe_health(&self) -> watch::Receiver<HealthReport> {
		self.inner.health.subscribe()
	}

	pub fn add_listener(&self, listener: Arc<dyn PoolEventListener>) {
		self.inner.events.add_listener(listener);
	}

	pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
		self.inner.events.subscribe()
	}

	pub fn roles(&self) -> Vec<PoolRole> {
		self.inner.registry.roles()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Stop health checks and close every pool.
	///
	/// Calling it again does nothing.
	pub async fn close(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			debug!("Pool manager already closed");
			return;
		}
		self.inner.health.stop();
		self.inner.registry.close_all().await;
		info!("Database pool manager closed");
	}

	fn ensure_open(&self) -> PoolResult<()> {
		if self.is_closed() {
			Err(PoolError::PoolClosed)
		} else {
			Ok(())
		}
	}
}

impl fmt::Debug for PoolManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PoolManager")
			.field("pools", &self.inner.registry.roles())
			.field("health", &self.inner.health.status())
			.field("closed", &self.is_closed())
			.finish()
	}
}
