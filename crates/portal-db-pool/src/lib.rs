//! Role-aware database pool manager
//!
//! Coordinates a required `primary` pool and optional `replica` and
//! `analytics` pools behind one [`PoolManager`]:
//!
//! - **Routing**: [`QueryOptions`] flags pick the pool; missing optional
//!   pools fall back to the primary.
//! - **Retries**: single statements are retried with fixed or exponential
//!   backoff; transactions never are.
//! - **Bounded acquisition**: every wait for a connection can time out, and a
//!   checked-out client is returned exactly once.
//! - **Health**: a background task probes every pool and publishes a
//!   [`HealthReport`].
//! - **Metrics**: query, transaction and pool gauges in one consistent
//!   [`PoolMetricsSnapshot`].
//!
//! Physical pools are sqlx pools by default; anything implementing
//! [`PhysicalPool`] can be registered instead.

pub mod acquire;
pub mod backend;
pub mod error;
pub mod events;
pub mod executor;
pub mod global;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod options;
pub mod registry;
pub mod role;
pub mod testing;
pub mod transaction;
pub mod types;

pub use acquire::{AcquireCounters, ClientAcquirer, PooledClient};
pub use backend::{Connection, PhysicalPool, PhysicalPoolState, SqlxPool};
pub use error::{PoolError, PoolResult};
pub use events::{EventEmitter, PoolEvent, PoolEventListener};
pub use executor::{Backoff, QueryExecutor};
pub use health::{HealthMonitor, HealthReport, HealthStatus, PoolProbe};
pub use manager::{ManagerOptions, PoolManager};
pub use metrics::{MetricsCollector, PoolMetricsSnapshot, PoolStats};
pub use options::QueryOptions;
pub use registry::{PoolRegistry, RegisteredPool};
pub use role::PoolRole;
pub use transaction::TransactionCoordinator;
pub use types::{FieldDescriptor, QueryResult, QueryValue, Row};

/// Re-export commonly used types
pub mod prelude {
	pub use super::error::{PoolError, PoolResult};
	pub use super::events::{PoolEvent, PoolEventListener};
	pub use super::health::{HealthReport, HealthStatus};
	pub use super::manager::{ManagerOptions, PoolManager};
	pub use super::metrics::{PoolMetricsSnapshot, PoolStats};
	pub use super::options::QueryOptions;
	pub use super::role::PoolRole;
	pub use super::types::{QueryResult, QueryValue, Row};
}
