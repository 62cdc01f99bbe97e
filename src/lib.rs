//! # Portal DB
//!
//! Database connection pool manager for services that split traffic between a
//! read-write primary, an optional read replica and an optional analytics
//! warehouse.
//!
//! ## Core Principles
//!
//! - **Primary first**: only the primary pool is required; missing optional
//!   pools silently fall back to it
//! - **Bounded waits**: every acquisition can time out and every checked-out
//!   client is returned exactly once
//! - **Observable**: health reports, lifecycle events and metrics snapshots
//!
//! ## Quick Example
//!
//! ```no_run
//! use portal_db::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::from_env(&Env::new())?;
//! let manager = PoolManager::connect(&settings)?;
//!
//! let report = manager
//!     .query(
//!         "SELECT count(*) AS n FROM orders",
//!         &[],
//!         QueryOptions::new().prefer_analytics(),
//!     )
//!     .await?;
//! let orders: i64 = report.first().map(|row| row.get("n")).transpose()?.unwrap_or(0);
//! println!("{} orders, health: {}", orders, manager.health_status());
//!
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

pub use portal_db_conf as conf;
pub use portal_db_pool as pool;

pub use portal_db_conf::{DatabaseSettings, Env, PoolEndpointConfig, RetrySettings};
pub use portal_db_pool::{
	HealthReport, HealthStatus, ManagerOptions, PoolError, PoolEvent, PoolManager,
	PoolMetricsSnapshot, PoolResult, PoolRole, PoolStats, QueryOptions, QueryResult, QueryValue,
	Row, global,
};

/// Re-export commonly used types
pub mod prelude {
	pub use portal_db_conf::prelude::*;
	pub use portal_db_pool::prelude::*;
}
