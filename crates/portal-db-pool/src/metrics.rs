//! Query, transaction and pool metrics
//!
//! ## Usage Examples
//!
//! ```
//! use portal_db_pool::metrics::MetricsCollector;
//! use std::time::Duration;
//!
//! let metrics = MetricsCollector::new();
//! metrics.record_query(Duration::from_millis(10), true);
//! metrics.record_query(Duration::from_millis(30), false);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.total_queries, 2);
//! assert_eq!(snapshot.failed_queries, 1);
//! assert_eq!(snapshot.average_latency_ms, 20.0);
//! ```

use crate::backend::PhysicalPoolState;
use crate::health::HealthStatus;
use crate::role::PoolRole;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Occupancy and throughput of one logical pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
	pub total_connections: u32,
	pub active_connections: u32,
	pub idle_connections: u32,
	/// Callers currently queued for a connection
	pub waiting_requests: u32,
	pub max_connections: u32,
	pub acquired_total: u64,
	pub released_total: u64,
	pub acquire_timeouts: u64,
}

impl PoolStats {
	/// Derive gauges from a physical sample and the number of clients
	/// currently checked out.
	///
	/// `active` is the logical checked-out count, which is exact the moment a
	/// client is released even when the driver returns the session to its
	/// idle queue later. The total never drops below `active`, so
	/// `total - idle == active` always holds.
	pub fn from_state(state: PhysicalPoolState, checked_out: u32, max_connections: u32) -> Self {
		let total = state.size.max(checked_out);
		Self {
			total_connections: total,
			active_connections: checked_out,
			idle_connections: total - checked_out,
			max_connections,
			..Self::default()
		}
	}

	/// Fraction of `max_connections` in use
	pub fn utilization(&self) -> f64 {
		if self.max_connections == 0 {
			return 0.0;
		}
		f64::from(self.active_connections) / f64::from(self.max_connections)
	}
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetricsSnapshot {
	pub pools: BTreeMap<PoolRole, PoolStats>,
	/// Attempts, successful or not
	pub total_queries: u64,
	pub successful_queries: u64,
	pub failed_queries: u64,
	/// Calls that failed on every allowed attempt
	pub exhausted_queries: u64,
	pub retried_attempts: u64,
	pub transactions_committed: u64,
	pub transactions_rolled_back: u64,
	pub average_latency_ms: f64,
	pub uptime: Duration,
	pub last_health_check: Option<DateTime<Utc>>,
	pub health_status: HealthStatus,
}

impl PoolMetricsSnapshot {
	/// Share of attempts that succeeded, 1.0 before any query
	pub fn success_rate(&self) -> f64 {
		if self.total_queries == 0 {
			return 1.0;
		}
		self.successful_queries as f64 / self.total_queries as f64
	}

	pub fn summary(&self) -> String {
		format!(
			"Queries: {} ({} ok, {} failed, {} exhausted), Retries: {}, Avg latency: {:.2}ms, Health: {}",
			self.total_queries,
			self.successful_queries,
			self.failed_queries,
			self.exhausted_queries,
			self.retried_attempts,
			self.average_latency_ms,
			self.health_status
		)
	}

	/// Render in the Prometheus text exposition format
	pub fn export_prometheus(&self) -> String {
		let mut out = String::new();
		let counters = [
			("portal_db_queries_total", "Query attempts", self.total_queries),
			("portal_db_queries_successful_total", "Successful query attempts", self.successful_queries),
			("portal_db_queries_failed_total", "Failed query attempts", self.failed_queries),
			("portal_db_queries_exhausted_total", "Queries that failed every attempt", self.exhausted_queries),
			("portal_db_query_retries_total", "Attempts after the first", self.retried_attempts),
			("portal_db_transactions_committed_total", "Committed transactions", self.transactions_committed),
			("portal_db_transactions_rolled_back_total", "Rolled back transactions", self.transactions_rolled_back),
		];
		for (name, help, value) in counters {
			let _ = writeln!(out, "# HELP {} {}\n# TYPE {} counter\n{} {}", name, help, name, name, value);
		}

		let _ = writeln!(
			out,
			"# HELP portal_db_query_latency_ms_avg Mean attempt latency\n\
			 # TYPE portal_db_query_latency_ms_avg gauge\n\
			 portal_db_query_latency_ms_avg {}",
			self.average_latency_ms
		);
		let _ = writeln!(
			out,
			"# HELP portal_db_healthy 1 when the primary pool passed its last probe\n\
			 # TYPE portal_db_healthy gauge\n\
			 portal_db_healthy {}",
			u8::from(self.health_status.is_operational())
		);

		let gauges: [(&str, fn(&PoolStats) -> u64); 5] = [
			("portal_db_pool_connections_total", |s| u64::from(s.total_connections)),
			("portal_db_pool_connections_active", |s| u64::from(s.active_connections)),
			("portal_db_pool_connections_idle", |s| u64::from(s.idle_connections)),
			("portal_db_pool_waiting_requests", |s| u64::from(s.waiting_requests)),
			("portal_db_pool_acquire_timeouts_total", |s| s.acquire_timeouts),
		];
		for (name, read) in gauges {
			let _ = writeln!(out, "# TYPE {} gauge", name);
			for (role, stats) in &self.pools {
				let _ = writeln!(out, "{}{{pool=\"{}\"}} {}", name, role, read(stats));
			}
		}
		out
	}

	pub fn export_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
	}
}

#[derive(Debug, Default)]
struct MetricsState {
	pools: BTreeMap<PoolRole, PoolStats>,
	total_queries: u64,
	successful_queries: u64,
	failed_queries: u64,
	exhausted_queries: u64,
	retried_attempts: u64,
	transactions_committed: u64,
	transactions_rolled_back: u64,
	average_latency_ms: f64,
	last_health_check: Option<DateTime<Utc>>,
	health_status: HealthStatus,
}

/// Thread-safe metrics store.
///
/// One mutex guards everything, so a snapshot never mixes values from
/// before and after a concurrent update.
#[derive(Debug)]
pub struct MetricsCollector {
	state: Mutex<MetricsState>,
	started_at: Mutex<Instant>,
}

impl MetricsCollector {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(MetricsState::default()),
			started_at: Mutex::new(Instant::now()),
		}
	}

	/// Record one attempt and fold its latency into the running mean
	pub fn record_query(&self, duration: Duration, success: bool) {
		let mut state = self.state.lock();
		state.total_queries += 1;
		if success {
			state.successful_queries += 1;
		} else {
			state.failed_queries += 1;
		}
		let n = state.total_queries as f64;
		let sample = duration.as_secs_f64() * 1000.0;
		state.average_latency_ms = (state.average_latency_ms * (n - 1.0) + sample) / n;
	}

	pub fn record_exhausted(&self) {
		self.state.lock().exhausted_queries += 1;
	}

	pub fn record_retry(&self) {
		self.state.lock().retried_attempts += 1;
	}

	pub fn record_transaction(&self, committed: bool) {
		let mut state = self.state.lock();
		if committed {
			state.transactions_committed += 1;
		} else {
			state.transactions_rolled_back += 1;
		}
	}

	pub fn sample_pool_state(&self, role: PoolRole, stats: PoolStats) {
		self.state.lock().pools.insert(role, stats);
	}

	pub fn record_health_check(&self, status: HealthStatus, checked_at: DateTime<Utc>) {
		let mut state = self.state.lock();
		state.health_status = status;
		state.last_health_check = Some(checked_at);
	}

	pub fn snapshot(&self) -> PoolMetricsSnapshot {
		let uptime = self.started_at.lock().elapsed();
		let state = self.state.lock();
		PoolMetricsSnapshot {
			pools: state.pools.clone(),
			total_queries: state.total_queries,
			successful_queries: state.successful_queries,
			failed_queries: state.failed_queries,
			exhausted_queries: state.exhausted_queries,
			retried_attempts: state.retried_attempts,
			transactions_committed: state.transactions_committed,
			transactions_rolled_back: state.transactions_rolled_back,
			average_latency_ms: state.average_latency_ms,
			uptime,
			last_health_check: state.last_health_check,
			health_status: state.health_status,
		}
	}

	/// Zero every counter and restart the uptime clock
	pub fn reset(&self) {
		*self.state.lock() = MetricsState::default();
		*self.started_at.lock() = Instant::now();
	}
}

impl Default for MetricsCollector {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::sync::Arc;

	#[rstest]
	fn test_rolling_average_equals_arithmetic_mean() {
		// Arrange
		let metrics = MetricsCollector::new();
		let samples = [12_u64, 7, 31, 2, 48, 5];

		// Act
		for ms in samples {
			metrics.record_query(Duration::from_millis(ms), true);
		}

		// Assert
		let expected = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
		let snapshot = metrics.snapshot();
		assert!((snapshot.average_latency_ms - expected).abs() < 1e-9);
		assert_eq!(snapshot.total_queries, samples.len() as u64);
	}

	#[rstest]
	#[case(PhysicalPoolState { size: 5, idle: 2 }, 3, 3, 2)]
	// Session released but not yet back in the driver's idle queue
	#[case(PhysicalPoolState { size: 1, idle: 0 }, 0, 0, 1)]
	#[case(PhysicalPoolState { size: 1, idle: 1 }, 2, 2, 0)]
	#[case(PhysicalPoolState { size: 0, idle: 0 }, 0, 0, 0)]
	fn test_pool_stats_active_is_total_minus_idle(
		#[case] state: PhysicalPoolState,
		#[case] checked_out: u32,
		#[case] active: u32,
		#[case] idle: u32,
	) {
		// Act
		let stats = PoolStats::from_state(state, checked_out, 10);

		// Assert
		assert_eq!(stats.active_connections, active);
		assert_eq!(stats.idle_connections, idle);
		assert_eq!(
			stats.total_connections - stats.idle_connections,
			stats.active_connections
		);
	}

	#[rstest]
	fn test_reset_clears_counters() {
		// Arrange
		let metrics = MetricsCollector::new();
		metrics.record_query(Duration::from_millis(5), false);
		metrics.record_retry();
		metrics.record_transaction(true);

		// Act
		metrics.reset();

		// Assert
		let snapshot = metrics.snapshot();
		assert_eq!(snapshot.total_queries, 0);
		assert_eq!(snapshot.retried_attempts, 0);
		assert_eq!(snapshot.transactions_committed, 0);
		assert_eq!(snapshot.average_latency_ms, 0.0);
	}

	#[rstest]
	fn test_concurrent_updates_are_not_lost() {
		// Arrange
		let metrics = Arc::new(MetricsCollector::new());

		// Act
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let metrics = metrics.clone();
				std::thread::spawn(move || {
					for _ in 0..250 {
						metrics.record_query(Duration::from_millis(1), true);
					}
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}

		// Assert
		let snapshot = metrics.snapshot();
		assert_eq!(snapshot.total_queries, 2000);
		assert_eq!(snapshot.successful_queries, 2000);
	}

	#[rstest]
	fn test_prometheus_export() {
		// Arrange
		let metrics = MetricsCollector::new();
		metrics.record_query(Duration::from_millis(4), true);
		metrics.sample_pool_state(
			PoolRole::Primary,
			PoolStats::from_state(PhysicalPoolState { size: 3, idle: 1 }, 2, 10),
		);

		// Act
		let text = metrics.snapshot().export_prometheus();

		// Assert
		assert!(text.contains("portal_db_queries_total 1"));
		assert!(text.contains("portal_db_pool_connections_active{pool=\"primary\"} 2"));
		assert!(text.contains("# TYPE portal_db_queries_failed_total counter"));
	}

	#[rstest]
	fn test_success_rate_before_any_query() {
		// Act & Assert
		assert_eq!(MetricsCollector::new().snapshot().success_rate(), 1.0);
	}
}
