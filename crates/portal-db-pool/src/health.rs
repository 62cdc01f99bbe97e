//! Periodic pool health probing
//!
//! Each check acquires a client from every configured pool, runs `SELECT 1`
//! and aggregates the outcomes. Failures are reported through the status,
//! events and logs; a health check never returns an error.

use crate::acquire::ClientAcquirer;
use crate::error::PoolError;
use crate::events::{EventEmitter, PoolEvent};
use crate::metrics::MetricsCollector;
use crate::registry::{PoolRegistry, RegisteredPool};
use crate::role::PoolRole;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Upper bound for the probe statement itself
const PROBE_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregate health of all pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
	/// No check has completed yet
	#[default]
	Unknown,
	Healthy,
	/// The primary is fine but an optional pool failed
	Degraded,
	/// The primary failed
	Unhealthy,
}

impl HealthStatus {
	/// Whether queries against the primary are expected to work
	pub fn is_operational(&self) -> bool {
		matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
	}

	/// Combine per-pool probe outcomes
	pub fn aggregate<'a>(probes: impl IntoIterator<Item = (&'a PoolRole, &'a PoolProbe)>) -> Self {
		let mut status = HealthStatus::Healthy;
		for (role, probe) in probes {
			if probe.healthy {
				continue;
			}
			if role.is_required() {
				return HealthStatus::Unhealthy;
			}
			status = HealthStatus::Degraded;
		}
		status
	}
}

impl fmt::Display for HealthStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			HealthStatus::Unknown => "unknown",
			HealthStatus::Healthy => "healthy",
			HealthStatus::Degraded => "degraded",
			HealthStatus::Unhealthy => "unhealthy",
		};
		f.write_str(name)
	}
}

/// Outcome of probing one pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolProbe {
	pub healthy: bool,
	pub latency_ms: f64,
	pub error: Option<String>,
}

/// Result of the latest health check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
	pub status: HealthStatus,
	pub pools: BTreeMap<PoolRole, PoolProbe>,
	pub checked_at: Option<DateTime<Utc>>,
}

impl HealthReport {
	fn initial() -> Self {
		Self {
			status: HealthStatus::Unknown,
			pools: BTreeMap::new(),
			checked_at: None,
		}
	}
}

/// Probes every pool, on demand or on an interval
pub struct HealthMonitor {
	registry: Arc<PoolRegistry>,
	acquirer: ClientAcquirer,
	metrics: Arc<MetricsCollector>,
	events: EventEmitter,
	report: watch::Sender<HealthReport>,
	task: Mutex<Option<AbortHandle>>,
}

impl HealthMonitor {
	pub fn new(
		registry: Arc<PoolRegistry>,
		acquirer: ClientAcquirer,
		metrics: Arc<MetricsCollector>,
	) -> Arc<Self> {
		let events = registry.events().clone();
		let (report, _) = watch::channel(HealthReport::initial());
		Arc::new(Self {
			registry,
			acquirer,
			metrics,
			events,
			report,
			task: Mutex::new(None),
		})
	}

	/// Probe every pool once and publish the result
	pub async fn check_all(&self) -> HealthReport {
		let probes = futures::future::join_all(
			self.registry
				.iter()
				.map(|pool| async move { (pool.role(), self.probe(pool).await) }),
		)
		.await;
		let pools: BTreeMap<_, _> = probes.into_iter().collect();
		let status = HealthStatus::aggregate(&pools);
		let checked_at = Utc::now();

		for pool in self.registry.iter() {
			self.metrics.sample_pool_state(pool.role(), pool.stats());
		}
		self.metrics.record_health_check(status, checked_at);

		let report = HealthReport {
			status,
			pools,
			checked_at: Some(checked_at),
		};
		let previous = self.report.send_replace(report.clone()).status;

		self.events.emit(PoolEvent::health_check_completed(status));
		if previous != status {
			match status {
				HealthStatus::Healthy => info!(%previous, current = %status, "Database health changed"),
				_ => warn!(%previous, current = %status, "Database health changed"),
			}
			self.events
				.emit(PoolEvent::health_status_changed(previous, status));
		} else {
			debug!(%status, "Health check completed");
		}
		report
	}

	async fn probe(&self, pool: &RegisteredPool) -> PoolProbe {
		let role = pool.role();
		let started = Instant::now();
		let result = self.run_probe(pool).await;
		let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

		match result {
			Ok(()) => PoolProbe {
				healthy: true,
				latency_ms,
				error: None,
			},
			Err(err) => {
				let message = err.to_string();
				warn!(pool = %role, error = %message, "Health check failed");
				self.events
					.emit(PoolEvent::health_check_failed(role, message.clone()));
				PoolProbe {
					healthy: false,
					latency_ms,
					error: Some(message),
				}
			}
		}
	}

	async fn run_probe(&self, pool: &RegisteredPool) -> Result<(), PoolError> {
		let role = pool.role();
		let mut client = self
			.acquirer
			.acquire(pool, Some(pool.config().connect_timeout))
			.await?;

		match tokio::time::timeout(PROBE_QUERY_TIMEOUT, client.query("SELECT 1", &[])).await {
			Ok(Ok(_)) => {
				client.release();
				Ok(())
			}
			Ok(Err(err)) => {
				if err.is_connection_error() {
					client.invalidate(&err.to_string()).await;
				} else {
					client.release();
				}
				Err(err)
			}
			Err(_) => {
				client.invalidate("health probe timed out").await;
				Err(PoolError::HealthCheck {
					role,
					message: format!("probe did not finish within {:?}", PROBE_QUERY_TIMEOUT),
				})
			}
		}
	}

	/// Run `check_all` every `interval`, starting now.
	///
	/// Replaces a running loop. A zero interval only stops the current one.
	pub fn start(self: &Arc<Self>, interval: Duration) {
		let mut task = self.task.lock();
		if let Some(existing) = task.take() {
			existing.abort();
		}
		if interval.is_zero() {
			debug!("Health check loop disabled");
			return;
		}

		let monitor: Weak<Self> = Arc::downgrade(self);
		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let Some(monitor) = monitor.upgrade() else {
					break;
				};
				monitor.check_all().await;
			}
		})
		.abort_handle();

		info!(interval_ms = interval.as_millis() as u64, "Health check loop started");
		*task = Some(handle);
	}

	pub fn stop(&self) {
		if let Some(handle) = self.task.lock().take() {
			handle.abort();
			debug!("Health check loop stopped");
		}
	}

	pub fn is_running(&self) -> bool {
		self.task.lock().as_ref().is_some_and(|h| !h.is_finished())
	}

	pub fn status(&self) -> HealthStatus {
		self.report.borrow().status
	}

	pub fn report(&self) -> HealthReport {
		self.report.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<HealthReport> {
		self.report.subscribe()
	}
}

impl Drop for HealthMonitor {
	fn drop(&mut self) {
		self.stop();
	}
}

impl fmt::Debug for HealthMonitor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HealthMonitor")
			.field("status", &self.status())
			.field("running", &self.is_running())
			.finish()
	}
}
