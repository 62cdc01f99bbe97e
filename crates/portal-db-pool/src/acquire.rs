//! Bounded connection acquisition
//!
//! [`ClientAcquirer`] hands out [`PooledClient`]s. A client goes back to its
//! pool exactly once: through [`PooledClient::release`],
//! [`PooledClient::invalidate`] or its `Drop`, whichever happens first.

use crate::backend::Connection;
use crate::error::{PoolError, PoolResult};
use crate::events::{EventEmitter, PoolEvent};
use crate::registry::RegisteredPool;
use crate::role::PoolRole;
use crate::types::{QueryResult, QueryValue};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-pool acquisition bookkeeping
#[derive(Debug, Default)]
pub struct AcquireCounters {
	waiting: AtomicU32,
	checked_out: AtomicU32,
	acquired_total: AtomicU64,
	released_total: AtomicU64,
	acquire_timeouts: AtomicU64,
}

impl AcquireCounters {
	pub fn waiting(&self) -> u32 {
		self.waiting.load(Ordering::SeqCst)
	}

	pub fn checked_out(&self) -> u32 {
		self.checked_out.load(Ordering::SeqCst)
	}

	pub fn acquired_total(&self) -> u64 {
		self.acquired_total.load(Ordering::SeqCst)
	}

	pub fn released_total(&self) -> u64 {
		self.released_total.load(Ordering::SeqCst)
	}

	pub fn acquire_timeouts(&self) -> u64 {
		self.acquire_timeouts.load(Ordering::SeqCst)
	}
}

/// Counts a caller as waiting until dropped, cancellation included
struct WaitingGuard<'a>(&'a AtomicU32);

impl<'a> WaitingGuard<'a> {
	fn enter(counter: &'a AtomicU32) -> Self {
		counter.fetch_add(1, Ordering::SeqCst);
		Self(counter)
	}
}

impl Drop for WaitingGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Obtains clients from registered pools
#[derive(Debug, Clone)]
pub struct ClientAcquirer {
	events: EventEmitter,
}

impl ClientAcquirer {
	pub fn new(events: EventEmitter) -> Self {
		Self { events }
	}

	/// Wait for a client from `pool`, giving up after `timeout`.
	///
	/// A timed-out wait leaves nothing checked out.
	pub async fn acquire(
		&self,
		pool: &RegisteredPool,
		timeout: Option<Duration>,
	) -> PoolResult<PooledClient> {
		let role = pool.role();
		if pool.backend().is_closed() {
			return Err(PoolError::PoolClosed);
		}

		let counters = pool.counters();
		let started = Instant::now();
		let outcome = {
			let _waiting = WaitingGuard::enter(&counters.waiting);
			match timeout {
				Some(limit) => match tokio::time::timeout(limit, pool.backend().acquire()).await {
					Ok(result) => result,
					Err(_) => {
						counters.acquire_timeouts.fetch_add(1, Ordering::SeqCst);
						Err(PoolError::AcquireTimeout {
							role,
							timeout: limit,
						})
					}
				},
				None => pool.backend().acquire().await,
			}
		};

		let conn = match outcome {
			Ok(conn) => conn,
			Err(err) => {
				warn!(pool = %role, error = %err, "Failed to acquire connection");
				self.events.emit(PoolEvent::pool_error(role, err.to_string()));
				return Err(err);
			}
		};

		let connection_id = Uuid::new_v4().to_string();
		counters.checked_out.fetch_add(1, Ordering::SeqCst);
		counters.acquired_total.fetch_add(1, Ordering::SeqCst);
		debug!(
			pool = %role,
			connection_id = %connection_id,
			wait_ms = started.elapsed().as_millis() as u64,
			"Connection acquired"
		);
		self.events
			.emit(PoolEvent::connection_acquired(role, connection_id.clone()));

		Ok(PooledClient {
			conn: Some(conn),
			role,
			connection_id,
			counters: counters.clone(),
			events: self.events.clone(),
			acquired_at: Instant::now(),
		})
	}
}

/// A checked-out connection.
///
/// Returned to its pool when released or dropped.
pub struct PooledClient {
	conn: Option<Box<dyn Connection>>,
	role: PoolRole,
	connection_id: String,
	counters: Arc<AcquireCounters>,
	events: EventEmitter,
	acquired_at: Instant,
}

impl PooledClient {
	pub fn role(&self) -> PoolRole {
		self.role
	}

	pub fn connection_id(&self) -> &str {
		&self.connection_id
	}

	/// Time since the client was handed out
	pub fn held_for(&self) -> Duration {
		self.acquired_at.elapsed()
	}

	/// Run one statement on this session
	pub async fn query(&mut self, sql: &str, params: &[QueryValue]) -> PoolResult<QueryResult> {
		self.connection()?.execute(sql, params).await
	}

	pub async fn set_statement_timeout(&mut self, timeout: Option<Duration>) -> PoolResult<()> {
		self.connection()?.set_statement_timeout(timeout).await
	}

	/// Return the session to its pool
	pub fn release(mut self) {
		self.finish();
	}

	/// Close the session instead of returning it
	pub async fn invalidate(mut self, reason: &str) {
		let Some(conn) = self.conn.take() else {
			return;
		};
		self.counters.checked_out.fetch_sub(1, Ordering::SeqCst);
		self.counters.released_total.fetch_add(1, Ordering::SeqCst);
		debug!(pool = %self.role, connection_id = %self.connection_id, reason, "Connection invalidated");
		self.events.emit(PoolEvent::connection_removed(
			self.role,
			self.connection_id.clone(),
			reason,
		));
		if let Err(err) = conn.close().await {
			warn!(pool = %self.role, error = %err, "Failed to close invalidated connection");
		}
	}

	fn connection(&mut self) -> PoolResult<&mut Box<dyn Connection>> {
		self.conn
			.as_mut()
			.ok_or_else(|| PoolError::backend("client already released"))
	}

	fn finish(&mut self) {
		if let Some(conn) = self.conn.take() {
			drop(conn);
			self.counters.checked_out.fetch_sub(1, Ordering::SeqCst);
			self.counters.released_total.fetch_add(1, Ordering::SeqCst);
			debug!(pool = %self.role, connection_id = %self.connection_id, "Connection released");
			self.events.emit(PoolEvent::connection_released(
				self.role,
				self.connection_id.clone(),
			));
		}
	}
}

impl Drop for PooledClient {
	fn drop(&mut self) {
		self.finish();
	}
}

impl fmt::Debug for PooledClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PooledClient")
			.field("role", &self.role)
			.field("connection_id", &self.connection_id)
			.field("released", &self.conn.is_none())
			.finish()
	}
}
