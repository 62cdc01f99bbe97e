//! In-memory backend for exercising the manager without a database.
//!
//! [`MockPool`] bounds sessions with a semaphore the way a real pool does
//! and lets tests script failures, latency and outages.

use crate::backend::{Connection, PhysicalPool, PhysicalPoolState};
use crate::error::{PoolError, PoolResult};
use crate::registry::PoolRegistry;
use crate::role::PoolRole;
use crate::types::{FieldDescriptor, QueryResult, QueryValue, Row};
use async_trait::async_trait;
use parking_lot::Mutex;
use portal_db_conf::PoolEndpointConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Scripted in-memory pool; clones share state
#[derive(Clone)]
pub struct MockPool {
	state: Arc<MockState>,
}

struct MockState {
	max_connections: u32,
	permits: Arc<Semaphore>,
	size: AtomicU32,
	idle: AtomicU32,
	opened: AtomicU64,
	discarded: AtomicU64,
	closed: AtomicBool,
	unreachable: AtomicBool,
	pending_failures: AtomicU32,
	connection_loss: AtomicBool,
	failing_pattern: Mutex<Option<String>>,
	latency: Mutex<Option<Duration>>,
	statements: Mutex<Vec<String>>,
	statement_timeouts: Mutex<Vec<Option<Duration>>>,
}

impl MockPool {
	pub fn new(max_connections: u32) -> Self {
		Self {
			state: Arc::new(MockState {
				max_connections,
				permits: Arc::new(Semaphore::new(max_connections as usize)),
				size: AtomicU32::new(0),
				idle: AtomicU32::new(0),
				opened: AtomicU64::new(0),
				discarded: AtomicU64::new(0),
				closed: AtomicBool::new(false),
				unreachable: AtomicBool::new(false),
				pending_failures: AtomicU32::new(0),
				connection_loss: AtomicBool::new(false),
				failing_pattern: Mutex::new(None),
				latency: Mutex::new(None),
				statements: Mutex::new(Vec::new()),
				statement_timeouts: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Endpoint settings matching this pool, without a statement timeout
	pub fn endpoint_config(&self) -> PoolEndpointConfig {
		PoolEndpointConfig::from_url("mock://memory")
			.with_max_connections(self.state.max_connections)
			.with_statement_timeout(None)
	}

	/// Fail the next `count` statements with a query-level error
	pub fn fail_next(&self, count: u32) {
		self.state.connection_loss.store(false, Ordering::SeqCst);
		self.state.pending_failures.store(count, Ordering::SeqCst);
	}

	/// Fail the next `count` statements as if the session dropped
	pub fn fail_next_with_connection_loss(&self, count: u32) {
		self.state.connection_loss.store(true, Ordering::SeqCst);
		self.state.pending_failures.store(count, Ordering::SeqCst);
	}

	/// Fail every statement containing `pattern` until cleared with `None`
	pub fn fail_statements_containing(&self, pattern: Option<&str>) {
		*self.state.failing_pattern.lock() = pattern.map(str::to_string);
	}

	/// Reject every acquisition as if the server were down
	pub fn set_unreachable(&self, unreachable: bool) {
		self.state.unreachable.store(unreachable, Ordering::SeqCst);
	}

	/// Delay every statement
	pub fn set_latency(&self, latency: Option<Duration>) {
		*self.state.latency.lock() = latency;
	}

	/// Statements executed so far, failed ones included
	pub fn statements(&self) -> Vec<String> {
		self.state.statements.lock().clone()
	}

	pub fn statement_timeouts(&self) -> Vec<Option<Duration>> {
		self.state.statement_timeouts.lock().clone()
	}

	pub fn opened_connections(&self) -> u64 {
		self.state.opened.load(Ordering::SeqCst)
	}

	/// Sessions closed instead of returned
	pub fn discarded_connections(&self) -> u64 {
		self.state.discarded.load(Ordering::SeqCst)
	}

	/// Sessions currently checked out
	pub fn checked_out(&self) -> u32 {
		let state = self.state();
		state.size - state.idle
	}

	fn take_scripted_failure(&self, sql: &str) -> Option<PoolError> {
		let scripted = self
			.state
			.pending_failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if scripted {
			return Some(PoolError::Backend {
				message: "scripted failure".to_string(),
				connection_lost: self.state.connection_loss.load(Ordering::SeqCst),
			});
		}

		let pattern = self.state.failing_pattern.lock();
		match pattern.as_deref() {
			Some(p) if sql.contains(p) => Some(PoolError::Backend {
				message: format!("statement matching '{}' rejected", p),
				connection_lost: false,
			}),
			_ => None,
		}
	}
}

#[async_trait]
impl PhysicalPool for MockPool {
	async fn acquire(&self) -> PoolResult<Box<dyn Connection>> {
		if self.state.closed.load(Ordering::SeqCst) {
			return Err(PoolError::PoolClosed);
		}
		if self.state.unreachable.load(Ordering::SeqCst) {
			return Err(PoolError::Backend {
				message: "connection refused".to_string(),
				connection_lost: true,
			});
		}

		let permit = self
			.state
			.permits
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| PoolError::PoolClosed)?;

		let reused = self
			.state
			.idle
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if !reused {
			self.state.size.fetch_add(1, Ordering::SeqCst);
			self.state.opened.fetch_add(1, Ordering::SeqCst);
		}

		Ok(Box::new(MockConnection {
			pool: self.clone(),
			_permit: permit,
			discarded: false,
		}))
	}

	fn state(&self) -> PhysicalPoolState {
		PhysicalPoolState {
			size: self.state.size.load(Ordering::SeqCst),
			idle: self.state.idle.load(Ordering::SeqCst),
		}
	}

	async fn close(&self) {
		self.state.closed.store(true, Ordering::SeqCst);
		self.state.permits.close();
		let idle = self.state.idle.swap(0, Ordering::SeqCst);
		self.state.size.fetch_sub(idle, Ordering::SeqCst);
	}

	fn is_closed(&self) -> bool {
		self.state.closed.load(Ordering::SeqCst)
	}

	fn describe(&self) -> String {
		"mock://memory".to_string()
	}
}

struct MockConnection {
	pool: MockPool,
	_permit: OwnedSemaphorePermit,
	discarded: bool,
}

#[async_trait]
impl Connection for MockConnection {
	async fn execute(&mut self, sql: &str, _params: &[QueryValue]) -> PoolResult<QueryResult> {
		self.pool.state.statements.lock().push(sql.to_string());

		let latency = *self.pool.state.latency.lock();
		if let Some(latency) = latency {
			tokio::time::sleep(latency).await;
		}

		if let Some(err) = self.pool.take_scripted_failure(sql) {
			return Err(err);
		}

		Ok(canned_result(sql))
	}

	async fn set_statement_timeout(&mut self, timeout: Option<Duration>) -> PoolResult<()> {
		self.pool.state.statement_timeouts.lock().push(timeout);
		Ok(())
	}

	async fn close(mut self: Box<Self>) -> PoolResult<()> {
		self.discarded = true;
		self.pool.state.size.fetch_sub(1, Ordering::SeqCst);
		self.pool.state.discarded.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

impl Drop for MockConnection {
	fn drop(&mut self) {
		if self.discarded {
			return;
		}
		if self.pool.state.closed.load(Ordering::SeqCst) {
			self.pool.state.size.fetch_sub(1, Ordering::SeqCst);
		} else {
			self.pool.state.idle.fetch_add(1, Ordering::SeqCst);
		}
	}
}

/// `SELECT <integer>` echoes the integer; anything else affects no rows
fn canned_result(sql: &str) -> QueryResult {
	let trimmed = sql.trim().trim_end_matches(';');
	let literal = trimmed
		.strip_prefix("SELECT ")
		.or_else(|| trimmed.strip_prefix("select "))
		.and_then(|rest| rest.trim().parse::<i64>().ok());

	match literal {
		Some(value) => {
			let mut row = Row::new();
			row.insert("?column?", value);
			QueryResult::with_rows(
				sql,
				vec![row],
				vec![FieldDescriptor {
					name: "?column?".to_string(),
					type_name: "INT8".to_string(),
				}],
			)
		}
		None => QueryResult::affected(sql, 0),
	}
}

/// Registry whose pools are the given mocks
pub fn mock_registry(pools: &[(PoolRole, MockPool)]) -> PoolResult<PoolRegistry> {
	let mut registry = PoolRegistry::new();
	for (role, pool) in pools {
		registry.register_backend(*role, Arc::new(pool.clone()), pool.endpoint_config())?;
	}
	Ok(registry)
}
