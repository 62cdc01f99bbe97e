//! Physical pool abstraction
//!
//! The manager talks to connection pools through [`PhysicalPool`] and
//! [`Connection`]. [`SqlxPool`] is the production implementation;
//! [`crate::testing::MockPool`] is a scripted in-memory one.

pub mod sqlx_pool;

pub use sqlx_pool::SqlxPool;

use crate::error::PoolResult;
use crate::types::{QueryResult, QueryValue};
use async_trait::async_trait;
use std::time::Duration;

/// Occupancy of a physical pool at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicalPoolState {
	/// Open connections, idle or checked out
	pub size: u32,
	pub idle: u32,
}

/// A checked-out session.
///
/// Dropping the box returns the session to its pool.
#[async_trait]
pub trait Connection: Send {
	async fn execute(&mut self, sql: &str, params: &[QueryValue]) -> PoolResult<QueryResult>;

	/// Bound every following statement on this session
	async fn set_statement_timeout(&mut self, timeout: Option<Duration>) -> PoolResult<()>;

	/// Close the session instead of returning it
	async fn close(self: Box<Self>) -> PoolResult<()>;
}

/// A bounded set of sessions against one endpoint
#[async_trait]
pub trait PhysicalPool: Send + Sync + 'static {
	/// Wait for a session.
	///
	/// Must be cancel-safe: dropping the future must not leak a session.
	async fn acquire(&self) -> PoolResult<Box<dyn Connection>>;

	fn state(&self) -> PhysicalPoolState;

	/// Close idle sessions and reject further acquisitions
	async fn close(&self);

	fn is_closed(&self) -> bool;

	/// Endpoint description safe for logs
	fn describe(&self) -> String;
}
