//! Transactions around a caller-supplied callback

use crate::acquire::{ClientAcquirer, PooledClient};
use crate::error::PoolError;
use crate::metrics::MetricsCollector;
use crate::registry::RegisteredPool;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Wraps a callback in `BEGIN` / `COMMIT` / `ROLLBACK`.
///
/// Transactions are never retried; the callback may have side effects.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
	acquirer: ClientAcquirer,
	metrics: Arc<MetricsCollector>,
}

impl TransactionCoordinator {
	pub fn new(acquirer: ClientAcquirer, metrics: Arc<MetricsCollector>) -> Self {
		Self { acquirer, metrics }
	}

	/// Run `f` inside a transaction on one client from `pool`.
	///
	/// Commits when `f` returns `Ok`. Rolls back when it returns `Err` or
	/// panics; the error is returned and the panic resumed unchanged. The
	/// client goes back to the pool after commit or rollback has finished.
	pub async fn run<F, T, E>(
		&self,
		pool: &RegisteredPool,
		timeout: Option<Duration>,
		f: F,
	) -> Result<T, E>
	where
		F: for<'c> FnOnce(&'c mut PooledClient) -> BoxFuture<'c, Result<T, E>> + Send,
		T: Send,
		E: From<PoolError> + Send,
	{
		let timeout = timeout.unwrap_or(pool.config().connect_timeout);
		let mut client = self.acquirer.acquire(pool, Some(timeout)).await?;
		if let Err(err) = client.query("BEGIN", &[]).await {
			Self::discard_if_broken(client, &err).await;
			return Err(err.into());
		}
		debug!(pool = %pool.role(), connection_id = client.connection_id(), "Transaction started");

		let outcome = AssertUnwindSafe(f(&mut client)).catch_unwind().await;

		match outcome {
			Ok(Ok(value)) => match client.query("COMMIT", &[]).await {
				Ok(_) => {
					self.metrics.record_transaction(true);
					debug!(pool = %pool.role(), "Transaction committed");
					client.release();
					Ok(value)
				}
				Err(err) => {
					error!(pool = %pool.role(), error = %err, "Commit failed");
					self.metrics.record_transaction(false);
					// The session state is unknown after a failed COMMIT
					client.invalidate("commit failed").await;
					Err(err.into())
				}
			},
			Ok(Err(err)) => {
				self.rollback(client).await;
				Err(err)
			}
			Err(panic) => {
				self.rollback(client).await;
				std::panic::resume_unwind(panic)
			}
		}
	}

	/// Roll back and return the client; a failed rollback discards it
	async fn rollback(&self, mut client: PooledClient) {
		self.metrics.record_transaction(false);
		match client.query("ROLLBACK", &[]).await {
			Ok(_) => {
				debug!(pool = %client.role(), "Transaction rolled back");
				client.release();
			}
			Err(err) => {
				error!(pool = %client.role(), error = %err, "Rollback failed");
				client.invalidate("rollback failed").await;
			}
		}
	}

	async fn discard_if_broken(client: PooledClient, err: &PoolError) {
		if err.is_connection_error() {
			client.invalidate(&err.to_string()).await;
		} else {
			client.release();
		}
	}
}
