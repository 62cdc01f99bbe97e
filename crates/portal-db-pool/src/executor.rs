//! Single-statement execution with bounded retries

use crate::acquire::ClientAcquirer;
use crate::error::{PoolError, PoolResult};
use crate::metrics::MetricsCollector;
use crate::options::QueryOptions;
use crate::registry::RegisteredPool;
use crate::types::{QueryResult, QueryValue};
use portal_db_conf::{BackoffKind, RetrySettings};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Delay before the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
	Fixed(Duration),
	/// `base * 2^(attempt - 1)`, never more than `max`
	Exponential { base: Duration, max: Duration },
}

impl Backoff {
	/// Delay after failed attempt number `attempt` (1-based)
	pub fn delay_for(&self, attempt: u32) -> Duration {
		match *self {
			Backoff::Fixed(delay) => delay,
			Backoff::Exponential { base, max } => {
				let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
				base.checked_mul(factor).map_or(max, |delay| delay.min(max))
			}
		}
	}
}

impl From<&RetrySettings> for Backoff {
	fn from(settings: &RetrySettings) -> Self {
		match settings.backoff {
			BackoffKind::Fixed => Backoff::Fixed(settings.delay),
			BackoffKind::Exponential => Backoff::Exponential {
				base: settings.delay,
				max: settings.max_delay,
			},
		}
	}
}

/// Runs statements against a pool, retrying failed attempts
#[derive(Debug, Clone)]
pub struct QueryExecutor {
	acquirer: ClientAcquirer,
	metrics: Arc<MetricsCollector>,
	max_retries: u32,
	backoff: Backoff,
}

impl QueryExecutor {
	pub fn new(acquirer: ClientAcquirer, metrics: Arc<MetricsCollector>, retry: &RetrySettings) -> Self {
		Self {
			acquirer,
			metrics,
			max_retries: retry.max_retries,
			backoff: Backoff::from(retry),
		}
	}

	/// Execute `sql` on `pool`.
	///
	/// Makes up to `retries + 1` attempts. Each attempt acquires its own
	/// client, so a broken session is never reused by the next attempt.
	pub async fn execute(
		&self,
		pool: &RegisteredPool,
		sql: &str,
		params: &[QueryValue],
		options: &QueryOptions,
	) -> PoolResult<QueryResult> {
		let role = pool.role();
		let max_attempts = options
			.retries
			.unwrap_or(self.max_retries)
			.saturating_add(1);
		let record = !options.skip_metrics;
		let mut attempt = 0;

		loop {
			attempt += 1;
			if attempt > 1 && record {
				self.metrics.record_retry();
			}

			let started = Instant::now();
			let outcome = self.attempt(pool, sql, params, options).await;
			let elapsed = started.elapsed();
			if record {
				self.metrics.record_query(elapsed, outcome.is_ok());
			}

			let err = match outcome {
				Ok(result) => {
					debug!(
						pool = %role,
						attempt,
						duration_ms = elapsed.as_millis() as u64,
						rows = result.row_count,
						"Query succeeded"
					);
					return Ok(result);
				}
				Err(err) => err,
			};

			let terminal = matches!(err, PoolError::PoolClosed);
			if attempt < max_attempts && !terminal {
				let delay = self.backoff.delay_for(attempt);
				warn!(
					pool = %role,
					attempt,
					max_attempts,
					delay_ms = delay.as_millis() as u64,
					error = %err,
					"Query attempt failed, retrying"
				);
				tokio::time::sleep(delay).await;
				continue;
			}

			if record {
				self.metrics.record_exhausted();
			}
			error!(pool = %role, attempts = attempt, error = %err, "Query failed");
			return Err(PoolError::QueryFailed {
				role,
				attempts: attempt,
				source: Box::new(err),
			});
		}
	}

	async fn attempt(
		&self,
		pool: &RegisteredPool,
		sql: &str,
		params: &[QueryValue],
		options: &QueryOptions,
	) -> PoolResult<QueryResult> {
		let timeout = options.timeout.unwrap_or(pool.config().connect_timeout);
		let mut client = self.acquirer.acquire(pool, Some(timeout)).await?;

		if options.statement_timeout.is_some() {
			if let Err(err) = client.set_statement_timeout(options.statement_timeout).await {
				client.invalidate("failed to apply statement timeout").await;
				return Err(err);
			}
		}

		let outcome = client.query(sql, params).await;

		// Put the session back to the endpoint's own limit before reuse
		if options.statement_timeout.is_some() {
			if let Err(err) = client
				.set_statement_timeout(pool.config().statement_timeout)
				.await
			{
				warn!(pool = %pool.role(), error = %err, "Failed to restore statement timeout");
				client.invalidate("failed to restore statement timeout").await;
				return outcome;
			}
		}

		match &outcome {
			Err(err) if err.is_connection_error() => {
				client.invalidate(&err.to_string()).await;
			}
			_ => client.release(),
		}
		outcome
	}
}
