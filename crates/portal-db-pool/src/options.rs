//! Per-call query options

use std::time::Duration;

/// Options accepted by every query and transaction entry point.
///
/// Unset fields fall back to the manager's configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
	/// Upper bound on waiting for a connection
	pub timeout: Option<Duration>,
	/// Retries after the first attempt
	pub retries: Option<u32>,
	pub use_replica: bool,
	pub use_analytics: bool,
	/// Keep this call out of the metrics
	pub skip_metrics: bool,
	/// Session statement timeout for this call only
	pub statement_timeout: Option<Duration>,
}

impl QueryOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn with_retries(mut self, retries: u32) -> Self {
		self.retries = Some(retries);
		self
	}

	pub fn prefer_replica(mut self) -> Self {
		self.use_replica = true;
		self
	}

	pub fn prefer_analytics(mut self) -> Self {
		self.use_analytics = true;
		self
	}

	pub fn without_metrics(mut self) -> Self {
		self.skip_metrics = true;
		self
	}

	pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
		self.statement_timeout = Some(timeout);
		self
	}
}
