//! Logical pool roles and role selection

use crate::options::QueryOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical pool a statement is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
	/// Read-write pool; always configured
	Primary,
	Replica,
	/// Long-running reporting queries
	Analytics,
}

impl PoolRole {
	pub const ALL: [PoolRole; 3] = [PoolRole::Primary, PoolRole::Replica, PoolRole::Analytics];

	pub fn as_str(&self) -> &'static str {
		match self {
			PoolRole::Primary => "primary",
			PoolRole::Replica => "replica",
			PoolRole::Analytics => "analytics",
		}
	}

	/// Whether a failure of this pool makes the whole manager unhealthy
	pub fn is_required(&self) -> bool {
		matches!(self, PoolRole::Primary)
	}

	/// Resolve the pool for a call.
	///
	/// First match wins: analytics when requested and configured, then
	/// replica when requested and configured, otherwise primary. Missing
	/// optional pools fall back silently.
	///
	/// # Examples
	///
	/// ```
	/// use portal_db_pool::{PoolRole, QueryOptions};
	///
	/// let options = QueryOptions::new().prefer_replica();
	/// assert_eq!(PoolRole::select(&options, |_| true), PoolRole::Replica);
	/// assert_eq!(
	///     PoolRole::select(&options, |role| role == PoolRole::Primary),
	///     PoolRole::Primary
	/// );
	/// ```
	pub fn select(options: &QueryOptions, is_configured: impl Fn(PoolRole) -> bool) -> PoolRole {
		if options.use_analytics && is_configured(PoolRole::Analytics) {
			PoolRole::Analytics
		} else if options.use_replica && is_configured(PoolRole::Replica) {
			PoolRole::Replica
		} else {
			PoolRole::Primary
		}
	}
}

impl fmt::Display for PoolRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PoolRole {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"primary" => Ok(PoolRole::Primary),
			"replica" => Ok(PoolRole::Replica),
			"analytics" => Ok(PoolRole::Analytics),
			other => Err(format!("unknown pool role '{}'", other)),
		}
	}
}
