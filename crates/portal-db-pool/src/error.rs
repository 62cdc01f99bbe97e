//! Pool error types

use crate::role::PoolRole;
use portal_db_conf::ConfigError;
use std::time::Duration;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the pool manager
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
	/// Missing or malformed configuration; fatal at construction
	#[error("Configuration error: {0}")]
	Config(String),

	#[error("Pool '{0}' is not configured")]
	NotConfigured(PoolRole),

	#[error("Timed out after {timeout:?} waiting for a '{role}' connection")]
	AcquireTimeout { role: PoolRole, timeout: Duration },

	/// A statement failed on every allowed attempt
	#[error("Query failed after {attempts} attempt(s) on '{role}' pool: {source}")]
	QueryFailed {
		role: PoolRole,
		attempts: u32,
		#[source]
		source: Box<PoolError>,
	},

	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),

	/// Failure reported by a non-sqlx backend
	#[error("Backend error: {message}")]
	Backend {
		message: String,
		/// The connection is unusable and must not go back to the pool
		connection_lost: bool,
	},

	#[error("Value conversion error: {0}")]
	Conversion(String),

	#[error("Connection pools are closed")]
	PoolClosed,

	#[error("Health check failed for '{role}' pool: {message}")]
	HealthCheck { role: PoolRole, message: String },

	#[error("Pool manager is already initialized")]
	AlreadyInitialized,

	#[error("Pool manager has not been initialized")]
	NotInitialized,
}

impl From<ConfigError> for PoolError {
	fn from(err: ConfigError) -> Self {
		PoolError::Config(err.to_string())
	}
}

impl PoolError {
	/// Whether the failure leaves the connection unusable.
	///
	/// Such connections are closed instead of being returned to their pool.
	pub fn is_connection_error(&self) -> bool {
		match self {
			PoolError::Database(err) => matches!(
				err,
				sqlx::Error::Io(_)
					| sqlx::Error::Tls(_)
					| sqlx::Error::Protocol(_)
					| sqlx::Error::PoolClosed
					| sqlx::Error::WorkerCrashed
			),
			PoolError::Backend {
				connection_lost, ..
			} => *connection_lost,
			PoolError::QueryFailed { source, .. } => source.is_connection_error(),
			PoolError::PoolClosed => true,
			_ => false,
		}
	}

	/// Number of attempts made, for errors produced by the retry loop
	pub fn attempts(&self) -> Option<u32> {
		match self {
			PoolError::QueryFailed { attempts, .. } => Some(*attempts),
			_ => None,
		}
	}

	/// The innermost error, unwrapping retry wrappers
	pub fn root_cause(&self) -> &PoolError {
		match self {
			PoolError::QueryFailed { source, .. } => source.root_cause(),
			other => other,
		}
	}

	pub(crate) fn backend(message: impl Into<String>) -> Self {
		PoolError::Backend {
			message: message.into(),
			connection_lost: false,
		}
	}
}
