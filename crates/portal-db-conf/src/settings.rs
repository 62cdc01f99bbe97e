//! Database settings for the primary, replica and analytics pools
//!
//! The replica and analytics endpoints are optional: if neither a host nor a
//! URL is configured for a role, that role does not exist and query routing
//! falls back to the primary.

use crate::endpoint::PoolEndpointConfig;
use crate::env::{Env, EnvError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration errors
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Environment error: {0}")]
	Env(#[from] EnvError),

	#[error("Invalid {role} configuration: {reason}")]
	Invalid { role: &'static str, reason: String },
}

/// Delay strategy between query attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
	/// The same delay before every retry
	#[default]
	Fixed,
	/// `delay * 2^(attempt - 1)`, capped at `max_delay`
	Exponential,
}

impl std::str::FromStr for BackoffKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"fixed" => Ok(BackoffKind::Fixed),
			"exponential" => Ok(BackoffKind::Exponential),
			other => Err(format!("unknown backoff '{}'", other)),
		}
	}
}

/// Retry policy for single-statement queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
	/// Additional attempts after the first one
	pub max_retries: u32,
	pub delay: Duration,
	pub backoff: BackoffKind,
	pub max_delay: Duration,
}

impl Default for RetrySettings {
	fn default() -> Self {
		Self {
			max_retries: 3,
			delay: Duration::from_secs(1),
			backoff: BackoffKind::Fixed,
			max_delay: Duration::from_secs(30),
		}
	}
}

/// Complete configuration of the pool manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
	pub primary: PoolEndpointConfig,
	pub replica: Option<PoolEndpointConfig>,
	pub analytics: Option<PoolEndpointConfig>,
	pub retry: RetrySettings,
	/// Period of the background health check; zero disables it
	pub health_check_interval: Duration,
}

/// Analytics workloads get a small pool and a generous statement timeout
pub const ANALYTICS_MAX_CONNECTIONS: u32 = 5;
pub const ANALYTICS_STATEMENT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

impl DatabaseSettings {
	/// Settings with only a primary pool and default policies
	pub fn new(primary: PoolEndpointConfig) -> Self {
		Self {
			primary,
			replica: None,
			analytics: None,
			retry: RetrySettings::default(),
			health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
		}
	}

	pub fn with_replica(mut self, replica: PoolEndpointConfig) -> Self {
		self.replica = Some(replica);
		self
	}

	pub fn with_analytics(mut self, analytics: PoolEndpointConfig) -> Self {
		self.analytics = Some(analytics);
		self
	}

	pub fn with_retry(mut self, retry: RetrySettings) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
		self.health_check_interval = interval;
		self
	}

	/// Load settings from `DB_*` variables.
	///
	/// # Examples
	///
	/// ```
	/// use portal_db_conf::{DatabaseSettings, Env};
	///
	/// let env = Env::from_vars([
	///     ("DB_NAME", "portal"),
	///     ("DB_ANALYTICS_HOST", "warehouse.internal"),
	/// ]);
	/// let settings = DatabaseSettings::from_env(&env).unwrap();
	///
	/// assert_eq!(settings.primary.host, "localhost");
	/// assert!(settings.replica.is_none());
	/// assert_eq!(settings.analytics.unwrap().max_connections, 5);
	/// ```
	pub fn from_env(env: &Env) -> Result<Self, ConfigError> {
		let primary = load_primary(env)?;
		let replica = load_secondary(env, "REPLICA", &primary, None, None)?;
		let analytics = load_secondary(
			env,
			"ANALYTICS",
			&primary,
			Some(ANALYTICS_MAX_CONNECTIONS),
			Some(ANALYTICS_STATEMENT_TIMEOUT),
		)?;

		let backoff = match env.optional_str("DB_RETRY_BACKOFF")? {
			Some(raw) => raw.parse::<BackoffKind>().map_err(|reason| ConfigError::Invalid {
				role: "retry",
				reason,
			})?,
			None => BackoffKind::Fixed,
		};
		let defaults = RetrySettings::default();
		let retry = RetrySettings {
			max_retries: env.u32_with_default("DB_MAX_RETRIES", defaults.max_retries)?,
			delay: env.duration_ms_with_default("DB_RETRY_DELAY_MS", defaults.delay)?,
			backoff,
			max_delay: env.duration_ms_with_default("DB_RETRY_MAX_DELAY_MS", defaults.max_delay)?,
		};

		let settings = Self {
			primary,
			replica,
			analytics,
			retry,
			health_check_interval: env.duration_ms_with_default(
				"DB_HEALTH_CHECK_INTERVAL_MS",
				DEFAULT_HEALTH_CHECK_INTERVAL,
			)?,
		};
		settings.validate()?;
		Ok(settings)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		self.primary
			.validate()
			.map_err(|reason| ConfigError::Invalid {
				role: "primary",
				reason,
			})?;
		if let Some(replica) = &self.replica {
			replica.validate().map_err(|reason| ConfigError::Invalid {
				role: "replica",
				reason,
			})?;
		}
		if let Some(analytics) = &self.analytics {
			analytics.validate().map_err(|reason| ConfigError::Invalid {
				role: "analytics",
				reason,
			})?;
		}
		Ok(())
	}
}

fn optional_timeout(env: &Env, key: &str, default: Option<Duration>) -> Result<Option<Duration>, EnvError> {
	let value = env.duration_ms_with_default(key, default.unwrap_or(Duration::ZERO))?;
	Ok((!value.is_zero()).then_some(value))
}

fn load_primary(env: &Env) -> Result<PoolEndpointConfig, ConfigError> {
	let defaults = PoolEndpointConfig::default();
	let url = env.optional_str("DB_URL")?;
	let database = match &url {
		Some(_) => env.str_with_default("DB_NAME", Some(""))?,
		None => env.str("DB_NAME")?,
	};

	Ok(PoolEndpointConfig {
		host: env.str_with_default("DB_HOST", Some(defaults.host.as_str()))?,
		port: port(env, "DB_PORT", defaults.port)?,
		database,
		user: env.str_with_default("DB_USER", Some(defaults.user.as_str()))?,
		password: env.str_with_default("DB_PASSWORD", Some(""))?,
		ssl: env.bool_with_default("DB_SSL", Some(false))?,
		max_connections: env.u32_with_default("DB_POOL_SIZE", defaults.max_connections)?,
		min_connections: env.u32_with_default("DB_POOL_MIN", defaults.min_connections)?,
		idle_timeout: optional_timeout(env, "DB_IDLE_TIMEOUT_MS", defaults.idle_timeout)?,
		connect_timeout: env
			.duration_ms_with_default("DB_CONNECTION_TIMEOUT_MS", defaults.connect_timeout)?,
		statement_timeout: optional_timeout(
			env,
			"DB_STATEMENT_TIMEOUT_MS",
			defaults.statement_timeout,
		)?,
		url,
	})
}

/// Optional roles inherit everything but the host from the primary
fn load_secondary(
	env: &Env,
	role: &str,
	primary: &PoolEndpointConfig,
	max_connections: Option<u32>,
	statement_timeout: Option<Duration>,
) -> Result<Option<PoolEndpointConfig>, ConfigError> {
	let key = |suffix: &str| format!("DB_{}_{}", role, suffix);

	let host = env.optional_str(&key("HOST"))?;
	let url = env.optional_str(&key("URL"))?;
	let Some(host) = host.or_else(|| url.as_ref().map(|_| primary.host.clone())) else {
		return Ok(None);
	};

	let max_connections = max_connections.unwrap_or(primary.max_connections);
	let max_connections = env.u32_with_default(&key("POOL_SIZE"), max_connections)?;
	let statement_timeout = statement_timeout.or(primary.statement_timeout);

	Ok(Some(PoolEndpointConfig {
		host,
		port: port(env, &key("PORT"), primary.port)?,
		database: env.str_with_default(&key("NAME"), Some(primary.database.as_str()))?,
		user: env.str_with_default(&key("USER"), Some(primary.user.as_str()))?,
		password: env.str_with_default(&key("PASSWORD"), Some(primary.password.as_str()))?,
		ssl: env.bool_with_default(&key("SSL"), Some(primary.ssl))?,
		max_connections,
		min_connections: primary.min_connections.min(max_connections),
		idle_timeout: primary.idle_timeout,
		connect_timeout: primary.connect_timeout,
		statement_timeout: optional_timeout(env, &key("STATEMENT_TIMEOUT_MS"), statement_timeout)?,
		url,
	}))
}

fn port(env: &Env, key: &str, default: u16) -> Result<u16, EnvError> {
	let value = env.int_with_default(key, Some(i64::from(default)))?;
	u16::try_from(value).map_err(|_| EnvError::ParseError {
		key: key.to_string(),
		value_len: value.to_string().len(),
		error: format!("{} is not a valid port", value),
	})
}
