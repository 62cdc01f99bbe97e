//! Configuration for the portal database pools
//!
//! Settings are sourced from `DB_*` environment variables (see
//! [`DatabaseSettings::from_env`]) or assembled in code with the builder
//! methods on [`PoolEndpointConfig`] and [`DatabaseSettings`].

pub mod endpoint;
pub mod env;
pub mod settings;

pub use endpoint::{PoolEndpointConfig, mask_url_password};
pub use env::{Env, EnvError};
pub use settings::{
	ANALYTICS_MAX_CONNECTIONS, ANALYTICS_STATEMENT_TIMEOUT, BackoffKind, ConfigError,
	DEFAULT_HEALTH_CHECK_INTERVAL, DatabaseSettings, RetrySettings,
};

/// Re-export commonly used types
pub mod prelude {
	pub use super::endpoint::*;
	pub use super::env::Env;
	pub use super::settings::*;
}
