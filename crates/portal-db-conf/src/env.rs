//! Environment variable handling
//!
//! Typed, prefix-aware access to environment variables. An `Env` can also be
//! backed by an explicit map, which keeps configuration tests independent of
//! the process environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Environment variable reader with prefix support
#[derive(Debug, Clone, Default)]
pub struct Env {
	/// Optional prefix for environment variables (e.g., "PORTAL_")
	pub prefix: Option<String>,

	/// When set, lookups read from this map instead of the process environment
	overrides: Option<HashMap<String, String>>,
}

impl Env {
	/// Create a reader over the process environment
	pub fn new() -> Self {
		Self {
			prefix: None,
			overrides: None,
		}
	}

	/// Create a reader over a fixed set of variables
	///
	/// # Examples
	///
	/// ```
	/// use portal_db_conf::Env;
	///
	/// let env = Env::from_vars([("DB_HOST", "db.internal")]);
	/// assert_eq!(env.str("DB_HOST").unwrap(), "db.internal");
	/// assert!(env.optional_str("DB_PORT").unwrap().is_none());
	/// ```
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			prefix: None,
			overrides: Some(
				vars.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	/// Set a prefix for all lookups
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = Some(prefix.into());
		self
	}

	fn get_key_name(&self, key: &str) -> String {
		match &self.prefix {
			Some(prefix) => format!("{}{}", prefix, key),
			None => key.to_string(),
		}
	}

	fn lookup(&self, full_key: &str) -> Option<String> {
		match &self.overrides {
			Some(vars) => vars.get(full_key).cloned(),
			None => env::var(full_key).ok(),
		}
	}

	/// Read a variable, treating an empty value as absent
	pub fn optional_str(&self, key: &str) -> Result<Option<String>, EnvError> {
		let full_key = self.get_key_name(key);
		validate_env_var_name(&full_key)?;

		Ok(self.lookup(&full_key).filter(|v| !v.trim().is_empty()))
	}

	/// Read a string value from environment
	pub fn str(&self, key: &str) -> Result<String, EnvError> {
		self.str_with_default(key, None)
	}

	/// Read a string value with a default
	pub fn str_with_default(&self, key: &str, default: Option<&str>) -> Result<String, EnvError> {
		match self.optional_str(key)? {
			Some(val) => Ok(val),
			None => match default {
				Some(d) => Ok(d.to_string()),
				None => Err(EnvError::MissingVariable(self.get_key_name(key))),
			},
		}
	}

	/// Read a boolean value from environment
	pub fn bool(&self, key: &str) -> Result<bool, EnvError> {
		self.bool_with_default(key, None)
	}

	/// Read a boolean value with a default
	pub fn bool_with_default(&self, key: &str, default: Option<bool>) -> Result<bool, EnvError> {
		match self.optional_str(key)? {
			Some(val) => parse_bool(&val).map_err(|error| EnvError::ParseError {
				key: self.get_key_name(key),
				value_len: val.len(),
				error,
			}),
			None => default.ok_or_else(|| EnvError::MissingVariable(self.get_key_name(key))),
		}
	}

	/// Read an integer value from environment
	pub fn int(&self, key: &str) -> Result<i64, EnvError> {
		self.int_with_default(key, None)
	}

	/// Read an integer value with a default
	pub fn int_with_default(&self, key: &str, default: Option<i64>) -> Result<i64, EnvError> {
		match self.optional_str(key)? {
			Some(val) => val.trim().parse::<i64>().map_err(|e| EnvError::ParseError {
				key: self.get_key_name(key),
				value_len: val.len(),
				error: e.to_string(),
			}),
			None => default.ok_or_else(|| EnvError::MissingVariable(self.get_key_name(key))),
		}
	}

	/// Read a non-negative integer that must fit in `u32`
	pub fn u32_with_default(&self, key: &str, default: u32) -> Result<u32, EnvError> {
		let value = self.int_with_default(key, Some(i64::from(default)))?;
		u32::try_from(value).map_err(|_| EnvError::ParseError {
			key: self.get_key_name(key),
			value_len: value.to_string().len(),
			error: format!("{} is out of range for u32", value),
		})
	}

	/// Read a millisecond count as a `Duration`
	pub fn duration_ms_with_default(
		&self,
		key: &str,
		default: Duration,
	) -> Result<Duration, EnvError> {
		let millis = self.int_with_default(key, Some(default.as_millis() as i64))?;
		if millis < 0 {
			return Err(EnvError::ParseError {
				key: self.get_key_name(key),
				value_len: millis.to_string().len(),
				error: "duration must not be negative".to_string(),
			});
		}
		Ok(Duration::from_millis(millis as u64))
	}
}

/// Parse a boolean the way shell-configured services usually spell it
///
/// # Examples
///
/// ```
/// use portal_db_conf::env::parse_bool;
///
/// assert_eq!(parse_bool("on"), Ok(true));
/// assert_eq!(parse_bool("0"), Ok(false));
/// assert!(parse_bool("maybe").is_err());
/// ```
pub fn parse_bool(value: &str) -> Result<bool, String> {
	match value.trim().to_lowercase().as_str() {
		"true" | "1" | "yes" | "on" => Ok(true),
		"false" | "0" | "no" | "off" => Ok(false),
		other => Err(format!("'{}' is not a boolean", other)),
	}
}

/// Validates an environment variable name.
///
/// Rejects names that are empty, contain control characters, or contain
/// the `=` character.
pub fn validate_env_var_name(name: &str) -> Result<(), EnvError> {
	if name.is_empty() {
		return Err(EnvError::InvalidVariableName {
			name: name.to_string(),
			reason: "environment variable name must not be empty".to_string(),
		});
	}

	if let Some(pos) = name.find(|c: char| c.is_control()) {
		return Err(EnvError::InvalidVariableName {
			name: name.to_string(),
			reason: format!(
				"environment variable name contains control character at position {}",
				pos
			),
		});
	}

	if name.contains('=') {
		return Err(EnvError::InvalidVariableName {
			name: name.to_string(),
			reason: "environment variable name must not contain '='".to_string(),
		});
	}

	Ok(())
}

/// Environment variable errors
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
	#[error("Missing environment variable: {0}")]
	MissingVariable(String),

	#[error("Failed to parse environment variable '{key}' (value length: {value_len}): {error}")]
	ParseError {
		key: String,
		/// Length of the original value; the raw value may be a secret
		value_len: usize,
		error: String,
	},

	#[error("Invalid environment variable name '{name}': {reason}")]
	InvalidVariableName { name: String, reason: String },
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serial_test::serial;

	#[rstest]
	#[case("true", true)]
	#[case("1", true)]
	#[case("YES", true)]
	#[case(" on ", true)]
	#[case("false", false)]
	#[case("0", false)]
	#[case("off", false)]
	fn test_parse_bool(#[case] input: &str, #[case] expected: bool) {
		// Act
		let parsed = parse_bool(input);

		// Assert
		assert_eq!(parsed, Ok(expected));
	}

	#[rstest]
	fn test_prefixed_lookup() {
		// Arrange
		let env = Env::from_vars([("PORTAL_DB_PORT", "6432")]).with_prefix("PORTAL_");

		// Act
		let port = env.int("DB_PORT").unwrap();

		// Assert
		assert_eq!(port, 6432);
	}

	#[rstest]
	fn test_empty_value_is_absent() {
		// Arrange
		let env = Env::from_vars([("DB_REPLICA_HOST", "  ")]);

		// Act & Assert
		assert!(env.optional_str("DB_REPLICA_HOST").unwrap().is_none());
		assert_eq!(
			env.str_with_default("DB_REPLICA_HOST", Some("fallback"))
				.unwrap(),
			"fallback"
		);
	}

	#[rstest]
	fn test_parse_error_hides_value() {
		// Arrange
		let env = Env::from_vars([("DB_POOL_SIZE", "twenty")]);

		// Act
		let err = env.int("DB_POOL_SIZE").unwrap_err();

		// Assert
		let message = err.to_string();
		assert!(message.contains("DB_POOL_SIZE"));
		assert!(!message.contains("twenty"));
	}

	#[rstest]
	fn test_negative_duration_rejected() {
		// Arrange
		let env = Env::from_vars([("DB_RETRY_DELAY_MS", "-5")]);

		// Act
		let result = env.duration_ms_with_default("DB_RETRY_DELAY_MS", Duration::from_secs(1));

		// Assert
		assert!(matches!(result, Err(EnvError::ParseError { .. })));
	}

	#[rstest]
	fn test_u32_out_of_range() {
		// Arrange
		let env = Env::from_vars([("DB_POOL_SIZE", "-1")]);

		// Act & Assert
		assert!(env.u32_with_default("DB_POOL_SIZE", 10).is_err());
	}

	#[rstest]
	fn test_validate_env_var_name_rejects_equals() {
		// Arrange & Act
		let result = validate_env_var_name("A=B");

		// Assert
		assert!(matches!(
			result,
			Err(EnvError::InvalidVariableName { .. })
		));
	}

	#[rstest]
	#[serial]
	fn test_reads_process_environment() {
		// SAFETY: Setting environment variables is unsafe in multi-threaded programs.
		// This test uses #[serial] to ensure exclusive access to environment variables.
		unsafe {
			env::set_var("PORTAL_CONF_TEST_HOST", "pg.example.com");
		}
		let env = Env::new().with_prefix("PORTAL_CONF_TEST_");

		let host = env.str("HOST");

		// SAFETY: Removing environment variables is unsafe in multi-threaded programs.
		// This test uses #[serial] to ensure exclusive access to environment variables.
		unsafe {
			env::remove_var("PORTAL_CONF_TEST_HOST");
		}
		assert_eq!(host.unwrap(), "pg.example.com");
	}
}
