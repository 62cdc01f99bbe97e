//! Shared helpers for manager integration tests

#![allow(dead_code)]

use portal_db_conf::RetrySettings;
use portal_db_pool::testing::{MockPool, mock_registry};
use portal_db_pool::{ManagerOptions, PoolManager, PoolRole};
use std::time::Duration;

/// Retry policy with a short fixed delay
pub fn fast_retry(max_retries: u32) -> RetrySettings {
	RetrySettings {
		max_retries,
		delay: Duration::from_millis(5),
		..RetrySettings::default()
	}
}

/// Manager over mock pools, without the background health loop
pub fn mock_manager(pools: &[(PoolRole, MockPool)], max_retries: u32) -> PoolManager {
	let registry = mock_registry(pools).expect("mock registry");
	PoolManager::with_registry(
		registry,
		ManagerOptions::default()
			.with_retry(fast_retry(max_retries))
			.with_health_check_interval(Duration::ZERO),
	)
	.expect("manager")
}

/// Polls a condition until it returns true or timeout is reached.
pub async fn poll_until<F>(timeout: Duration, mut condition: F) -> Result<(), String>
where
	F: FnMut() -> bool,
{
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		if condition() {
			return Ok(());
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	Err(format!("condition not met within {:?}", timeout))
}
