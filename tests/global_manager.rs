//! Process-wide manager installed through the facade

use portal_db::pool::testing::{MockPool, mock_registry};
use portal_db::prelude::*;
use portal_db::{PoolError, global};
use rstest::rstest;
use std::time::Duration;

fn manager() -> PoolManager {
	let registry = mock_registry(&[(PoolRole::Primary, MockPool::new(1))]).unwrap();
	PoolManager::with_registry(
		registry,
		ManagerOptions::default().with_health_check_interval(Duration::ZERO),
	)
	.unwrap()
}

#[rstest]
#[tokio::test]
async fn test_global_manager_is_installed_once() {
	// Arrange
	assert!(global::get().is_none());
	assert!(matches!(global::try_get(), Err(PoolError::NotInitialized)));

	// Act
	let installed = global::init(manager()).unwrap();
	let second = global::init(manager());

	// Assert
	assert!(matches!(second, Err(PoolError::AlreadyInitialized)));
	let result = global::try_get()
		.unwrap()
		.query("SELECT 1", &[], QueryOptions::new())
		.await
		.unwrap();
	assert_eq!(result.row_count, 1);
	assert_eq!(installed.roles(), vec![PoolRole::Primary]);
}
