//! Transaction commit, rollback and release ordering

mod common;

use common::mock_manager;
use parking_lot::Mutex;
use portal_db_pool::testing::MockPool;
use portal_db_pool::{PoolError, PoolEvent, PoolRole, QueryOptions, QueryValue};
use rstest::rstest;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
enum TransferError {
	#[error("insufficient funds: {0}")]
	InsufficientFunds(i64),
	#[error(transparent)]
	Pool(#[from] PoolError),
}

#[rstest]
#[tokio::test]
async fn test_successful_callback_commits() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 0);

	// Act
	let value = manager
		.transaction(QueryOptions::new(), |client| {
			Box::pin(async move {
				client
					.query("UPDATE accounts SET balance = 1", &[QueryValue::Int(1)])
					.await?;
				Ok::<_, PoolError>(42)
			})
		})
		.await
		.unwrap();

	// Assert
	assert_eq!(value, 42);
	assert_eq!(
		primary.statements(),
		vec!["BEGIN", "UPDATE accounts SET balance = 1", "COMMIT"]
	);
	assert_eq!(manager.metrics().transactions_committed, 1);
	assert_eq!(primary.checked_out(), 0);
}

#[rstest]
#[tokio::test]
async fn test_callback_error_is_returned_unchanged_after_rollback() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 0);

	// Act
	let result = manager
		.transaction(QueryOptions::new(), |client| {
			Box::pin(async move {
				client.query("SELECT 1", &[]).await?;
				Err::<(), _>(TransferError::InsufficientFunds(-5))
			})
		})
		.await;

	// Assert
	assert!(matches!(result, Err(TransferError::InsufficientFunds(-5))));
	assert_eq!(primary.statements(), vec!["BEGIN", "SELECT 1", "ROLLBACK"]);
	assert_eq!(manager.metrics().transactions_rolled_back, 1);
}

#[rstest]
#[tokio::test]
async fn test_rollback_completes_before_release() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 0);
	let last_statement_at_release = Arc::new(Mutex::new(None));
	{
		let primary = primary.clone();
		let slot = last_statement_at_release.clone();
		manager.add_listener(Arc::new(move |event: &PoolEvent| {
			if matches!(event, PoolEvent::ConnectionReleased { .. }) {
				*slot.lock() = primary.statements().last().cloned();
			}
		}));
	}

	// Act
	let _ = manager
		.transaction(QueryOptions::new(), |_client| {
			Box::pin(async move { Err::<(), _>(TransferError::InsufficientFunds(1)) })
		})
		.await;

	// Assert
	assert_eq!(
		last_statement_at_release.lock().as_deref(),
		Some("ROLLBACK")
	);
}

#[rstest]
#[tokio::test]
async fn test_failed_rollback_keeps_original_error() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 0);
	primary.fail_statements_containing(Some("ROLLBACK"));

	// Act
	let result = manager
		.transaction(QueryOptions::new(), |_client| {
			Box::pin(async move { Err::<(), _>(TransferError::InsufficientFunds(3)) })
		})
		.await;

	// Assert
	assert!(matches!(result, Err(TransferError::InsufficientFunds(3))));
	assert_eq!(primary.discarded_connections(), 1);
	assert_eq!(primary.checked_out(), 0);
}

#[rstest]
#[tokio::test]
async fn test_panicking_callback_is_rolled_back_and_resumed() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 0);

	// Act
	let task = {
		let manager = manager.clone();
		tokio::spawn(async move {
			manager
				.transaction(QueryOptions::new(), |_client| {
					Box::pin(async move {
						let explode = true;
						if explode {
							panic!("callback exploded");
						}
						Ok::<_, PoolError>(())
					})
				})
				.await
		})
	};
	let joined = task.await;

	// Assert
	assert!(joined.unwrap_err().is_panic());
	assert_eq!(primary.statements(), vec!["BEGIN", "ROLLBACK"]);
	assert_eq!(primary.checked_out(), 0);
	assert_eq!(manager.metrics().transactions_rolled_back, 1);
}

#[rstest]
#[tokio::test]
async fn test_failed_commit_is_reported() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 3);
	primary.fail_statements_containing(Some("COMMIT"));

	// Act
	let result = manager
		.transaction(QueryOptions::new(), |client| {
			Box::pin(async move {
				client.query("INSERT INTO t VALUES (1)", &[]).await?;
				Ok::<_, PoolError>(())
			})
		})
		.await;

	// Assert
	assert!(matches!(result, Err(PoolError::Backend { .. })));
	// Transactions are never retried
	assert_eq!(
		primary.statements(),
		vec!["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]
	);
	assert_eq!(primary.checked_out(), 0);
}
