//! Health aggregation and the background probe loop

mod common;

use common::{fast_retry, mock_manager, poll_until};
use portal_db_pool::testing::{MockPool, mock_registry};
use portal_db_pool::{HealthStatus, ManagerOptions, PoolEvent, PoolManager, PoolRole};
use rstest::rstest;
use std::time::Duration;

#[rstest]
#[tokio::test]
async fn test_unreachable_primary_is_unhealthy() {
	// Arrange
	let primary = MockPool::new(1);
	let replica = MockPool::new(1);
	let manager = mock_manager(
		&[(PoolRole::Primary, primary.clone()), (PoolRole::Replica, replica)],
		0,
	);
	primary.set_unreachable(true);

	// Act
	let healthy = manager.perform_health_check().await;

	// Assert
	assert!(!healthy);
	assert!(!manager.is_healthy());
	assert_eq!(manager.health_status(), HealthStatus::Unhealthy);
	let report = manager.health_report();
	assert!(!report.pools[&PoolRole::Primary].healthy);
	assert!(report.pools[&PoolRole::Replica].healthy);
}

#[rstest]
#[tokio::test]
async fn test_unreachable_replica_is_degraded() {
	// Arrange
	let replica = MockPool::new(1);
	let manager = mock_manager(
		&[
			(PoolRole::Primary, MockPool::new(1)),
			(PoolRole::Replica, replica.clone()),
		],
		0,
	);
	replica.set_unreachable(true);

	// Act
	let healthy = manager.perform_health_check().await;

	// Assert
	assert!(healthy);
	assert_eq!(manager.health_status(), HealthStatus::Degraded);
	assert!(manager.health_report().pools[&PoolRole::Replica].error.is_some());
}

#[rstest]
#[tokio::test]
async fn test_all_pools_reachable_is_healthy() {
	// Arrange
	let manager = mock_manager(
		&[
			(PoolRole::Primary, MockPool::new(1)),
			(PoolRole::Replica, MockPool::new(1)),
			(PoolRole::Analytics, MockPool::new(1)),
		],
		0,
	);

	// Act
	let healthy = manager.perform_health_check().await;

	// Assert
	assert!(healthy);
	assert_eq!(manager.health_status(), HealthStatus::Healthy);
	let metrics = manager.metrics();
	assert_eq!(metrics.health_status, HealthStatus::Healthy);
	assert!(metrics.last_health_check.is_some());
}

#[rstest]
#[tokio::test]
async fn test_not_healthy_before_first_check() {
	// Arrange
	let manager = mock_manager(&[(PoolRole::Primary, MockPool::new(1))], 0);

	// Act & Assert
	assert!(!manager.is_healthy());
	assert_eq!(manager.health_status(), HealthStatus::Unknown);
}

#[rstest]
#[tokio::test]
async fn test_probe_failures_do_not_touch_query_metrics() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 0);
	primary.set_unreachable(true);

	// Act
	manager.perform_health_check().await;

	// Assert
	assert_eq!(manager.metrics().total_queries, 0);
}

#[rstest]
#[tokio::test]
async fn test_status_transition_emits_events() {
	// Arrange
	let primary = MockPool::new(1);
	let manager = mock_manager(&[(PoolRole::Primary, primary.clone())], 0);
	manager.perform_health_check().await;
	let mut events = manager.subscribe_events();

	// Act
	primary.set_unreachable(true);
	manager.perform_health_check().await;

	// Assert
	let mut seen = Vec::new();
	while let Ok(event) = events.try_recv() {
		seen.push(event);
	}
	assert!(seen.iter().any(|e| matches!(
		e,
		PoolEvent::HealthCheckFailed {
			role: PoolRole::Primary,
			..
		}
	)));
	assert!(seen.iter().any(|e| matches!(
		e,
		PoolEvent::HealthStatusChanged {
			previous: HealthStatus::Healthy,
			current: HealthStatus::Unhealthy,
			..
		}
	)));
}

#[rstest]
#[tokio::test]
async fn test_background_loop_probes_immediately() {
	// Arrange
	let primary = MockPool::new(1);
	let registry = mock_registry(&[(PoolRole::Primary, primary.clone())]).unwrap();
	let options = ManagerOptions::default()
		.with_retry(fast_retry(0))
		.with_health_check_interval(Duration::from_secs(3600));

	// Act
	let manager = PoolManager::with_registry(registry, options).unwrap();

	// Assert
	poll_until(Duration::from_secs(2), || manager.is_healthy())
		.await
		.unwrap();
	assert_eq!(primary.statements(), vec!["SELECT 1"]);
	manager.close().await;
}

#[rstest]
#[tokio::test]
async fn test_close_stops_background_loop() {
	// Arrange
	let primary = MockPool::new(1);
	let registry = mock_registry(&[(PoolRole::Primary, primary.clone())]).unwrap();
	let options = ManagerOptions::default()
		.with_retry(fast_retry(0))
		.with_health_check_interval(Duration::from_millis(20));
	let manager = PoolManager::with_registry(registry, options).unwrap();
	poll_until(Duration::from_secs(2), || manager.is_healthy())
		.await
		.unwrap();

	// Act
	manager.close().await;
	let probes_at_close = primary.statements().len();
	tokio::time::sleep(Duration::from_millis(100)).await;

	// Assert
	assert_eq!(primary.statements().len(), probes_at_close);
}
