//! Test helper modules for integration tests

pub mod sync_transport;

pub use sync_transport::*;

use sl_core::RealtimeSyncService;
use std::time::Duration;

/// Wait until the consumer has finished `count` events
pub async fn wait_for_processed(service: &RealtimeSyncService, count: u64) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while service.stats().processed() < count {
		assert!(
			tokio::time::Instant::now() < deadline,
			"timed out waiting for {count} events, stats: {:?}",
			service.stats()
		);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}
