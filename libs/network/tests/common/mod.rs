//! Shared helpers for rpc-network integration tests

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use rpc_network::test_utils::MockBusConnector;
use rpc_network::{DestinationPool, RpcClientOptions};
use std::sync::Arc;
use std::time::Duration;

/// Route tracing output through the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn addresses(list: &[&str]) -> Vec<String> {
    list.iter().map(|address| address.to_string()).collect()
}

pub fn mock_pool(connector: &MockBusConnector, name: &str) -> DestinationPool {
    DestinationPool::with_rng(
        name,
        Arc::new(connector.clone()),
        RpcClientOptions::default(),
        Duration::from_secs(1),
        StdRng::seed_from_u64(42),
    )
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
