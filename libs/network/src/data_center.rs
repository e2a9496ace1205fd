//! Data center: a named destination pool plus a liveness score
//!
//! The score is the fraction of destinations that answered the last ping.
//! It starts at -1.0 (never pinged) so a pinged data center always ranks
//! above one that has not been measured yet.

use crate::error::Result;
use crate::pool::{Destination, DestinationPool};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Score before the first ping
pub const INITIAL_SCORE: f64 = -1.0;

#[derive(Debug)]
pub struct DataCenter {
    name: String,
    pool: DestinationPool,
    /// f64 bits
    score: AtomicU64,
    closed: AtomicBool,
}

impl DataCenter {
    pub fn new(pool: DestinationPool) -> Self {
        Self {
            name: pool.name().to_string(),
            pool,
            score: AtomicU64::new(INITIAL_SCORE.to_bits()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &DestinationPool {
        &self.pool
    }

    pub fn score(&self) -> f64 {
        f64::from_bits(self.score.load(Ordering::Acquire))
    }

    pub fn set_score(&self, score: f64) {
        self.score.store(score.to_bits(), Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Replace the proxy set; see [`DestinationPool::update_clients`]
    pub async fn set_proxies(&self, addresses: Vec<String>) -> Result<()> {
        self.pool.update_clients(addresses).await
    }

    /// Up to `count` distinct live destinations
    pub fn select_destinations(&self, count: usize) -> Vec<Destination> {
        if self.is_closed() || count == 0 {
            return Vec::new();
        }
        self.pool.select(count)
    }

    /// Ping every live destination and store the answered fraction
    pub async fn ping(&self, timeout: Duration) -> f64 {
        let destinations = self.pool.destinations();
        if destinations.is_empty() {
            self.set_score(0.0);
            return 0.0;
        }

        let results = join_all(
            destinations
                .iter()
                .map(|destination| destination.client().ping(timeout)),
        )
        .await;
        let answered = results.iter().filter(|result| result.is_ok()).count();
        let score = answered as f64 / destinations.len() as f64;

        debug!(
            data_center = %self.name,
            answered,
            total = destinations.len(),
            score,
            "Data center pinged"
        );
        self.set_score(score);
        score
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.close();
        }
    }
}
