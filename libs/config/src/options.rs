//! RPC behaviour options
//!
//! Durations are stored as integer milliseconds so they read naturally in
//! TOML and environment variables; accessors hand out `Duration`s.

use crate::defaults;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcOptions {
    pub default_request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub discovery_period_ms: u64,
    pub failover_attempts: usize,
    pub candidates_per_request: usize,
    /// Shuffle remote data centers before ranking them by score
    pub randomize_data_centers: bool,
    /// Always try the local data center first
    pub prefer_local_data_center: bool,
    /// Ask proxies to acknowledge request delivery
    pub request_ack: bool,
    /// Write typed nulls for absent or unconvertible row values instead of failing
    pub accept_missing_values: bool,
    pub max_message_part_size: usize,
    pub max_message_part_count: usize,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            default_request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            ping_interval_ms: defaults::PING_INTERVAL_MS,
            ping_timeout_ms: defaults::PING_TIMEOUT_MS,
            discovery_period_ms: defaults::DISCOVERY_PERIOD_MS,
            failover_attempts: defaults::FAILOVER_ATTEMPTS,
            candidates_per_request: defaults::CANDIDATES_PER_REQUEST,
            randomize_data_centers: false,
            prefer_local_data_center: true,
            request_ack: false,
            accept_missing_values: true,
            max_message_part_size: defaults::MAX_MESSAGE_PART_SIZE,
            max_message_part_count: defaults::MAX_MESSAGE_PART_COUNT,
        }
    }
}

impl RpcOptions {
    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn discovery_period(&self) -> Duration {
        Duration::from_millis(self.discovery_period_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("default_request_timeout_ms", self.default_request_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("ping_timeout_ms", self.ping_timeout_ms),
            ("discovery_period_ms", self.discovery_period_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                bail!("rpc.{} must be greater than zero", name);
            }
        }
        if self.failover_attempts == 0 {
            bail!("rpc.failover_attempts must be at least 1");
        }
        if self.candidates_per_request == 0 {
            bail!("rpc.candidates_per_request must be at least 1");
        }
        if self.max_message_part_count == 0 || self.max_message_part_size == 0 {
            bail!("rpc message part limits must be greater than zero");
        }
        Ok(())
    }
}
