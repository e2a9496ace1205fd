//! Default values for RPC options
//!
//! Kept as named constants so the option defaults and their documentation
//! stay in one place.

/// Request deadline when a request does not set its own (milliseconds)
pub const REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Dial timeout for a single proxy connection (milliseconds)
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Interval between data-center liveness pings (milliseconds)
pub const PING_INTERVAL_MS: u64 = 5_000;

/// Deadline for a single ping (milliseconds)
pub const PING_TIMEOUT_MS: u64 = 5_000;

/// Interval between proxy discovery rounds (milliseconds)
pub const DISCOVERY_PERIOD_MS: u64 = 60_000;

/// Attempts per request across failover candidates
pub const FAILOVER_ATTEMPTS: usize = 3;

/// Candidate destinations collected per request
pub const CANDIDATES_PER_REQUEST: usize = 3;

/// Largest accepted bus message part (bytes)
pub const MAX_MESSAGE_PART_SIZE: usize = 256 * 1024 * 1024;

/// Largest accepted number of parts in one bus message
pub const MAX_MESSAGE_PART_COUNT: usize = 1 << 16;

/// Prefix of environment variables that override file configuration
pub const ENV_PREFIX: &str = "RPCCLIENT";
