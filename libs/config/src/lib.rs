//! # Proxy RPC Client Configuration
//!
//! Configuration for the proxy RPC client: which data centers exist and how
//! to reach their proxies, who the client is, and how requests behave.
//!
//! ## Usage
//!
//! ```no_run
//! use rpc_config::ClientConfig;
//! use std::path::Path;
//!
//! let config = ClientConfig::load(Path::new("config/client.toml"))?;
//! let attempts = config.rpc.failover_attempts;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod client_config;
pub mod defaults;
pub mod options;

pub use client_config::{ClientConfig, RpcCredentials};
pub use options::RpcOptions;
