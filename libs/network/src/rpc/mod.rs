//! Request correlation over a single bus
//!
//! ```text
//! RpcRequest ──► RpcClient::send ──► pending[request_id] ──► Bus
//!                      │                    ▲
//!                      ▼                    │ response / deadline /
//!                   RpcCall ◄───────────────┘ cancel / disconnect
//! ```

pub mod client;
pub mod request;

pub use client::{
    RpcCall, RpcClient, RpcClientOptions, DISCOVERY_SERVICE, DISCOVER_PROXIES_METHOD, PING_METHOD,
};
pub use request::{RpcRequest, RpcResponse, TypedRequest};
