//! # Proxy RPC Network
//!
//! ## Purpose
//!
//! Everything in the proxy client that owns a socket, a timer or a task:
//! buses, request correlation, per-data-center destination pools, discovery
//! and failover.
//!
//! ## Architecture Role
//!
//! ```text
//!                    ProxyClient
//!                         │ invoke(request)
//!          ┌──────────────┼──────────────────┐
//!          ▼              ▼                  ▼
//!     DataCenter     DataCenter  ...   PeriodicDiscovery ──► ProxyLister
//!          │ score         │                  │ update_clients
//!          ▼               ▼                  ▼
//!   DestinationPool ◄─────────────────────────┘
//!          │ Destination lease
//!          ▼
//!      RpcClient ── pending[request_id] ── Bus (TCP / mock)
//! ```
//!
//! ## What This Crate Contains
//! - [`bus`]: the [`Bus`] trait, TCP implementation and test server
//! - [`rpc`]: [`RpcClient`] correlator, [`RpcRequest`], [`TypedRequest`]
//! - [`pool`]: [`DestinationPool`] and [`Destination`] leases
//! - [`data_center`], [`balancing`], [`discovery`], [`proxy_client`]
//! - `test_utils`: in-memory bus and recording listeners (`test-utils` feature)

pub mod balancing;
pub mod bus;
pub mod data_center;
pub mod discovery;
pub mod error;
pub mod pool;
pub mod proxy_client;
pub mod rpc;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use balancing::{execute, select_destinations};
pub use bus::{
    Bus, BusConnector, BusListener, BusState, DeliveryTrackingLevel, SendReceipt, TcpBus,
    TcpBusConnector, TcpBusServer,
};
pub use data_center::DataCenter;
pub use discovery::{encode_proxy_list, PeriodicDiscovery, ProxyLister, RpcProxyLister};
pub use error::{Result, RpcClientError, RpcError};
pub use pool::{Destination, DestinationPool};
pub use proxy_client::ProxyClient;
pub use rpc::{RpcCall, RpcClient, RpcClientOptions, RpcRequest, RpcResponse, TypedRequest};
