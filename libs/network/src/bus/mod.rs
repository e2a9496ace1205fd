//! # Bus Transport
//!
//! ## Purpose
//!
//! A bus is one persistent connection to one remote address. It carries
//! ordered multi-part messages in both directions and reports connection
//! events to a single registered [`BusListener`].
//!
//! ## Architecture Role
//!
//! ```text
//! RpcClient ──send(parts, level)──► Bus ──packets──► proxy
//!     ▲                              │
//!     └──── BusListener events ◄─────┘
//!          on_connect / on_message / on_disconnect / on_exception
//! ```
//!
//! ## Lifecycle
//!
//! `Connecting → Connected → Closed`. `Closed` is terminal and reachable
//! from either earlier state by local close, remote disconnect or I/O error.
//! Messages sent while connecting are queued and flushed in send order once
//! the dial completes.
//!
//! ## Listener isolation
//!
//! Listener callbacks run on the bus I/O task. An `Err` or a panic from a
//! callback is logged and swallowed; it never tears down the bus.

pub mod server;
pub mod tcp;

use crate::error::{Result, RpcClientError};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::warn;

pub use server::TcpBusServer;
pub use tcp::{TcpBus, TcpBusConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusState {
    Connecting,
    Connected,
    Closed,
}

/// How far a send must progress before its receipt resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryTrackingLevel {
    /// Resolved once the message is queued locally
    #[default]
    None,
    /// Resolved once the bytes are flushed to the socket
    Sent,
    /// Resolved once the peer answers with an Ack packet
    Full,
}

/// Receives connection events from one bus
pub trait BusListener: Send + Sync {
    fn on_connect(&self, _bus: &dyn Bus) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_message(&self, bus: &dyn Bus, parts: Vec<Bytes>) -> anyhow::Result<()>;

    fn on_disconnect(&self, _bus: &dyn Bus) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_exception(&self, _bus: &dyn Bus, _error: &RpcClientError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One connection to a remote address
#[async_trait]
pub trait Bus: Send + Sync {
    fn address(&self) -> &str;

    fn state(&self) -> BusState;

    /// Queue a message; the receipt resolves according to `level`
    fn send(&self, parts: Vec<Bytes>, level: DeliveryTrackingLevel) -> SendReceipt;

    /// Close the connection; idempotent
    fn close(&self);

    /// Resolve once connected, or fail if the bus closes first
    async fn wait_connected(&self) -> Result<()>;

    fn is_closed(&self) -> bool {
        self.state() == BusState::Closed
    }
}

/// Opens buses to remote addresses
pub trait BusConnector: Send + Sync {
    /// Start dialing `address`; returns immediately in `Connecting` state
    fn connect(&self, address: &str, listener: Arc<dyn BusListener>) -> Arc<dyn Bus>;
}

/// Completion of a single [`Bus::send`]
#[must_use = "dropping a receipt does not cancel the send"]
pub struct SendReceipt {
    inner: ReceiptInner,
}

enum ReceiptInner {
    Ready(Option<Result<()>>),
    Pending {
        address: String,
        rx: oneshot::Receiver<Result<()>>,
    },
}

/// Completes a pending [`SendReceipt`]
pub struct ReceiptSender(oneshot::Sender<Result<()>>);

impl ReceiptSender {
    pub fn complete(self, result: Result<()>) {
        let _ = self.0.send(result);
    }
}

impl SendReceipt {
    pub fn ready(result: Result<()>) -> Self {
        Self {
            inner: ReceiptInner::Ready(Some(result)),
        }
    }

    /// A receipt resolved later through the returned sender
    ///
    /// Dropping the sender resolves the receipt with `ConnectionLost`.
    pub fn pending(address: impl Into<String>) -> (ReceiptSender, Self) {
        let (tx, rx) = oneshot::channel();
        (
            ReceiptSender(tx),
            Self {
                inner: ReceiptInner::Pending {
                    address: address.into(),
                    rx,
                },
            },
        )
    }
}

impl Future for SendReceipt {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            ReceiptInner::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| Err(RpcClientError::closed("send receipt"))),
            ),
            ReceiptInner::Pending { address, rx } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(RpcClientError::connection_lost(
                    address.clone(),
                    "bus dropped before delivery",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Run one listener callback, logging and swallowing failures and panics
pub(crate) fn notify_listener<F>(address: &str, event: &'static str, callback: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(address = %address, event, error = %e, "Bus listener failed"),
        Err(_) => warn!(address = %address, event, "Bus listener panicked"),
    }
}
