//! Request correlator
//!
//! One [`RpcClient`] owns one bus. Each outstanding request has exactly one
//! entry in the pending table; whoever removes the entry (response, deadline,
//! caller cancel or disconnect) is the only one allowed to resolve it, which
//! makes resolution at-most-once without any further coordination.

use super::request::{RpcRequest, RpcResponse};
use crate::bus::{Bus, BusConnector, BusListener, DeliveryTrackingLevel};
use crate::error::{Result, RpcClientError};
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use rpc_codec::{
    create_cancel_message, create_request_message, decode_header, parse_response_message,
    RequestCancelationHeader, RequestHeader, ResponseHeader,
};
use rpc_config::{RpcCredentials, RpcOptions};
use rpc_types::{duration_to_micros, system_time_to_micros, Guid, RpcMessageType};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-client request defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcClientOptions {
    pub default_timeout: Duration,
    pub request_ack: bool,
    pub user: Option<String>,
    pub user_token: Option<String>,
    pub user_agent: Option<String>,
}

impl RpcClientOptions {
    pub fn from_config(options: &RpcOptions, credentials: &RpcCredentials) -> Self {
        Self {
            default_timeout: options.default_request_timeout(),
            request_ack: options.request_ack,
            user: (!credentials.user.is_empty()).then(|| credentials.user.clone()),
            user_token: (!credentials.token.is_empty()).then(|| credentials.token.clone()),
            ..Self::default()
        }
    }
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            default_timeout: RpcOptions::default().default_request_timeout(),
            request_ack: false,
            user: None,
            user_token: None,
            user_agent: Some(concat!("rpc-network/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

struct PendingRequest {
    service: String,
    method: String,
    tx: oneshot::Sender<Result<RpcResponse>>,
    deadline: Option<JoinHandle<()>>,
}

struct ClientInner {
    address: String,
    bus: OnceLock<Arc<dyn Bus>>,
    pending: Mutex<HashMap<Guid, PendingRequest>>,
    options: RpcClientOptions,
}

/// Multiplexes requests over one bus and matches responses by request id
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Open a bus to `address`; returns before the connection is established
    pub fn connect(connector: &dyn BusConnector, address: &str, options: RpcClientOptions) -> Self {
        let inner = Arc::new(ClientInner {
            address: address.to_string(),
            bus: OnceLock::new(),
            pending: Mutex::new(HashMap::new()),
            options,
        });
        let listener = Arc::new(ClientListener {
            inner: Arc::downgrade(&inner),
        });
        let bus = connector.connect(address, listener);
        let _ = inner.bus.set(bus);
        Self { inner }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn bus(&self) -> Option<&Arc<dyn Bus>> {
        self.inner.bus.get()
    }

    pub fn is_closed(&self) -> bool {
        self.bus().map_or(true, |bus| bus.is_closed())
    }

    pub async fn wait_connected(&self) -> Result<()> {
        match self.bus() {
            Some(bus) => bus.wait_connected().await,
            None => Err(RpcClientError::closed(format!("client for {}", self.address()))),
        }
    }

    /// Outstanding requests on this client
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_pending(&self, request_id: Guid) -> bool {
        self.inner.pending.lock().contains_key(&request_id)
    }

    /// Close the bus; outstanding requests fail with `ConnectionLost`
    pub fn close(&self) {
        if let Some(bus) = self.bus() {
            bus.close();
        }
        self.inner.fail_all(RpcClientError::connection_lost(
            self.inner.address.clone(),
            "client closed",
        ));
    }

    /// Frame and send `request`; the returned call resolves exactly once
    pub fn send(&self, request: &RpcRequest) -> RpcCall {
        let request_id = request.request_id.unwrap_or_else(Guid::create);
        let timeout = request.timeout.unwrap_or(self.inner.options.default_timeout);
        let request_ack = request.request_ack || self.inner.options.request_ack;

        let bus = match self.bus() {
            Some(bus) => Arc::clone(bus),
            None => {
                return RpcCall::rejected(
                    request_id,
                    RpcClientError::closed(format!("client for {}", self.address())),
                )
            }
        };
        let parts = match self.encode_request(request, request_id, timeout, request_ack) {
            Ok(parts) => parts,
            Err(e) => return RpcCall::rejected(request_id, e),
        };

        let acknowledged = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(&request_id) {
                // The entry belongs to the earlier call; this one must not touch it
                return RpcCall::rejected(
                    request_id,
                    RpcClientError::configuration(
                        format!("request {} is already in flight", request_id),
                        Some("request_id"),
                    ),
                );
            }
            pending.insert(
                request_id,
                PendingRequest {
                    service: request.service.clone(),
                    method: request.method.clone(),
                    tx,
                    deadline: None,
                },
            );
        }
        let call = RpcCall {
            request_id,
            rx,
            client: Arc::downgrade(&self.inner),
            acknowledged: Arc::clone(&acknowledged),
            finished: false,
        };

        let weak = Arc::downgrade(&self.inner);
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(request_id, timeout);
            }
        });
        match self.inner.pending.lock().get_mut(&request_id) {
            Some(entry) => entry.deadline = Some(deadline),
            None => deadline.abort(),
        }

        debug!(
            request_id = %request_id,
            address = %self.inner.address,
            service = %request.service,
            method = %request.method,
            retry = request.retry,
            "Sending request"
        );

        if request_ack {
            let receipt = bus.send(parts, DeliveryTrackingLevel::Full);
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                match receipt.await {
                    Ok(()) => acknowledged.store(true, Ordering::Release),
                    Err(e) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.resolve(request_id, Err(e));
                        }
                    }
                }
            });
        } else {
            let receipt = bus.send(parts, DeliveryTrackingLevel::None);
            if let Some(Err(e)) = receipt.now_or_never() {
                self.inner.resolve(request_id, Err(e));
            }
        }

        call
    }

    /// Liveness probe; any answer, including a remote error, counts
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        let request = RpcRequest::new(DISCOVERY_SERVICE, PING_METHOD, Bytes::new())
            .with_timeout(timeout);
        match self.send(&request).await {
            Ok(_) | Err(RpcClientError::Rpc(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn encode_request(
        &self,
        request: &RpcRequest,
        request_id: Guid,
        timeout: Duration,
        request_ack: bool,
    ) -> Result<Vec<Bytes>> {
        let header = RequestHeader {
            request_id,
            service: request.service.clone(),
            method: request.method.clone(),
            trace_id: request.trace_id,
            timeout: Some(duration_to_micros(timeout).unwrap_or(u64::MAX)),
            start_time: system_time_to_micros(SystemTime::now()).ok(),
            request_ack,
            retry: request.retry,
            user: self.inner.options.user.clone(),
            user_token: self.inner.options.user_token.clone(),
            user_agent: self.inner.options.user_agent.clone(),
        };
        Ok(create_request_message(
            &header,
            &request.body,
            &request.attachments,
        )?)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("address", &self.inner.address)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Service answering pings and discovery queries on every proxy
pub const DISCOVERY_SERVICE: &str = "DiscoveryService";
pub const PING_METHOD: &str = "Ping";
pub const DISCOVER_PROXIES_METHOD: &str = "DiscoverProxies";

impl ClientInner {
    /// Remove and resolve; false if someone else got there first
    fn resolve(&self, request_id: Guid, result: Result<RpcResponse>) -> bool {
        let entry = self.pending.lock().remove(&request_id);
        match entry {
            Some(entry) => {
                if let Some(deadline) = entry.deadline {
                    deadline.abort();
                }
                let _ = entry.tx.send(result);
                true
            }
            None => false,
        }
    }

    fn expire(&self, request_id: Guid, timeout: Duration) {
        let entry = self.pending.lock().remove(&request_id);
        if let Some(entry) = entry {
            warn!(
                request_id = %request_id,
                address = %self.address,
                service = %entry.service,
                method = %entry.method,
                timeout_ms = timeout.as_millis() as u64,
                "Request timed out"
            );
            self.send_cancel(request_id, &entry.service, &entry.method);
            let operation = format!("{}.{}", entry.service, entry.method);
            let _ = entry
                .tx
                .send(Err(RpcClientError::timeout(operation, timeout.as_millis() as u64)));
        }
    }

    fn cancel(&self, request_id: Guid) {
        let entry = self.pending.lock().remove(&request_id);
        if let Some(entry) = entry {
            debug!(request_id = %request_id, address = %self.address, "Request cancelled");
            if let Some(deadline) = entry.deadline {
                deadline.abort();
            }
            self.send_cancel(request_id, &entry.service, &entry.method);
            let _ = entry.tx.send(Err(RpcClientError::Cancelled));
        }
    }

    /// Best effort; never waits for delivery
    fn send_cancel(&self, request_id: Guid, service: &str, method: &str) {
        let Some(bus) = self.bus.get() else {
            return;
        };
        if bus.is_closed() {
            return;
        }
        let header = RequestCancelationHeader {
            request_id,
            service: service.to_string(),
            method: method.to_string(),
        };
        match create_cancel_message(&header) {
            Ok(parts) => {
                let _ = bus.send(parts, DeliveryTrackingLevel::None);
            }
            Err(e) => warn!(request_id = %request_id, error = %e, "Failed to encode cancellation"),
        }
    }

    fn fail_all(&self, error: RpcClientError) {
        let drained: Vec<(Guid, PendingRequest)> = self.pending.lock().drain().collect();
        for (request_id, entry) in drained {
            debug!(request_id = %request_id, address = %self.address, error = %error, "Failing request");
            if let Some(deadline) = entry.deadline {
                deadline.abort();
            }
            let _ = entry.tx.send(Err(error.clone()));
        }
    }

    fn handle_response(&self, parts: Vec<Bytes>) {
        let response = match parse_response_message(&parts) {
            Ok(response) => response,
            Err(e) => {
                // The header may still name the request the broken message answers
                let request_id = parts
                    .first()
                    .and_then(|part| {
                        decode_header::<ResponseHeader>(part, RpcMessageType::Response).ok()
                    })
                    .map(|header| header.request_id);
                warn!(address = %self.address, error = %e, "Malformed response");
                if let Some(request_id) = request_id {
                    self.resolve(
                        request_id,
                        Err(RpcClientError::malformed_response(self.address.clone(), e)),
                    );
                }
                return;
            }
        };

        let request_id = response.header.request_id;
        let result = match response.header.error {
            Some(error) => Err(RpcClientError::Rpc(error)),
            None => Ok(RpcResponse {
                body: response.body,
                attachments: response.attachments,
            }),
        };
        if !self.resolve(request_id, result) {
            debug!(
                request_id = %request_id,
                address = %self.address,
                "Dropping response for unknown or completed request"
            );
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.get() {
            bus.close();
        }
    }
}

struct ClientListener {
    inner: Weak<ClientInner>,
}

impl BusListener for ClientListener {
    fn on_message(&self, _bus: &dyn Bus, parts: Vec<Bytes>) -> anyhow::Result<()> {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_response(parts);
        }
        Ok(())
    }

    fn on_disconnect(&self, bus: &dyn Bus) -> anyhow::Result<()> {
        if let Some(inner) = self.inner.upgrade() {
            inner.fail_all(RpcClientError::connection_lost(
                bus.address(),
                "bus disconnected",
            ));
        }
        Ok(())
    }

    fn on_exception(&self, bus: &dyn Bus, error: &RpcClientError) -> anyhow::Result<()> {
        debug!(address = %bus.address(), error = %error, "Bus error");
        Ok(())
    }
}

/// The pending result of [`RpcClient::send`]
///
/// Dropping an unfinished call cancels the request.
pub struct RpcCall {
    request_id: Guid,
    rx: oneshot::Receiver<Result<RpcResponse>>,
    client: Weak<ClientInner>,
    acknowledged: Arc<AtomicBool>,
    finished: bool,
}

impl RpcCall {
    /// A call that failed before registering; it owns no pending entry
    fn rejected(request_id: Guid, error: RpcClientError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self {
            request_id,
            rx,
            client: Weak::new(),
            acknowledged: Arc::new(AtomicBool::new(false)),
            finished: true,
        }
    }

    pub fn request_id(&self) -> Guid {
        self.request_id
    }

    /// Whether the proxy acknowledged delivery of a request sent with acks
    pub fn acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Resolve with `Cancelled` and tell the proxy, without waiting
    pub fn cancel(&self) {
        if let Some(inner) = self.client.upgrade() {
            inner.cancel(self.request_id);
        }
    }
}

impl Future for RpcCall {
    type Output = Result<RpcResponse>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.finished = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.finished = true;
                Poll::Ready(Err(RpcClientError::Cancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RpcCall {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}
