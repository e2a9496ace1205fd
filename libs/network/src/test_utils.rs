//! Test doubles for the bus, listeners and proxy discovery
//!
//! [`MockBusConnector`] hands out in-memory buses that record every message
//! sent through them and can answer requests through a responder closure.
//! [`RecordingListener`] and [`EchoServerListener`] sit on real TCP buses.

use crate::bus::{notify_listener, Bus, BusConnector, BusListener, BusState, DeliveryTrackingLevel, SendReceipt};
use crate::discovery::ProxyLister;
use crate::error::{Result, RpcClientError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rpc_codec::{
    create_error_response_message, create_response_message, decode_message_type, encode_header,
    parse_cancel_message, parse_request_message, CodecResult, ParsedRequest,
    RequestCancelationHeader, ResponseHeader, RpcError,
};
use rpc_types::{Guid, RpcMessageType};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// What a mock proxy does with one request
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Body { body: Bytes, attachments: Vec<Bytes> },
    Error(RpcError),
    /// Drop the connection as if the proxy died
    Disconnect,
    /// A valid response header followed by an undecodable envelope
    Malformed,
}

impl MockReply {
    pub fn body(body: impl Into<Bytes>) -> Self {
        Self::Body {
            body: body.into(),
            attachments: Vec::new(),
        }
    }
}

/// Decides the reply for `(address, request)`; `None` never answers
pub type Responder = Arc<dyn Fn(&str, &ParsedRequest) -> Option<MockReply> + Send + Sync>;

#[derive(Default)]
struct MockNetwork {
    buses: Vec<Arc<MockBus>>,
    failing: HashSet<String>,
    held: HashSet<String>,
    responder: Option<Responder>,
}

/// In-memory connector; buses connect synchronously unless told otherwise
#[derive(Clone, Default)]
pub struct MockBusConnector {
    network: Arc<Mutex<MockNetwork>>,
}

impl MockBusConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections to `address` fail immediately
    pub fn fail_address(&self, address: impl Into<String>) {
        self.network.lock().failing.insert(address.into());
    }

    /// Connections to `address` stay `Connecting` until
    /// [`MockBus::complete_connect`]
    pub fn hold_address(&self, address: impl Into<String>) {
        self.network.lock().held.insert(address.into());
    }

    /// Answer requests on buses opened from now on
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &ParsedRequest) -> Option<MockReply> + Send + Sync + 'static,
    {
        self.network.lock().responder = Some(Arc::new(responder));
    }

    /// Address of every bus ever opened, in order
    pub fn opened(&self) -> Vec<String> {
        self.network
            .lock()
            .buses
            .iter()
            .map(|bus| bus.address.clone())
            .collect()
    }

    pub fn buses(&self) -> Vec<Arc<MockBus>> {
        self.network.lock().buses.clone()
    }

    /// Most recent bus opened to `address`
    pub fn bus(&self, address: &str) -> Option<Arc<MockBus>> {
        self.network
            .lock()
            .buses
            .iter()
            .rev()
            .find(|bus| bus.address == address)
            .cloned()
    }
}

impl BusConnector for MockBusConnector {
    fn connect(&self, address: &str, listener: Arc<dyn BusListener>) -> Arc<dyn Bus> {
        let (initial, responder) = {
            let network = self.network.lock();
            let initial = if network.failing.contains(address) {
                BusState::Closed
            } else if network.held.contains(address) {
                BusState::Connecting
            } else {
                BusState::Connected
            };
            (initial, network.responder.clone())
        };

        let (state, _) = watch::channel(initial);
        let bus = Arc::new(MockBus {
            address: address.to_string(),
            listener,
            state,
            sent: Mutex::new(Vec::new()),
            responder,
        });
        self.network.lock().buses.push(Arc::clone(&bus));

        match initial {
            BusState::Connected => {
                notify_listener(address, "on_connect", || bus.listener.on_connect(bus.as_ref()))
            }
            BusState::Closed => {
                let error = RpcClientError::network(format!("connection to {} refused", address));
                notify_listener(address, "on_exception", || {
                    bus.listener.on_exception(bus.as_ref(), &error)
                });
                notify_listener(address, "on_disconnect", || {
                    bus.listener.on_disconnect(bus.as_ref())
                });
            }
            BusState::Connecting => {}
        }
        bus
    }
}

pub struct MockBus {
    address: String,
    listener: Arc<dyn BusListener>,
    state: watch::Sender<BusState>,
    sent: Mutex<Vec<Vec<Bytes>>>,
    responder: Option<Responder>,
}

impl MockBus {
    pub fn sent_messages(&self) -> Vec<Vec<Bytes>> {
        self.sent.lock().clone()
    }

    /// Sent messages that parse as requests
    pub fn sent_requests(&self) -> Vec<ParsedRequest> {
        self.sent
            .lock()
            .iter()
            .filter(|parts| message_type(parts) == Some(RpcMessageType::Request))
            .filter_map(|parts| parse_request_message(parts).ok())
            .collect()
    }

    /// Sent cancellation messages
    pub fn sent_cancels(&self) -> Vec<RequestCancelationHeader> {
        self.sent
            .lock()
            .iter()
            .filter(|parts| message_type(parts) == Some(RpcMessageType::Cancel))
            .filter_map(|parts| parse_cancel_message(parts).ok())
            .collect()
    }

    /// Push an inbound message to the listener
    pub fn deliver(&self, parts: Vec<Bytes>) {
        notify_listener(&self.address, "on_message", || {
            self.listener.on_message(self, parts)
        });
    }

    pub fn respond(&self, request_id: Guid, body: impl Into<Bytes>) -> CodecResult<()> {
        let body: Bytes = body.into();
        self.deliver(create_response_message(request_id, &body, &[])?);
        Ok(())
    }

    pub fn respond_error(&self, request_id: Guid, error: RpcError) -> CodecResult<()> {
        self.deliver(create_error_response_message(request_id, error)?);
        Ok(())
    }

    /// Finish a held connection
    pub fn complete_connect(&self) {
        let connected = self.state.send_if_modified(|state| {
            if *state == BusState::Connecting {
                *state = BusState::Connected;
                true
            } else {
                false
            }
        });
        if connected {
            notify_listener(&self.address, "on_connect", || {
                self.listener.on_connect(self)
            });
        }
    }

    /// Remote side went away
    pub fn disconnect(&self) {
        if self.state.send_replace(BusState::Closed) == BusState::Closed {
            return;
        }
        let error = RpcClientError::connection_lost(self.address.clone(), "connection reset by peer");
        notify_listener(&self.address, "on_exception", || {
            self.listener.on_exception(self, &error)
        });
        notify_listener(&self.address, "on_disconnect", || {
            self.listener.on_disconnect(self)
        });
    }

    fn reply(&self, parts: &[Bytes]) {
        let Some(responder) = &self.responder else {
            return;
        };
        let Ok(request) = parse_request_message(parts) else {
            return;
        };
        let request_id = request.header.request_id;
        let outcome = match responder(&self.address, &request) {
            Some(MockReply::Body { body, attachments }) => {
                create_response_message(request_id, &body, &attachments).map(Some)
            }
            Some(MockReply::Error(error)) => {
                create_error_response_message(request_id, error).map(Some)
            }
            Some(MockReply::Disconnect) => {
                self.disconnect();
                Ok(None)
            }
            Some(MockReply::Malformed) => {
                let header = ResponseHeader {
                    request_id,
                    error: None,
                };
                encode_header(RpcMessageType::Response, &header)
                    .map(|part| Some(vec![part, Bytes::from_static(b"xx")]))
            }
            None => Ok(None),
        };
        if let Ok(Some(response)) = outcome {
            self.deliver(response);
        }
    }
}

fn message_type(parts: &[Bytes]) -> Option<RpcMessageType> {
    parts.first().and_then(|part| decode_message_type(part).ok())
}

#[async_trait]
impl Bus for MockBus {
    fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> BusState {
        *self.state.borrow()
    }

    fn send(&self, parts: Vec<Bytes>, _level: DeliveryTrackingLevel) -> SendReceipt {
        if self.is_closed() {
            return SendReceipt::ready(Err(RpcClientError::closed(format!(
                "bus to {}",
                self.address
            ))));
        }
        self.sent.lock().push(parts.clone());
        if message_type(&parts) == Some(RpcMessageType::Request) {
            self.reply(&parts);
        }
        SendReceipt::ready(Ok(()))
    }

    fn close(&self) {
        if self.state.send_replace(BusState::Closed) != BusState::Closed {
            notify_listener(&self.address, "on_disconnect", || {
                self.listener.on_disconnect(self)
            });
        }
    }

    async fn wait_connected(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        let current = match state.wait_for(|s| *s != BusState::Connecting).await {
            Ok(s) => *s,
            Err(_) => BusState::Closed,
        };
        match current {
            BusState::Connected => Ok(()),
            _ => Err(RpcClientError::connection_lost(
                self.address.clone(),
                "bus closed before connecting",
            )),
        }
    }
}

/// Connection event observed by a [`RecordingListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Connected(String),
    Message(String, Vec<Bytes>),
    Disconnected(String),
    Exception(String, String),
}

/// Listener that records events and can be told to misbehave
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<BusEvent>>>,
    fail_on_message: Arc<AtomicBool>,
    panic_on_message: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().clone()
    }

    pub fn messages(&self) -> Vec<Vec<Bytes>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                BusEvent::Message(_, parts) => Some(parts.clone()),
                _ => None,
            })
            .collect()
    }

    /// `on_message` records the message, then returns an error
    pub fn set_fail_on_message(&self, fail: bool) {
        self.fail_on_message.store(fail, Ordering::SeqCst);
    }

    /// `on_message` records the message, then panics
    pub fn set_panic_on_message(&self, panic: bool) {
        self.panic_on_message.store(panic, Ordering::SeqCst);
    }

    /// Wait until at least `count` events matching `filter` were recorded
    pub async fn wait_for<F>(&self, count: usize, timeout: Duration, filter: F) -> bool
    where
        F: Fn(&BusEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.events.lock().iter().filter(|e| filter(e)).count() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    fn record(&self, event: BusEvent) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}

impl BusListener for RecordingListener {
    fn on_connect(&self, bus: &dyn Bus) -> anyhow::Result<()> {
        self.record(BusEvent::Connected(bus.address().to_string()));
        Ok(())
    }

    fn on_message(&self, bus: &dyn Bus, parts: Vec<Bytes>) -> anyhow::Result<()> {
        self.record(BusEvent::Message(bus.address().to_string(), parts));
        if self.panic_on_message.load(Ordering::SeqCst) {
            panic!("listener asked to panic");
        }
        if self.fail_on_message.load(Ordering::SeqCst) {
            anyhow::bail!("listener asked to fail");
        }
        Ok(())
    }

    fn on_disconnect(&self, bus: &dyn Bus) -> anyhow::Result<()> {
        self.record(BusEvent::Disconnected(bus.address().to_string()));
        Ok(())
    }

    fn on_exception(&self, bus: &dyn Bus, error: &RpcClientError) -> anyhow::Result<()> {
        self.record(BusEvent::Exception(bus.address().to_string(), error.to_string()));
        Ok(())
    }
}

/// Server-side listener acting as a proxy: echoes request bodies back
#[derive(Clone, Default)]
pub struct EchoServerListener {
    requests: Arc<Mutex<Vec<ParsedRequest>>>,
    cancels: Arc<Mutex<Vec<RequestCancelationHeader>>>,
    silent: Arc<AtomicBool>,
}

impl EchoServerListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop answering requests
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<ParsedRequest> {
        self.requests.lock().clone()
    }

    pub fn cancels(&self) -> Vec<RequestCancelationHeader> {
        self.cancels.lock().clone()
    }
}

impl BusListener for EchoServerListener {
    fn on_message(&self, bus: &dyn Bus, parts: Vec<Bytes>) -> anyhow::Result<()> {
        match message_type(&parts) {
            Some(RpcMessageType::Request) => {
                let request = parse_request_message(&parts)?;
                let response = create_response_message(
                    request.header.request_id,
                    &request.body,
                    &request.attachments,
                )?;
                self.requests.lock().push(request);
                if !self.silent.load(Ordering::SeqCst) {
                    let _ = bus.send(response, DeliveryTrackingLevel::None);
                }
            }
            Some(RpcMessageType::Cancel) => {
                self.cancels.lock().push(parse_cancel_message(&parts)?);
            }
            other => anyhow::bail!("unexpected message type {:?}", other),
        }
        Ok(())
    }
}

/// Proxy lister answering from a fixed table
#[derive(Default)]
pub struct StaticProxyLister {
    answers: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<String>>,
}

impl StaticProxyLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_proxies(&self, seed: impl Into<String>, proxies: Vec<String>) {
        self.answers.lock().insert(seed.into(), proxies);
    }

    /// Make `seed` fail from now on
    pub fn remove_seed(&self, seed: &str) {
        self.answers.lock().remove(seed);
    }

    /// Seeds queried so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProxyLister for StaticProxyLister {
    async fn list_proxies(&self, seed: &str) -> Result<Vec<String>> {
        self.calls.lock().push(seed.to_string());
        let answer = self.answers.lock().get(seed).cloned();
        answer.ok_or_else(|| RpcClientError::connection_lost(seed, "seed unavailable"))
    }
}
