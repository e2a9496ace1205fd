//! TCP bus
//!
//! One tokio task per connection drives the socket. The task dials (or
//! adopts an accepted stream), then runs a reader and a writer side by side
//! until either fails or the bus is closed.
//!
//! Framing uses [`rpc_codec::packet`]: the reader pulls a fixed 28-byte
//! header with `read_exact`, then the part table and the parts themselves.
//! A corrupt header or an oversized part table is fatal for the connection
//! because the stream cannot be resynchronised.

use super::{
    notify_listener, Bus, BusConnector, BusListener, BusState, DeliveryTrackingLevel,
    ReceiptSender, SendReceipt,
};
use crate::error::{Result, RpcClientError};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use parking_lot::Mutex;
use rpc_codec::{decode_part_sizes, encode_packet, PacketHeader, PacketLimits, PACKET_HEADER_SIZE};
use rpc_config::RpcOptions;
use rpc_types::{Guid, PacketFlags, PacketType};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Dials [`TcpBus`] connections
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct TcpBusConnector {
    limits: PacketLimits,
    connect_timeout: Duration,
}

impl TcpBusConnector {
    pub fn new(options: &RpcOptions) -> Self {
        Self {
            limits: PacketLimits {
                max_part_count: options.max_message_part_count,
                max_part_size: options.max_message_part_size,
            },
            connect_timeout: options.connect_timeout(),
        }
    }
}

impl Default for TcpBusConnector {
    fn default() -> Self {
        Self::new(&RpcOptions::default())
    }
}

impl BusConnector for TcpBusConnector {
    fn connect(&self, address: &str, listener: Arc<dyn BusListener>) -> Arc<dyn Bus> {
        TcpBus::dial(address, listener, self.limits, self.connect_timeout)
    }
}

enum Outbound {
    Message {
        packet_id: Guid,
        parts: Vec<Bytes>,
        level: DeliveryTrackingLevel,
        receipt: Option<ReceiptSender>,
    },
    Ack(Guid),
}

enum Origin {
    Dial { timeout: Duration },
    Accepted(TcpStream),
}

pub struct TcpBus {
    address: String,
    listener: Arc<dyn BusListener>,
    limits: PacketLimits,
    state: watch::Sender<BusState>,
    shutdown: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Full-tracking receipts waiting for the peer's Ack, by packet id
    pending_acks: Mutex<HashMap<Guid, ReceiptSender>>,
    terminated: AtomicBool,
    last_error: Mutex<Option<RpcClientError>>,
}

impl TcpBus {
    pub(crate) fn dial(
        address: &str,
        listener: Arc<dyn BusListener>,
        limits: PacketLimits,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        debug!(address = %address, "Dialing bus");
        Self::start(
            address.to_string(),
            listener,
            limits,
            Origin::Dial {
                timeout: connect_timeout,
            },
        )
    }

    pub(crate) fn accepted(
        stream: TcpStream,
        peer: SocketAddr,
        listener: Arc<dyn BusListener>,
        limits: PacketLimits,
    ) -> Arc<Self> {
        Self::start(peer.to_string(), listener, limits, Origin::Accepted(stream))
    }

    fn start(
        address: String,
        listener: Arc<dyn BusListener>,
        limits: PacketLimits,
        origin: Origin,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(BusState::Connecting);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let bus = Arc::new(Self {
            address,
            listener,
            limits,
            state,
            shutdown,
            outbound,
            pending_acks: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
            last_error: Mutex::new(None),
        });

        tokio::spawn(Arc::clone(&bus).run(origin, outbound_rx, shutdown_rx));
        bus
    }

    async fn run(
        self: Arc<Self>,
        origin: Origin,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let stream = match origin {
            Origin::Accepted(stream) => stream,
            Origin::Dial { timeout } => {
                let dial = tokio::time::timeout(timeout, TcpStream::connect(self.address.as_str()));
                tokio::select! {
                    _ = wait_shutdown(&mut shutdown) => {
                        debug!(address = %self.address, "Dial cancelled");
                        return;
                    }
                    result = dial => match result {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(e)) => {
                            let message = format!("failed to connect to {}", self.address);
                            self.terminate(Some(RpcClientError::network_with_source(message, e)));
                            return;
                        }
                        Err(_) => {
                            let operation = format!("connect to {}", self.address);
                            self.terminate(Some(RpcClientError::timeout(
                                operation,
                                timeout.as_millis() as u64,
                            )));
                            return;
                        }
                    }
                }
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(address = %self.address, error = %e, "Failed to set TCP_NODELAY");
        }

        // close() may have won the race against the dial
        let connected = self.state.send_if_modified(|state| {
            if *state == BusState::Connecting {
                *state = BusState::Connected;
                true
            } else {
                false
            }
        });
        if !connected {
            return;
        }

        info!(address = %self.address, "Bus connected");
        notify_listener(&self.address, "on_connect", || {
            self.listener.on_connect(&*self)
        });

        let (reader, writer) = stream.into_split();
        let result = tokio::select! {
            r = self.read_loop(reader) => r,
            r = self.write_loop(writer, outbound) => r,
            _ = wait_shutdown(&mut shutdown) => Ok(()),
        };

        self.terminate(result.err());
        // Receipts registered by the writer after an external close
        self.fail_pending_acks();
    }

    async fn read_loop(&self, mut reader: OwnedReadHalf) -> Result<()> {
        let mut header_buf = [0u8; PACKET_HEADER_SIZE];
        loop {
            reader
                .read_exact(&mut header_buf)
                .await
                .map_err(|e| self.read_error(e))?;
            let header = PacketHeader::decode(&header_buf)?;

            match header.packet_type {
                PacketType::Ack => {
                    let receipt = self.pending_acks.lock().remove(&header.packet_id);
                    match receipt {
                        Some(receipt) => receipt.complete(Ok(())),
                        None => debug!(
                            address = %self.address,
                            packet_id = %header.packet_id,
                            "Ack for unknown packet"
                        ),
                    }
                }
                PacketType::Message => {
                    let mut count_buf = [0u8; 4];
                    reader
                        .read_exact(&mut count_buf)
                        .await
                        .map_err(|e| self.read_error(e))?;
                    let count = LittleEndian::read_u32(&count_buf) as usize;
                    self.limits.check_part_count(count)?;

                    let mut table = vec![0u8; 4 * count];
                    reader
                        .read_exact(&mut table)
                        .await
                        .map_err(|e| self.read_error(e))?;
                    let sizes = decode_part_sizes(&table, &self.limits)?;

                    let mut parts = Vec::with_capacity(count);
                    for size in sizes {
                        let mut part = vec![0u8; size];
                        reader
                            .read_exact(&mut part)
                            .await
                            .map_err(|e| self.read_error(e))?;
                        parts.push(Bytes::from(part));
                    }

                    if header.flags.contains(PacketFlags::REQUEST_ACK) {
                        let _ = self.outbound.send(Outbound::Ack(header.packet_id));
                    }

                    trace!(
                        address = %self.address,
                        packet_id = %header.packet_id,
                        parts = parts.len(),
                        "Message received"
                    );
                    notify_listener(&self.address, "on_message", || {
                        self.listener.on_message(self, parts)
                    });
                }
            }
        }
    }

    async fn write_loop(
        &self,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) -> Result<()> {
        while let Some(item) = outbound.recv().await {
            let (packet_id, parts, level, mut receipt) = match item {
                Outbound::Ack(packet_id) => {
                    let bytes = encode_packet(&PacketHeader::ack(packet_id), &[])?;
                    writer.write_all(&bytes).await?;
                    continue;
                }
                Outbound::Message {
                    packet_id,
                    parts,
                    level,
                    receipt,
                } => (packet_id, parts, level, receipt),
            };

            let flags = if level == DeliveryTrackingLevel::Full {
                PacketFlags::REQUEST_ACK
            } else {
                PacketFlags::NONE
            };
            let bytes = match encode_packet(&PacketHeader::message(packet_id, flags), &parts) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(address = %self.address, error = %e, "Dropping unencodable message");
                    if let Some(receipt) = receipt {
                        receipt.complete(Err(e.into()));
                    }
                    continue;
                }
            };

            // Registered before writing so a fast Ack cannot miss it
            if level == DeliveryTrackingLevel::Full {
                if let Some(receipt) = receipt.take() {
                    self.pending_acks.lock().insert(packet_id, receipt);
                }
            }

            writer.write_all(&bytes).await?;

            if level == DeliveryTrackingLevel::Sent {
                writer.flush().await?;
                if let Some(receipt) = receipt.take() {
                    receipt.complete(Ok(()));
                }
            }
        }
        Ok(())
    }

    fn read_error(&self, error: std::io::Error) -> RpcClientError {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            RpcClientError::connection_lost(self.address.clone(), "connection closed by peer")
        } else {
            error.into()
        }
    }

    fn fail_pending_acks(&self) {
        let pending: Vec<ReceiptSender> = self.pending_acks.lock().drain().map(|(_, r)| r).collect();
        for receipt in pending {
            receipt.complete(Err(RpcClientError::connection_lost(
                self.address.clone(),
                "bus closed before acknowledgement",
            )));
        }
    }

    /// Move to `Closed` exactly once and tell the listener
    fn terminate(&self, error: Option<RpcClientError>) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        // Stored before the state flips so wait_connected sees it
        if let Some(error) = &error {
            *self.last_error.lock() = Some(error.clone());
        }
        self.state.send_replace(BusState::Closed);
        self.shutdown.send_replace(true);
        self.fail_pending_acks();

        match &error {
            Some(error) => {
                warn!(address = %self.address, error = %error, "Bus terminated");
                notify_listener(&self.address, "on_exception", || {
                    self.listener.on_exception(self, error)
                });
            }
            None => info!(address = %self.address, "Bus closed"),
        }
        notify_listener(&self.address, "on_disconnect", || {
            self.listener.on_disconnect(self)
        });
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

#[async_trait]
impl Bus for TcpBus {
    fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> BusState {
        *self.state.borrow()
    }

    fn send(&self, parts: Vec<Bytes>, level: DeliveryTrackingLevel) -> SendReceipt {
        if self.is_closed() {
            return SendReceipt::ready(Err(RpcClientError::closed(format!(
                "bus to {}",
                self.address
            ))));
        }

        let packet_id = Guid::create();
        let (receipt_tx, receipt) = match level {
            DeliveryTrackingLevel::None => (None, SendReceipt::ready(Ok(()))),
            DeliveryTrackingLevel::Sent | DeliveryTrackingLevel::Full => {
                let (tx, receipt) = SendReceipt::pending(self.address.clone());
                (Some(tx), receipt)
            }
        };

        let queued = self.outbound.send(Outbound::Message {
            packet_id,
            parts,
            level,
            receipt: receipt_tx,
        });
        if queued.is_err() {
            return SendReceipt::ready(Err(RpcClientError::closed(format!(
                "bus to {}",
                self.address
            ))));
        }
        receipt
    }

    fn close(&self) {
        self.terminate(None);
    }

    async fn wait_connected(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        let current = match state.wait_for(|s| *s != BusState::Connecting).await {
            Ok(s) => *s,
            Err(_) => BusState::Closed,
        };
        if current == BusState::Connected {
            return Ok(());
        }
        let error = self.last_error.lock().clone();
        Err(error.unwrap_or_else(|| {
            RpcClientError::connection_lost(self.address.clone(), "bus closed before connecting")
        }))
    }
}

impl std::fmt::Debug for TcpBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpBus")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
