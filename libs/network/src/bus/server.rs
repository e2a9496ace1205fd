//! Accepting side of the TCP bus
//!
//! Only test peers and fake proxies listen; the client itself never does.
//! Every accepted connection becomes a [`TcpBus`] sharing one listener.

use super::tcp::TcpBus;
use super::{Bus, BusListener};
use crate::error::Result;
use parking_lot::Mutex;
use rpc_codec::PacketLimits;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct TcpBusServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    connections: Arc<Mutex<Vec<Arc<TcpBus>>>>,
}

impl TcpBusServer {
    /// Bind `address` and start accepting connections
    pub async fn listen(
        address: &str,
        listener: Arc<dyn BusListener>,
        limits: PacketLimits,
    ) -> Result<Self> {
        let socket = TcpListener::bind(address).await?;
        let local_addr = socket.local_addr()?;
        info!(address = %local_addr, "Bus server listening");

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let connections: Arc<Mutex<Vec<Arc<TcpBus>>>> = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = socket.accept() => match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Accepted bus connection");
                            let bus = TcpBus::accepted(stream, peer, Arc::clone(&listener), limits);
                            let mut connections = accepted.lock();
                            connections.retain(|bus| !bus.is_closed());
                            connections.push(bus);
                        }
                        Err(e) => warn!(error = %e, "Failed to accept bus connection"),
                    }
                }
            }
            debug!(address = %local_addr, "Bus server stopped accepting");
        });

        Ok(Self {
            local_addr,
            shutdown,
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepted connections that are still open
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|bus| !bus.is_closed())
            .count()
    }

    /// Stop accepting and close every accepted connection
    pub fn close(&self) {
        self.shutdown.send_replace(true);
        let connections: Vec<Arc<TcpBus>> = self.connections.lock().drain(..).collect();
        for bus in connections {
            bus.close();
        }
    }
}

impl Drop for TcpBusServer {
    fn drop(&mut self) {
        self.close();
    }
}
