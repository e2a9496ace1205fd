//! # Destination Pool
//!
//! ## Purpose
//!
//! The set of connected proxies for one data center. Readers borrow a
//! [`Destination`] lease; the discovery loop replaces the address set with
//! [`DestinationPool::update_clients`].
//!
//! ## Invariants
//!
//! - Only `update_clients` changes the live set, and updates run one at a
//!   time.
//! - A destination becomes visible only after its bus is connected.
//! - Lease counts change only under the pool lock, so a destination cannot
//!   be closed while a peek is handing it out.
//! - A destination removed while leased stays open ("lingering") until the
//!   last lease is dropped; an unleased one closes immediately.
//! - A queued peek resolves at most once and leaves nothing behind when
//!   its `done` future wins.

use crate::bus::BusConnector;
use crate::error::{Result, RpcClientError};
use crate::rpc::{RpcClient, RpcClientOptions};
use futures::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct DestinationEntry {
    address: String,
    client: RpcClient,
    /// Outstanding leases; only changed under the pool state lock
    refs: AtomicUsize,
    /// Out of the live set; closes when `refs` reaches zero
    removed: AtomicBool,
}

impl DestinationEntry {
    fn is_usable(&self) -> bool {
        !self.client.is_closed()
    }

    /// Drop one lease; true when the caller must close the client
    fn release(&self) -> bool {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        previous == 1 && self.removed.load(Ordering::Acquire)
    }
}

type PeekSender = oneshot::Sender<Result<Destination>>;

struct PoolState {
    live: BTreeMap<String, Arc<DestinationEntry>>,
    waiters: HashMap<u64, PeekSender>,
    next_waiter_id: u64,
    rng: StdRng,
    closed: bool,
}

struct PoolInner {
    name: String,
    connector: Arc<dyn BusConnector>,
    client_options: RpcClientOptions,
    connect_timeout: Duration,
    update_lock: tokio::sync::Mutex<()>,
    state: Mutex<PoolState>,
}

/// Connected proxies of one data center
#[derive(Clone)]
pub struct DestinationPool {
    inner: Arc<PoolInner>,
}

impl DestinationPool {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn BusConnector>,
        client_options: RpcClientOptions,
        connect_timeout: Duration,
    ) -> Self {
        Self::with_rng(
            name,
            connector,
            client_options,
            connect_timeout,
            StdRng::from_entropy(),
        )
    }

    /// Pool with a caller-supplied random source, for reproducible selection
    pub fn with_rng(
        name: impl Into<String>,
        connector: Arc<dyn BusConnector>,
        client_options: RpcClientOptions,
        connect_timeout: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                connector,
                client_options,
                connect_timeout,
                update_lock: tokio::sync::Mutex::new(()),
                state: Mutex::new(PoolState {
                    live: BTreeMap::new(),
                    waiters: HashMap::new(),
                    next_waiter_id: 0,
                    rng,
                    closed: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Live addresses in sorted order
    pub fn addresses(&self) -> Vec<String> {
        self.inner.state.lock().live.keys().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.inner.state.lock().live.len()
    }

    /// Peeks queued waiting for a destination
    pub fn waiting_peeks(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Replace the live set with `addresses`
    ///
    /// New addresses are dialed concurrently; failures are logged and the
    /// address is retried by the next update. Completes once every dial has
    /// finished. Fails only if the pool is closed.
    pub async fn update_clients(&self, addresses: Vec<String>) -> Result<()> {
        let _serial = self.inner.update_lock.lock().await;
        let desired: BTreeSet<String> = addresses.into_iter().collect();

        let (to_close, to_connect) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(self.inner.closed_error());
            }

            let stale: Vec<String> = state
                .live
                .iter()
                .filter(|(address, entry)| !desired.contains(*address) || !entry.is_usable())
                .map(|(address, _)| address.clone())
                .collect();

            let mut to_close = Vec::new();
            for address in stale {
                if let Some(entry) = state.live.remove(&address) {
                    entry.removed.store(true, Ordering::Release);
                    let refs = entry.refs.load(Ordering::Acquire);
                    if refs == 0 {
                        to_close.push(entry);
                    } else {
                        debug!(
                            data_center = %self.inner.name,
                            address = %address,
                            refs,
                            "Destination lingering until released"
                        );
                    }
                }
            }

            let to_connect: Vec<String> = desired
                .iter()
                .filter(|address| !state.live.contains_key(*address))
                .cloned()
                .collect();
            (to_close, to_connect)
        };

        for entry in to_close {
            info!(data_center = %self.inner.name, address = %entry.address, "Closing removed destination");
            entry.client.close();
        }

        let connected = join_all(
            to_connect
                .into_iter()
                .map(|address| self.inner.connect_one(address)),
        )
        .await;

        let mut orphaned = Vec::new();
        let deliveries = {
            let mut state = self.inner.state.lock();
            if state.closed {
                orphaned.extend(connected.into_iter().filter_map(|(_, client)| client));
                Vec::new()
            } else {
                for (address, client) in connected {
                    if let Some(client) = client {
                        let entry = Arc::new(DestinationEntry {
                            address: address.clone(),
                            client,
                            refs: AtomicUsize::new(0),
                            removed: AtomicBool::new(false),
                        });
                        state.live.insert(address, entry);
                    }
                }
                self.inner.serve_waiters(&mut state, desired.is_empty())
            }
        };

        for client in orphaned {
            client.close();
        }
        // Outside the lock: a refused delivery drops its lease here
        for (waiter, result) in deliveries {
            let _ = waiter.send(result);
        }

        if self.is_closed() {
            return Err(self.inner.closed_error());
        }
        debug!(
            data_center = %self.inner.name,
            live = self.live_count(),
            "Destination pool updated"
        );
        Ok(())
    }

    /// A destination now, or wait for one until `done` completes
    ///
    /// Resolves synchronously when the live set is non-empty. A queued peek
    /// resolves with the first destination to connect, with
    /// `NoProxiesAvailable` if an empty update arrives while it waits, or
    /// with `Ok(None)` if `done` completes first.
    pub async fn peek_client<F>(&self, done: F) -> Result<Option<Destination>>
    where
        F: Future<Output = ()>,
    {
        let (waiter_id, rx) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(self.inner.closed_error());
            }
            if let Some(destination) = self.inner.pick(&mut state) {
                return Ok(Some(destination));
            }
            let waiter_id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.insert(waiter_id, tx);
            (waiter_id, rx)
        };
        debug!(data_center = %self.inner.name, waiter_id, "Peek queued");

        let mut registration = WaiterRegistration {
            pool: &self.inner,
            waiter_id,
            armed: true,
        };
        tokio::pin!(done);
        tokio::select! {
            biased;
            result = rx => {
                registration.armed = false;
                match result {
                    Ok(result) => result.map(Some),
                    Err(_) => Err(self.inner.closed_error()),
                }
            }
            _ = &mut done => {
                debug!(data_center = %self.inner.name, waiter_id, "Peek abandoned");
                Ok(None)
            }
        }
    }

    /// A destination if one is live, without queueing
    pub fn try_peek_client(&self) -> Option<Destination> {
        let mut state = self.inner.state.lock();
        self.inner.pick(&mut state)
    }

    /// Lease on the destination for `address`, if it is live
    pub fn destination(&self, address: &str) -> Option<Destination> {
        let state = self.inner.state.lock();
        state
            .live
            .get(address)
            .map(|entry| Destination::acquire(entry, &self.inner))
    }

    /// Leases on every usable destination
    pub fn destinations(&self) -> Vec<Destination> {
        let state = self.inner.state.lock();
        state
            .live
            .values()
            .filter(|entry| entry.is_usable())
            .map(|entry| Destination::acquire(entry, &self.inner))
            .collect()
    }

    /// Up to `count` distinct usable destinations in random order
    pub fn select(&self, count: usize) -> Vec<Destination> {
        let mut state = self.inner.state.lock();
        let PoolState { live, rng, .. } = &mut *state;
        let usable: Vec<&Arc<DestinationEntry>> =
            live.values().filter(|entry| entry.is_usable()).collect();
        usable
            .choose_multiple(rng, count)
            .map(|entry| Destination::acquire(entry, &self.inner))
            .collect()
    }

    /// Close every unleased destination and fail queued peeks
    pub fn close(&self) {
        let (to_close, waiters) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let to_close: Vec<Arc<DestinationEntry>> = std::mem::take(&mut state.live)
                .into_values()
                .filter(|entry| {
                    entry.removed.store(true, Ordering::Release);
                    entry.refs.load(Ordering::Acquire) == 0
                })
                .collect();
            let waiters: Vec<PeekSender> = state.waiters.drain().map(|(_, tx)| tx).collect();
            (to_close, waiters)
        };

        info!(data_center = %self.inner.name, "Closing destination pool");
        for entry in to_close {
            entry.client.close();
        }
        for waiter in waiters {
            let _ = waiter.send(Err(self.inner.closed_error()));
        }
    }
}

impl std::fmt::Debug for DestinationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationPool")
            .field("name", &self.inner.name)
            .field("addresses", &self.addresses())
            .finish()
    }
}

impl PoolInner {
    fn closed_error(&self) -> RpcClientError {
        RpcClientError::closed(format!("destination pool '{}'", self.name))
    }

    /// Uniform choice among usable destinations; caller holds the lock
    fn pick(self: &Arc<Self>, state: &mut PoolState) -> Option<Destination> {
        let PoolState { live, rng, .. } = state;
        let usable: Vec<&Arc<DestinationEntry>> =
            live.values().filter(|entry| entry.is_usable()).collect();
        if usable.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..usable.len());
        Some(Destination::acquire(usable[index], self))
    }

    /// Hand queued peeks their results; the caller sends them after unlocking
    fn serve_waiters(
        self: &Arc<Self>,
        state: &mut PoolState,
        empty_update: bool,
    ) -> Vec<(PeekSender, Result<Destination>)> {
        if state.waiters.is_empty() {
            return Vec::new();
        }

        let mut deliveries = Vec::new();
        let waiters: Vec<(u64, PeekSender)> = state.waiters.drain().collect();
        for (waiter_id, waiter) in waiters {
            match self.pick(state) {
                Some(destination) => deliveries.push((waiter, Ok(destination))),
                None if empty_update => {
                    deliveries.push((waiter, Err(RpcClientError::no_proxies(self.name.clone()))))
                }
                None => {
                    state.waiters.insert(waiter_id, waiter);
                }
            }
        }
        deliveries
    }

    async fn connect_one(&self, address: String) -> (String, Option<RpcClient>) {
        let client = RpcClient::connect(
            self.connector.as_ref(),
            &address,
            self.client_options.clone(),
        );
        match tokio::time::timeout(self.connect_timeout, client.wait_connected()).await {
            Ok(Ok(())) => {
                info!(data_center = %self.name, address = %address, "Destination connected");
                (address, Some(client))
            }
            Ok(Err(e)) => {
                warn!(data_center = %self.name, address = %address, error = %e, "Failed to connect destination");
                client.close();
                (address, None)
            }
            Err(_) => {
                warn!(
                    data_center = %self.name,
                    address = %address,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Destination connect timed out"
                );
                client.close();
                (address, None)
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for entry in std::mem::take(&mut state.live).into_values() {
            entry.removed.store(true, Ordering::Release);
            if entry.refs.load(Ordering::Acquire) == 0 {
                entry.client.close();
            }
        }
    }
}

/// Removes a queued peek that is abandoned before being served
struct WaiterRegistration<'a> {
    pool: &'a Arc<PoolInner>,
    waiter_id: u64,
    armed: bool,
}

impl Drop for WaiterRegistration<'_> {
    fn drop(&mut self) {
        if self.armed {
            let removed = self.pool.state.lock().waiters.remove(&self.waiter_id);
            drop(removed);
        }
    }
}

/// A leased connection to one proxy
///
/// Holding a lease keeps the connection open even after the address leaves
/// the pool. Cloning takes another lease.
pub struct Destination {
    entry: Arc<DestinationEntry>,
    pool: Weak<PoolInner>,
}

impl Destination {
    /// Caller holds the pool state lock
    fn acquire(entry: &Arc<DestinationEntry>, pool: &Arc<PoolInner>) -> Self {
        entry.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            entry: Arc::clone(entry),
            pool: Arc::downgrade(pool),
        }
    }

    pub fn address(&self) -> &str {
        &self.entry.address
    }

    pub fn client(&self) -> &RpcClient {
        &self.entry.client
    }

    pub fn is_closed(&self) -> bool {
        self.entry.client.is_closed()
    }

    /// Leases currently held on this destination, this one included
    pub fn ref_count(&self) -> usize {
        self.entry.refs.load(Ordering::Acquire)
    }

    /// Whether the address has left the live set
    pub fn is_removed(&self) -> bool {
        self.entry.removed.load(Ordering::Acquire)
    }
}

impl Clone for Destination {
    fn clone(&self) -> Self {
        match self.pool.upgrade() {
            Some(pool) => {
                let _state = pool.state.lock();
                self.entry.refs.fetch_add(1, Ordering::AcqRel);
            }
            None => {
                self.entry.refs.fetch_add(1, Ordering::AcqRel);
            }
        }
        Self {
            entry: Arc::clone(&self.entry),
            pool: self.pool.clone(),
        }
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        let close = match self.pool.upgrade() {
            Some(pool) => {
                let _state = pool.state.lock();
                self.entry.release()
            }
            None => self.entry.release(),
        };
        if close {
            info!(address = %self.entry.address, "Closing released destination");
            self.entry.client.close();
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("address", &self.entry.address)
            .field("refs", &self.ref_count())
            .field("removed", &self.is_removed())
            .finish()
    }
}
