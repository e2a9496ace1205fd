//! Periodic proxy discovery
//!
//! One background task per data center. Every period it asks the seeds, in
//! random order, for the advertised proxy list and applies the first answer
//! to the data center's pool. A round where every seed fails is logged and
//! left for the next tick.
//!
//! [`PeriodicDiscovery::stop`] waits for the task to exit, so once it
//! returns no further pool updates can happen.

use crate::bus::BusConnector;
use crate::data_center::DataCenter;
use crate::error::{Result, RpcClientError};
use crate::rpc::{RpcClient, RpcClientOptions, RpcRequest, DISCOVERY_SERVICE, DISCOVER_PROXIES_METHOD};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Source of the advertised proxy list
#[async_trait]
pub trait ProxyLister: Send + Sync {
    async fn list_proxies(&self, seed: &str) -> Result<Vec<String>>;
}

/// Asks a seed's `DiscoveryService.DiscoverProxies` over a short-lived bus
///
/// The response body is a bincode `Vec<String>` of proxy addresses.
pub struct RpcProxyLister {
    connector: Arc<dyn BusConnector>,
    client_options: RpcClientOptions,
    timeout: Duration,
}

impl RpcProxyLister {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        client_options: RpcClientOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            connector,
            client_options,
            timeout,
        }
    }
}

#[async_trait]
impl ProxyLister for RpcProxyLister {
    async fn list_proxies(&self, seed: &str) -> Result<Vec<String>> {
        let client = RpcClient::connect(self.connector.as_ref(), seed, self.client_options.clone());
        let result = async {
            tokio::time::timeout(self.timeout, client.wait_connected())
                .await
                .map_err(|_| {
                    RpcClientError::timeout(
                        format!("connect to seed {}", seed),
                        self.timeout.as_millis() as u64,
                    )
                })??;
            let request = RpcRequest::new(DISCOVERY_SERVICE, DISCOVER_PROXIES_METHOD, Bytes::new())
                .with_timeout(self.timeout);
            let response = client.send(&request).await?;
            let proxies: Vec<String> = bincode::deserialize(&response.body)?;
            Ok::<_, RpcClientError>(proxies)
        }
        .await;
        client.close();
        result
    }
}

/// Encode a proxy list the way [`RpcProxyLister`] expects it
pub fn encode_proxy_list(proxies: &[String]) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(proxies)?))
}

pub struct PeriodicDiscovery {
    data_center: String,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicDiscovery {
    /// Spawn the discovery loop; the first round runs immediately
    pub fn start(
        data_center: Arc<DataCenter>,
        seeds: Vec<String>,
        lister: Arc<dyn ProxyLister>,
        period: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let name = data_center.name().to_string();
        let handle = tokio::spawn(discovery_loop(data_center, seeds, lister, period, shutdown_rx));
        info!(data_center = %name, period_ms = period.as_millis() as u64, "Discovery started");
        Self {
            data_center: name,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(data_center = %self.data_center, error = %e, "Discovery task failed");
            }
            info!(data_center = %self.data_center, "Discovery stopped");
        }
    }
}

impl Drop for PeriodicDiscovery {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

async fn discovery_loop(
    data_center: Arc<DataCenter>,
    seeds: Vec<String>,
    lister: Arc<dyn ProxyLister>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut known: BTreeSet<String> = BTreeSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = interval.tick() => {}
        }

        let proxies = tokio::select! {
            _ = shutdown.changed() => return,
            proxies = discover_once(&data_center, &seeds, lister.as_ref()) => proxies,
        };
        let Some(proxies) = proxies else {
            continue;
        };
        if *shutdown.borrow() {
            return;
        }

        let current: BTreeSet<String> = proxies.iter().cloned().collect();
        let added: Vec<&String> = current.difference(&known).collect();
        let removed: Vec<&String> = known.difference(&current).collect();
        if !added.is_empty() || !removed.is_empty() {
            info!(
                data_center = %data_center.name(),
                added = ?added,
                removed = ?removed,
                "Proxy set changed"
            );
        }

        // Also reconnects proxies whose connections died
        if let Err(e) = data_center.set_proxies(proxies).await {
            warn!(data_center = %data_center.name(), error = %e, "Failed to apply proxy list");
            return;
        }
        known = current;
    }
}

async fn discover_once(
    data_center: &DataCenter,
    seeds: &[String],
    lister: &dyn ProxyLister,
) -> Option<Vec<String>> {
    let mut order: Vec<&String> = seeds.iter().collect();
    order.shuffle(&mut rand::thread_rng());

    for seed in order {
        match lister.list_proxies(seed).await {
            Ok(proxies) => {
                debug!(
                    data_center = %data_center.name(),
                    seed = %seed,
                    count = proxies.len(),
                    "Discovered proxies"
                );
                return Some(proxies);
            }
            Err(e) => warn!(
                data_center = %data_center.name(),
                seed = %seed,
                error = %e,
                "Discovery query failed"
            ),
        }
    }
    warn!(data_center = %data_center.name(), seeds = seeds.len(), "No seed answered discovery");
    None
}
