//! # Proxy Client
//!
//! ## Purpose
//!
//! The entry point applications hold: one [`DataCenter`] per configured
//! name, a [`PeriodicDiscovery`] feeding each, a background ping loop that
//! keeps scores fresh, and failover dispatch for every request.
//!
//! ## Request Flow
//!
//! ```text
//! invoke(request)
//!   └─► select_destinations(local first, then by score)
//!         └─► execute(request, candidates, failover_attempts)
//!               └─► RpcClient::send on each candidate in turn
//! ```

use crate::balancing::{execute, select_destinations};
use crate::bus::BusConnector;
use crate::data_center::DataCenter;
use crate::discovery::{PeriodicDiscovery, ProxyLister, RpcProxyLister};
use crate::error::{Result, RpcClientError};
use crate::pool::{Destination, DestinationPool};
use crate::rpc::{RpcClientOptions, RpcRequest, RpcResponse, TypedRequest};
use futures::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rpc_config::{ClientConfig, RpcOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct ProxyClient {
    /// Local data center first when one is configured
    data_centers: Vec<Arc<DataCenter>>,
    /// Name of the data center tried first, if any
    local: Option<String>,
    options: RpcOptions,
    discovery: Vec<PeriodicDiscovery>,
    ping_shutdown: watch::Sender<bool>,
    ping_handle: Mutex<Option<JoinHandle<()>>>,
    rng: Mutex<StdRng>,
    closed: AtomicBool,
}

impl ProxyClient {
    /// Build data centers and start discovery and pings
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(connector: Arc<dyn BusConnector>, config: &ClientConfig) -> Result<Self> {
        let client_options = RpcClientOptions::from_config(&config.rpc, &config.credentials);
        let lister = Arc::new(RpcProxyLister::new(
            Arc::clone(&connector),
            client_options,
            config.rpc.connect_timeout() + config.rpc.default_request_timeout(),
        ));
        Self::with_lister(connector, config, lister)
    }

    /// Like [`ProxyClient::new`] with a custom proxy list source
    pub fn with_lister(
        connector: Arc<dyn BusConnector>,
        config: &ClientConfig,
        lister: Arc<dyn ProxyLister>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RpcClientError::configuration(format!("{:#}", e), None))?;

        let options = config.rpc.clone();
        let client_options = RpcClientOptions::from_config(&options, &config.credentials);

        let mut data_centers = Vec::new();
        let mut discovery = Vec::new();
        for name in config.data_center_names() {
            let pool = DestinationPool::new(
                name.clone(),
                Arc::clone(&connector),
                client_options.clone(),
                options.connect_timeout(),
            );
            let dc = Arc::new(DataCenter::new(pool));
            let seeds = config.data_centers.get(&name).cloned().unwrap_or_default();
            discovery.push(PeriodicDiscovery::start(
                Arc::clone(&dc),
                seeds,
                Arc::clone(&lister),
                options.discovery_period(),
            ));
            data_centers.push(dc);
        }

        let local = config
            .local_data_center
            .clone()
            .filter(|_| options.prefer_local_data_center);
        let (ping_shutdown, ping_rx) = watch::channel(false);
        let ping_handle = tokio::spawn(ping_loop(data_centers.clone(), options.clone(), ping_rx));

        info!(
            data_centers = data_centers.len(),
            local = ?config.local_data_center,
            "Proxy client started"
        );

        Ok(Self {
            data_centers,
            local,
            options,
            discovery,
            ping_shutdown,
            ping_handle: Mutex::new(Some(ping_handle)),
            rng: Mutex::new(StdRng::from_entropy()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn data_centers(&self) -> &[Arc<DataCenter>] {
        &self.data_centers
    }

    pub fn data_center(&self, name: &str) -> Option<&Arc<DataCenter>> {
        self.data_centers.iter().find(|dc| dc.name() == name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ranked candidates for one request
    pub fn select_destinations(&self) -> Vec<Destination> {
        let mut rng = self.rng.lock();
        select_destinations(
            &self.data_centers,
            self.local.as_deref(),
            self.options.candidates_per_request,
            &mut *rng,
            self.options.randomize_data_centers,
        )
    }

    /// Send `request` with failover across the selected candidates
    ///
    /// With no live destination anywhere, waits for the first data center to
    /// get one, for at most the request timeout.
    pub async fn invoke(&self, request: RpcRequest) -> Result<RpcResponse> {
        if self.is_closed() {
            return Err(RpcClientError::closed("proxy client"));
        }

        let mut candidates = self.select_destinations();
        if candidates.is_empty() {
            let Some(first) = self.data_centers.first() else {
                return Err(RpcClientError::no_proxies("none configured"));
            };
            let wait = request
                .timeout
                .unwrap_or_else(|| self.options.default_request_timeout());
            debug!(data_center = %first.name(), wait_ms = wait.as_millis() as u64, "Waiting for a destination");
            match first.pool().peek_client(tokio::time::sleep(wait)).await? {
                Some(destination) => candidates.push(destination),
                None => return Err(RpcClientError::no_proxies(first.name())),
            }
        }

        execute(&request, &candidates, self.options.failover_attempts).await
    }

    pub async fn invoke_typed<T: TypedRequest>(&self, request: &T) -> Result<T::Response> {
        let response = self.invoke(request.to_rpc_request()?).await?;
        request.parse_response(response)
    }

    /// Ping every data center once
    pub async fn ping_data_centers(&self) {
        ping_all(&self.data_centers, &self.options).await;
    }

    /// Stop discovery and pings, then close every data center
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for discovery in &self.discovery {
            discovery.stop().await;
        }
        self.ping_shutdown.send_replace(true);
        let handle = self.ping_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Ping task failed");
            }
        }
        for dc in &self.data_centers {
            dc.close();
        }
        info!("Proxy client closed");
    }
}

impl Drop for ProxyClient {
    fn drop(&mut self) {
        self.ping_shutdown.send_replace(true);
        if let Some(handle) = self.ping_handle.get_mut().take() {
            handle.abort();
        }
    }
}

async fn ping_all(data_centers: &[Arc<DataCenter>], options: &RpcOptions) {
    let timeout = options.ping_timeout();
    join_all(data_centers.iter().map(|dc| dc.ping(timeout))).await;
}

async fn ping_loop(
    data_centers: Vec<Arc<DataCenter>>,
    options: RpcOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(options.ping_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = interval.tick() => {}
        }
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ping_all(&data_centers, &options) => {}
        }
    }
}
