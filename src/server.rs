//! DNS server setup and lifecycle management.

use hickory_proto::rr::Name;
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::DnsConfig;
use crate::error::Error;
use crate::handler::{Fallthrough, NodeDnsHandler};
use crate::index::NodeIndex;
use crate::metrics;
use crate::resolve::{AddressResolver, RecursiveUpstream};
use crate::sync::SyncController;
use crate::watch;

/// Capacity of the node event channel between the watch and the sync loop.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Interval for emitting index metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP DNS connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    error!(%err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Periodically emit index metrics until the sync loop reports stopped.
async fn metrics_loop(index: NodeIndex, sync: SyncController) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        interval.tick().await;
        if sync.state() == crate::sync::SyncState::Stopped {
            debug!("metrics loop shutting down");
            return;
        }
        index.emit_metrics();
        metrics::record_ready(sync.has_synced());
        debug!(nodes = index.len(), ready = sync.has_synced(), "emitted index metrics");
    }
}

/// Authoritative DNS server for cluster node names.
pub struct DnsServer {
    config: DnsConfig,
    index: NodeIndex,
    sync: SyncController,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig) -> Self {
        let index = NodeIndex::new(config.address_class);
        let sync = SyncController::new(index.clone());
        Self {
            config,
            index,
            sync,
        }
    }

    /// Readiness probe: true once the initial node listing is replayed.
    pub fn ready(&self) -> bool {
        self.sync.has_synced()
    }

    /// Get a reference to the node index.
    pub fn index(&self) -> &NodeIndex {
        &self.index
    }

    /// Run the DNS server until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<(), Error> {
        info!(
            listen_addr = %self.config.listen_addr,
            zones = ?self.config.zones,
            address_class = ?self.config.address_class,
            "starting node-dns server"
        );

        let zones = self
            .config
            .zones
            .iter()
            .map(|z| Name::from_ascii(z))
            .collect::<Result<Vec<_>, _>>()?;
        let fallthrough = match &self.config.fallthrough {
            None => Fallthrough::disabled(),
            Some(list) => {
                let names = list
                    .iter()
                    .map(|z| Name::from_ascii(z))
                    .collect::<Result<Vec<_>, _>>()?;
                Fallthrough::enabled(&names)
            }
        };

        let mut resolver = AddressResolver::new(self.config.address_class);
        if self.config.resolve_node_dns_names {
            resolver = resolver.with_upstream(Arc::new(RecursiveUpstream::from_system_conf()?));
        }

        // Start the watch and the sync loop feeding the index.
        let client = watch::make_client(&self.config.kubernetes).await?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watch_handle = watch::spawn_node_watch(client, tx);
        let sync_handle = self.sync.start(rx)?;

        // Wait for the initial listing before serving queries.
        info!("waiting for initial node listing...");
        let mut shutdown = Box::pin(shutdown_signal());
        while !self.sync.has_synced() {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested before node sync completed");
                    self.shutdown(watch_handle, sync_handle).await;
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        info!(nodes = self.index.len(), "initial node listing complete");

        let handler = NodeDnsHandler::new(
            &zones,
            self.config.ttl,
            fallthrough,
            self.index.clone(),
            resolver,
        )?;

        let mut server = ServerFuture::new(handler);

        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        let metrics_handle = tokio::spawn(metrics_loop(self.index.clone(), self.sync.clone()));
        self.index.emit_metrics();
        metrics::record_ready(true);

        info!("DNS server ready to serve queries");

        tokio::select! {
            _ = &mut shutdown => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(err) = result {
                    error!(%err, "DNS server error");
                }
            }
        }

        if let Err(err) = server.shutdown_gracefully().await {
            error!(%err, "error during DNS server shutdown");
        }

        self.shutdown(watch_handle, sync_handle).await;
        let _ = metrics_handle.await;

        info!("node-dns stopped");
        Ok(())
    }

    /// Stop the sync loop and wait for the background tasks.
    async fn shutdown(
        &self,
        watch_handle: tokio::task::JoinHandle<()>,
        sync_handle: tokio::task::JoinHandle<()>,
    ) {
        if let Err(err) = self.sync.stop() {
            // A concurrent stop already won the race; nothing to do twice.
            error!(%err, "sync shutdown");
        }
        watch_handle.abort();
        let _ = watch_handle.await;
        let _ = sync_handle.await;
    }
}
