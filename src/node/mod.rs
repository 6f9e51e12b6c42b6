//! Cluster Node
//!
//! Wires the components together in a fixed order (record store, transport,
//! membership, sync engine, discovery) and supervises their loops in one
//! `JoinSet` driven by a shared `watch` shutdown signal.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::ClusterConfig;
use crate::discovery::DiscoveryService;
use crate::error::{ClusterError, Result};
use crate::membership::MembershipService;
use crate::membership::types::NodeId;
use crate::records::store::{RecordStore, RecordView};
use crate::records::types::{DnsRecord, LocalChange};
use crate::status::{ClusterStatus, StatusReporter};
use crate::sync::{RecordListener, SyncEngine, SyncStatistics};
use crate::transport::Transport;

pub struct ClusterNode {
    config: ClusterConfig,
    engine: Arc<SyncEngine>,
    membership: Option<Arc<MembershipService>>,
    discovery: Option<Arc<DiscoveryService>>,
    reporter: StatusReporter,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
}

impl ClusterNode {
    /// Starts a node. A socket bind failure is returned as [`ClusterError::Bind`].
    pub async fn start(config: ClusterConfig) -> Result<Arc<Self>> {
        config.validate()?;
        info!("Starting node {} (service '{}')", config.node_id, config.service_name);

        let store = Arc::new(RecordStore::new(config.node_id.clone()));
        let stats = Arc::new(SyncStatistics::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let (engine, membership, discovery) = if config.enable_sync {
            let transport = Transport::bind(&config).await?;
            let discovery_port = transport.discovery_addr()?.port();

            let membership = MembershipService::new(&config, Arc::clone(&transport.protocol), discovery_port)?;
            let engine = SyncEngine::new(
                Arc::clone(&store),
                Some(Arc::clone(&membership)),
                Arc::clone(&stats),
                config.timings.clone(),
            );
            let discovery = DiscoveryService::new(
                &config,
                Arc::clone(&transport.discovery),
                Arc::clone(&membership),
                Arc::clone(&stats),
            )?;

            let events = membership.subscribe();
            tasks.spawn(Arc::clone(&membership).run_receiver(shutdown_rx.clone()));
            tasks.spawn(Arc::clone(&membership).run(shutdown_rx.clone()));
            tasks.spawn(Arc::clone(&engine).run_membership_events(events, shutdown_rx.clone()));
            tasks.spawn(Arc::clone(&engine).run(shutdown_rx.clone()));
            tasks.spawn(Arc::clone(&discovery).run_receiver(shutdown_rx.clone()));
            tasks.spawn(Arc::clone(&discovery).run(shutdown_rx));

            info!(
                "Node {} protocol on {}, discovery on port {}",
                config.node_id,
                membership.advertised_addr(),
                discovery_port
            );
            (engine, Some(membership), Some(discovery))
        } else {
            info!("Synchronization disabled, records stay local");
            let engine = SyncEngine::new(Arc::clone(&store), None, stats, config.timings.clone());
            (engine, None, None)
        };

        let running = Arc::new(AtomicBool::new(true));
        let reporter = StatusReporter::new(
            Arc::clone(&engine),
            membership.clone(),
            discovery.clone(),
            Arc::clone(&running),
        );

        let node = Arc::new(Self {
            config,
            engine,
            membership,
            discovery,
            reporter,
            running,
            shutdown,
            tasks: Mutex::new(tasks),
        });

        for seed in node.config.seeds.clone() {
            if let Err(e) = node.join(seed).await {
                warn!("Failed to contact seed {}: {}", seed, e);
            }
        }

        Ok(node)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        self.engine.store()
    }

    pub fn membership(&self) -> Option<&Arc<MembershipService>> {
        self.membership.as_ref()
    }

    pub fn discovery(&self) -> Option<&Arc<DiscoveryService>> {
        self.discovery.as_ref()
    }

    /// Advertised protocol address, if sync is enabled.
    pub fn protocol_addr(&self) -> Option<SocketAddr> {
        self.membership.as_ref().map(|membership| membership.advertised_addr())
    }

    /// Advertised discovery address, if sync is enabled.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery.as_ref().map(|discovery| {
            let announcement = discovery.local_announcement();
            SocketAddr::new(announcement.ip, announcement.discovery_port)
        })
    }

    pub fn records(&self) -> RecordView {
        self.engine.view()
    }

    pub fn add_record(&self, hostname: &str, ip: &str, ttl: u32) -> Result<DnsRecord> {
        self.engine.add_record(hostname, ip, ttl)
    }

    pub fn remove_record(&self, hostname: &str) -> Result<bool> {
        self.engine.remove_record(hostname)
    }

    pub fn apply_local_change(&self, change: LocalChange) -> Option<DnsRecord> {
        self.engine.apply_local_change(change)
    }

    pub fn add_listener(&self, listener: Arc<dyn RecordListener>) {
        self.engine.add_listener(listener);
    }

    pub async fn force_sync(&self) -> Result<usize> {
        self.engine.force_sync().await
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        self.reporter.cluster_status()
    }

    pub async fn join(&self, seed: SocketAddr) -> Result<()> {
        let membership = self.membership.as_ref().ok_or(ClusterError::SyncDisabled)?;
        membership.join(seed).await
    }

    pub fn add_discovery_target(&self, addr: SocketAddr) -> Result<()> {
        let discovery = self.discovery.as_ref().ok_or(ClusterError::SyncDisabled)?;
        discovery.add_target(addr);
        Ok(())
    }

    /// Graceful stop: LEAVE to all peers, then stop the loops within the grace period.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down node {}", self.config.node_id);

        if let Some(membership) = &self.membership {
            membership.leave().await;
        }
        let _ = self.shutdown.send(true);

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let grace = self.config.timings.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Background tasks still running after {:?}, aborting", grace);
            tasks.abort_all();
        }
        info!("Node {} stopped", self.config.node_id);
    }

    /// Immediate stop without LEAVE; peers find out through failure detection.
    pub fn abort(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        self.tasks.lock().abort_all();
        warn!("Node {} aborted", self.config.node_id);
    }
}

#[cfg(test)]
mod tests;
