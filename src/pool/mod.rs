//! Topology-aware connection pool.
//!
//! The pool maintains a fixed number of connections per host and routes
//! each request according to the configured [`Topology`]: single-server and
//! cluster deployments pick a random host, active failover routes to the
//! discovered leader (see [`active_failover`]).

mod active_failover;
mod random;

pub use active_failover::ActiveFailoverPool;
pub use random::RandomHostPool;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::config::{HostDescription, Topology};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::{DriverError, DriverResult};
use crate::request::Request;
use crate::response::Response;

/// Routes requests over a set of per-host connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Reconcile the pool against `hosts`: connect to new hosts, close
    /// connections to removed ones.
    ///
    /// A host whose connections fail to initialize is skipped (and logged)
    /// without aborting the rest; the pool is usable as long as at least one
    /// host remains.
    async fn update_connections(&self, hosts: &[HostDescription]) -> DriverResult<()>;

    /// Route one request according to the topology.
    async fn execute(&self, request: Request) -> DriverResult<Response>;

    /// Close every connection in the pool.
    async fn close(&self);
}

/// Build the pool implementation for `topology`.
pub fn create_pool(
    topology: Topology,
    connections_per_host: usize,
    factory: Arc<dyn ConnectionFactory>,
) -> Arc<dyn ConnectionPool> {
    let core = PoolCore::new(connections_per_host, factory);
    match topology {
        Topology::SingleServer | Topology::Cluster => Arc::new(RandomHostPool::new(core)),
        Topology::ActiveFailover => Arc::new(ActiveFailoverPool::new(core)),
    }
}

/// State and plumbing shared by every pool implementation: the host map,
/// its update logic and connection construction.
pub(crate) struct PoolCore {
    connections_per_host: usize,
    factory: Arc<dyn ConnectionFactory>,
    /// Host → initialized connections. Mutated only while `update_lock` is
    /// held; routing takes cheap read-locked snapshots.
    connections: RwLock<HashMap<HostDescription, Vec<Arc<dyn Connection>>>>,
    update_lock: tokio::sync::Mutex<()>,
}

impl PoolCore {
    pub(crate) fn new(connections_per_host: usize, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            connections_per_host,
            factory,
            connections: RwLock::new(HashMap::new()),
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot of the current host map for routing.
    pub(crate) fn snapshot(&self) -> HashMap<HostDescription, Vec<Arc<dyn Connection>>> {
        match self.connections.read() {
            Ok(map) => map.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reconcile the host map against `hosts`.
    pub(crate) async fn update(&self, hosts: &[HostDescription]) -> DriverResult<()> {
        let _guard = self.update_lock.lock().await;

        let current: Vec<HostDescription> = self.snapshot().keys().cloned().collect();
        let mut additions: Vec<HostDescription> = hosts
            .iter()
            .filter(|&host| !current.contains(host))
            .cloned()
            .collect();
        additions.dedup();
        let removals: Vec<HostDescription> = current
            .iter()
            .filter(|&host| !hosts.contains(host))
            .cloned()
            .collect();
        tracing::debug!(?additions, ?removals, "updating pool connections");

        let mut first_error = None;
        let mut tasks: JoinSet<(HostDescription, DriverResult<Vec<Arc<dyn Connection>>>)> =
            JoinSet::new();
        for host in additions {
            let factory = self.factory.clone();
            let n = self.connections_per_host;
            tasks.spawn(async move {
                let result = build_host_connections(factory, &host, n).await;
                (host, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((host, Ok(connections))) => {
                    self.insert(host, connections);
                }
                Ok((host, Err(error))) => {
                    tracing::warn!(%host, %error, "host skipped: connections failed to initialize");
                    first_error.get_or_insert(error);
                }
                Err(join_error) => {
                    tracing::warn!(%join_error, "host setup task failed");
                    first_error
                        .get_or_insert(DriverError::transport("host setup task failed"));
                }
            }
        }

        for host in removals {
            if let Some(connections) = self.remove(&host) {
                close_all(connections).await;
            }
        }

        if self.is_map_empty() {
            return Err(first_error
                .unwrap_or_else(|| DriverError::transport("no host in the pool is reachable")));
        }
        Ok(())
    }

    /// Close every connection and empty the map.
    pub(crate) async fn close(&self) {
        let _guard = self.update_lock.lock().await;
        let drained: Vec<Arc<dyn Connection>> = {
            match self.connections.write() {
                Ok(mut map) => map.drain().flat_map(|(_, conns)| conns).collect(),
                Err(poisoned) => poisoned
                    .into_inner()
                    .drain()
                    .flat_map(|(_, conns)| conns)
                    .collect(),
            }
        };
        close_all(drained).await;
    }

    fn insert(&self, host: HostDescription, connections: Vec<Arc<dyn Connection>>) {
        match self.connections.write() {
            Ok(mut map) => {
                map.insert(host, connections);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(host, connections);
            }
        }
    }

    fn remove(&self, host: &HostDescription) -> Option<Vec<Arc<dyn Connection>>> {
        match self.connections.write() {
            Ok(mut map) => map.remove(host),
            Err(poisoned) => poisoned.into_inner().remove(host),
        }
    }

    fn is_map_empty(&self) -> bool {
        match self.connections.read() {
            Ok(map) => map.is_empty(),
            Err(poisoned) => poisoned.into_inner().is_empty(),
        }
    }
}

/// Create and initialize all of a host's connections concurrently. All of
/// them must succeed for the host to join the map; on failure the ones that
/// did come up are closed again.
async fn build_host_connections(
    factory: Arc<dyn ConnectionFactory>,
    host: &HostDescription,
    count: usize,
) -> DriverResult<Vec<Arc<dyn Connection>>> {
    let mut connections = Vec::with_capacity(count);
    for _ in 0..count {
        connections.push(factory.create(host)?);
    }

    let mut tasks: JoinSet<DriverResult<()>> = JoinSet::new();
    for connection in &connections {
        let connection = connection.clone();
        tasks.spawn(async move { connection.initialize().await });
    }
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .unwrap_or_else(|_| Err(DriverError::transport("initialization task failed")));
        if let Err(error) = result {
            first_error.get_or_insert(error);
        }
    }
    if let Some(error) = first_error {
        close_all(connections).await;
        return Err(error);
    }
    Ok(connections)
}

/// Close connections concurrently.
async fn close_all(connections: Vec<Arc<dyn Connection>>) {
    let mut tasks = JoinSet::new();
    for connection in connections {
        tasks.spawn(async move { connection.close().await });
    }
    while tasks.join_next().await.is_some() {}
}

/// Pick a random element of a non-empty slice.
pub(crate) fn random_item<T: Clone>(items: &[T]) -> Option<T> {
    use rand::Rng;
    if items.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..items.len());
    Some(items[index].clone())
}
