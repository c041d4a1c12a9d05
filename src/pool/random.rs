//! Random-host routing for single-server and cluster deployments.

use async_trait::async_trait;

use crate::config::HostDescription;
use crate::error::{DriverError, DriverResult};
use crate::request::Request;
use crate::response::Response;

use super::{random_item, ConnectionPool, PoolCore};

/// Routes every request to a random connection of a random host.
///
/// With a single server this degenerates to spreading requests over that
/// host's connections; with a cluster it spreads load over coordinators.
pub struct RandomHostPool {
    core: PoolCore,
}

impl RandomHostPool {
    pub(crate) fn new(core: PoolCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl ConnectionPool for RandomHostPool {
    async fn update_connections(&self, hosts: &[HostDescription]) -> DriverResult<()> {
        self.core.update(hosts).await
    }

    async fn execute(&self, request: Request) -> DriverResult<Response> {
        let snapshot = self.core.snapshot();
        let hosts: Vec<HostDescription> = snapshot.keys().cloned().collect();
        let host = random_item(&hosts)
            .ok_or_else(|| DriverError::transport("no open connections in the pool"))?;
        let connection = snapshot
            .get(&host)
            .and_then(|connections| random_item(connections))
            .ok_or_else(|| DriverError::transport("no open connections in the pool"))?;
        tracing::debug!(%host, "routing request");
        connection.execute(request).await
    }

    async fn close(&self) {
        self.core.close().await;
    }
}
