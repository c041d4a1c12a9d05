//! Leader-directed routing for active-failover deployments.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::config::HostDescription;
use crate::error::{DriverError, DriverResult};
use crate::request::{Request, RequestType};
use crate::response::Response;

use super::{random_item, ConnectionPool, PoolCore};

/// Probe answered with 503 by every server except the current leader.
fn current_database_probe() -> Request {
    Request::builder()
        .database("_system")
        .request_type(RequestType::Get)
        .path("/_api/database/current")
        .build()
}

/// Routes every request to the leader, re-discovering it whenever a 503
/// shows up.
pub struct ActiveFailoverPool {
    core: PoolCore,
    leader: RwLock<Option<HostDescription>>,
}

impl ActiveFailoverPool {
    pub(crate) fn new(core: PoolCore) -> Self {
        Self {
            core,
            leader: RwLock::new(None),
        }
    }

    fn leader(&self) -> Option<HostDescription> {
        match self.leader.read() {
            Ok(leader) => leader.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_leader(&self, host: Option<HostDescription>) {
        match self.leader.write() {
            Ok(mut leader) => *leader = host,
            Err(poisoned) => *poisoned.into_inner() = host,
        }
    }

    /// Probe every host's first connection; the first one not answering 503
    /// becomes the leader. With no such host the leader becomes unknown.
    async fn find_leader(&self) {
        for (host, connections) in self.core.snapshot() {
            let Some(connection) = connections.first() else {
                continue;
            };
            match connection.execute(current_database_probe()).await {
                Ok(response) if response.response_code() != 503 => {
                    tracing::info!(leader = %host, "leader discovered");
                    self.set_leader(Some(host));
                    return;
                }
                Ok(_) => {
                    tracing::debug!(%host, "host is a follower");
                }
                Err(error) => {
                    tracing::debug!(%host, %error, "leader probe failed");
                }
            }
        }
        tracing::warn!("no leader found among pool hosts");
        self.set_leader(None);
    }
}

#[async_trait]
impl ConnectionPool for ActiveFailoverPool {
    async fn update_connections(&self, hosts: &[HostDescription]) -> DriverResult<()> {
        let result = self.core.update(hosts).await;
        self.find_leader().await;
        result
    }

    async fn execute(&self, request: Request) -> DriverResult<Response> {
        let Some(leader) = self.leader() else {
            return Err(DriverError::transport("leader not reachable"));
        };
        let connection = self
            .core
            .snapshot()
            .get(&leader)
            .and_then(|connections| random_item(connections))
            .ok_or_else(|| DriverError::transport("leader not reachable"))?;
        tracing::debug!(%leader, "routing request to leader");
        let response = connection.execute(request).await?;
        if response.response_code() == 503 {
            // The leader moved; rediscover before handing the 503 back
            // unchanged.
            tracing::info!(%leader, "leader answered 503, rediscovering");
            self.find_leader().await;
        }
        Ok(response)
    }

    async fn close(&self) {
        self.core.close().await;
    }
}
