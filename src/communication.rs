//! Communication façade: bootstrap, request execution, shutdown.

use std::sync::Arc;

use crate::config::CommunicationConfig;
use crate::connection::VstConnectionFactory;
use crate::error::DriverResult;
use crate::pool::{create_pool, ConnectionPool};
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::SchedulerPool;

/// Entry point of the driver: owns the executor fleet and the connection
/// pool, and routes every request through the configured topology.
///
/// ```no_run
/// use velocystream::{Communication, CommunicationConfig, Request, RequestType};
///
/// # async fn example() -> Result<(), velocystream::DriverError> {
/// let config = CommunicationConfig::builder()
///     .host("127.0.0.1", 8529)
///     .build()?;
/// let communication = Communication::connect(config).await?;
/// let response = communication
///     .execute(
///         Request::builder()
///             .request_type(RequestType::Get)
///             .path("/_api/version")
///             .build(),
///     )
///     .await?;
/// assert_eq!(response.response_code(), 200);
/// communication.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Communication {
    pool: Arc<dyn ConnectionPool>,
    // Owned so executor threads outlive every connection; joined on drop
    // after `shutdown` has closed the pool.
    _schedulers: Arc<SchedulerPool>,
}

impl Communication {
    /// Bootstrap against the configured hosts: start the executor fleet,
    /// build the pool for the topology and open the initial connections.
    ///
    /// # Errors
    ///
    /// Fails when no configured host accepts connections, or when
    /// authentication is rejected by a host that did.
    pub async fn connect(config: CommunicationConfig) -> DriverResult<Self> {
        tracing::debug!(
            hosts = ?config.hosts,
            topology = ?config.topology,
            connections_per_host = config.connections_per_host,
            "starting communication layer"
        );
        let schedulers = Arc::new(SchedulerPool::new(config.fleet_size));
        let factory = Arc::new(VstConnectionFactory::new(
            config.authentication.clone(),
            config.connection.clone(),
            schedulers.clone(),
        ));
        let pool = create_pool(config.topology, config.connections_per_host, factory);
        pool.update_connections(&config.hosts).await?;
        Ok(Self {
            pool,
            _schedulers: schedulers,
        })
    }

    /// Execute a request on a connection chosen by the topology.
    pub async fn execute(&self, request: Request) -> DriverResult<Response> {
        self.pool.execute(request).await
    }

    /// Close every connection and stop the executor fleet.
    pub async fn shutdown(self) {
        tracing::debug!("shutting down communication layer");
        self.pool.close().await;
        // Dropping self joins the executor threads.
    }
}
