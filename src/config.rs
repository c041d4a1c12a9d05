//! Configuration structures for connections and the communication layer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthenticationMethod;
use crate::error::{DriverError, DriverResult};
use crate::wire::CHUNK_HEADER_SIZE;

/// A database host, identified by name (or address) and port.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HostDescription {
    host: String,
    port: u16,
}

impl HostDescription {
    /// Create a host description.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form used for connecting and logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for HostDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Display for HostDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Deployment shape the pool routes requests under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// One server; every request goes to it.
    SingleServer,
    /// Several servers of which exactly one (the leader) accepts requests;
    /// the leader is discovered by probing and re-discovered on 503.
    ActiveFailover,
    /// A cluster of coordinators; requests go to a random one.
    Cluster,
}

/// Per-connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Overall deadline for a single operation (initialize, execute, close).
    pub timeout: Duration,

    /// Content bytes carried per chunk. Must be larger than the 24-byte
    /// chunk header.
    pub chunk_size: usize,

    /// Maximum age of an idle session. A session older than this is
    /// recycled before the next request when nothing is in flight.
    pub ttl: Duration,

    /// Whether to wrap the TCP stream in TLS.
    pub use_ssl: bool,

    /// TLS client configuration; required when `use_ssl` is set.
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            chunk_size: 30_000,
            ttl: Duration::from_secs(300),
            use_ssl: false,
            tls: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("timeout", &self.timeout)
            .field("chunk_size", &self.chunk_size)
            .field("ttl", &self.ttl)
            .field("use_ssl", &self.use_ssl)
            .field("tls", &self.tls.as_ref().map(|_| "ClientConfig"))
            .finish()
    }
}

impl ConnectionConfig {
    fn validate(&self) -> DriverResult<()> {
        if self.chunk_size <= CHUNK_HEADER_SIZE {
            return Err(DriverError::invalid_state(format!(
                "chunk size must exceed the {CHUNK_HEADER_SIZE}-byte chunk header, got {}",
                self.chunk_size
            )));
        }
        if self.use_ssl && self.tls.is_none() {
            return Err(DriverError::invalid_state(
                "use_ssl is set but no TLS client configuration was provided",
            ));
        }
        Ok(())
    }
}

/// Configuration for the communication layer: hosts, topology, credentials
/// and the connection parameters shared by every connection in the pool.
///
/// Built via [`CommunicationConfig::builder`], which validates at `build()`.
#[derive(Clone, Debug)]
pub struct CommunicationConfig {
    /// Seed host list. Non-empty.
    pub hosts: Vec<HostDescription>,

    /// Deployment shape to route under.
    pub topology: Topology,

    /// Credentials sent during connection initialization, if any.
    pub authentication: Option<AuthenticationMethod>,

    /// Connections maintained per host.
    pub connections_per_host: usize,

    /// Parameters applied to every connection.
    pub connection: ConnectionConfig,

    /// Number of single-thread executors shared by all connections.
    pub fleet_size: usize,
}

impl CommunicationConfig {
    /// Start building a configuration.
    pub fn builder() -> CommunicationConfigBuilder {
        CommunicationConfigBuilder::default()
    }
}

/// Builder for [`CommunicationConfig`].
#[derive(Clone, Debug)]
pub struct CommunicationConfigBuilder {
    hosts: Vec<HostDescription>,
    topology: Topology,
    authentication: Option<AuthenticationMethod>,
    connections_per_host: usize,
    connection: ConnectionConfig,
    fleet_size: usize,
}

impl Default for CommunicationConfigBuilder {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            topology: Topology::SingleServer,
            authentication: None,
            connections_per_host: 1,
            connection: ConnectionConfig::default(),
            fleet_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl CommunicationConfigBuilder {
    /// Add a host to the seed list.
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts.push(HostDescription::new(host, port));
        self
    }

    /// Set the deployment topology. Defaults to [`Topology::SingleServer`].
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the authentication method. Defaults to none.
    pub fn authentication(mut self, authentication: AuthenticationMethod) -> Self {
        self.authentication = Some(authentication);
        self
    }

    /// Set the number of connections per host. Defaults to 1.
    pub fn connections_per_host(mut self, n: usize) -> Self {
        self.connections_per_host = n;
        self
    }

    /// Set the overall operation timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.connection.timeout = timeout;
        self
    }

    /// Set the chunk content size in bytes.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.connection.chunk_size = chunk_size;
        self
    }

    /// Set the session TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.connection.ttl = ttl;
        self
    }

    /// Enable TLS with the given client configuration.
    pub fn tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.connection.use_ssl = true;
        self.connection.tls = Some(tls);
        self
    }

    /// Set the executor fleet size. Defaults to the CPU count.
    pub fn fleet_size(mut self, fleet_size: usize) -> Self {
        self.fleet_size = fleet_size;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidState`] when the host list is empty,
    /// `connections_per_host` or `fleet_size` is zero, the chunk size does
    /// not exceed the chunk header, or TLS is enabled without a client
    /// configuration.
    pub fn build(self) -> DriverResult<CommunicationConfig> {
        if self.hosts.is_empty() {
            return Err(DriverError::invalid_state("host list must not be empty"));
        }
        if self.connections_per_host == 0 {
            return Err(DriverError::invalid_state(
                "connections_per_host must be at least 1",
            ));
        }
        if self.fleet_size == 0 {
            return Err(DriverError::invalid_state("fleet_size must be at least 1"));
        }
        self.connection.validate()?;
        Ok(CommunicationConfig {
            hosts: self.hosts,
            topology: self.topology,
            authentication: self.authentication,
            connections_per_host: self.connections_per_host,
            connection: self.connection,
            fleet_size: self.fleet_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = CommunicationConfig::builder()
            .host("127.0.0.1", 8529)
            .build()
            .expect("valid config");
        assert_eq!(config.hosts, vec![HostDescription::new("127.0.0.1", 8529)]);
        assert_eq!(config.topology, Topology::SingleServer);
        assert_eq!(config.connections_per_host, 1);
        assert!(config.authentication.is_none());
        assert!(config.fleet_size >= 1);
    }

    #[test]
    fn test_empty_host_list_rejected() {
        let result = CommunicationConfig::builder().build();
        assert!(matches!(result, Err(DriverError::InvalidState { .. })));
    }

    #[test]
    fn test_chunk_size_must_exceed_header() {
        let result = CommunicationConfig::builder()
            .host("127.0.0.1", 8529)
            .chunk_size(24)
            .build();
        assert!(matches!(result, Err(DriverError::InvalidState { .. })));

        let ok = CommunicationConfig::builder()
            .host("127.0.0.1", 8529)
            .chunk_size(25)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_zero_connections_rejected() {
        let result = CommunicationConfig::builder()
            .host("127.0.0.1", 8529)
            .connections_per_host(0)
            .build();
        assert!(matches!(result, Err(DriverError::InvalidState { .. })));
    }

    #[test]
    fn test_host_description_address() {
        let host = HostDescription::new("db.example.com", 8529);
        assert_eq!(host.address(), "db.example.com:8529");
        assert_eq!(format!("{host}"), "db.example.com:8529");
    }
}
