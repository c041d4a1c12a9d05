//! Connections: one multiplexed VelocyStream session per instance.
//!
//! [`VstConnection`] is a cheap handle to an actor task owning the socket;
//! see [`actor`] for the ownership rules. The [`Connection`] trait is the
//! seam the pool routes through; an HTTP transport could substitute a
//! different implementation behind it.

pub(crate) mod actor;
mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use crate::auth::AuthenticationMethod;
use crate::config::{ConnectionConfig, HostDescription};
use crate::error::{DriverError, DriverResult};
use crate::request::{Request, RequestType};
use crate::response::Response;
use crate::scheduler::{Scheduler, SchedulerPool};

use actor::Command;

/// A connection to one host.
///
/// Supports any number of concurrent requests; responses are correlated by
/// message id and may complete out of submission order. All methods may be
/// called from any task.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Drive the connection to a usable state: connect, handshake,
    /// authenticate and verify. Must be called exactly once.
    async fn initialize(&self) -> DriverResult<()>;

    /// Send a request and await its response.
    async fn execute(&self, request: Request) -> DriverResult<Response>;

    /// Whether the connection is currently established.
    async fn is_connected(&self) -> bool;

    /// Tear the connection down. Idempotent; resolves once the socket is
    /// disposed and every pending request has completed.
    async fn close(&self);

    /// The host this connection talks to.
    fn host(&self) -> &HostDescription;
}

/// Creates connections for the pool.
pub trait ConnectionFactory: Send + Sync {
    /// Create a (not yet initialized) connection to `host`.
    fn create(&self, host: &HostDescription) -> DriverResult<Arc<dyn Connection>>;
}

/// A VelocyStream connection handle.
///
/// The actual socket and all mutable state live in an actor task bound to a
/// single-thread executor; this handle just posts commands to its mailbox.
pub struct VstConnection {
    host: HostDescription,
    config: ConnectionConfig,
    auth_configured: bool,
    commands: mpsc::UnboundedSender<Command>,
    closed: watch::Receiver<bool>,
    initialized: AtomicBool,
    closing: AtomicBool,
}

impl VstConnection {
    /// Create a connection to `host`, spawning its actor on `scheduler`.
    pub fn new(
        host: HostDescription,
        auth: Option<AuthenticationMethod>,
        config: ConnectionConfig,
        scheduler: &Scheduler,
    ) -> DriverResult<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let auth_configured = auth.is_some();
        let spawned = scheduler.spawn(actor::run_connection(
            host.clone(),
            auth,
            config.clone(),
            command_rx,
            closed_tx,
        ));
        if !spawned {
            return Err(DriverError::invalid_state(
                "executor fleet is shut down, cannot spawn connection",
            ));
        }
        tracing::debug!(host = %host, "connection created");
        Ok(Self {
            host,
            config,
            auth_configured,
            commands: command_tx,
            closed: closed_rx,
            initialized: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        })
    }

    /// Post a command, mapping a dead mailbox to a closed connection.
    fn send_command(&self, command: Command) -> DriverResult<()> {
        self.commands
            .send(command)
            .map_err(|_| DriverError::ConnectionClosed)
    }

    /// Execute without the closed-handle guard; used by `initialize` for the
    /// no-authentication probe before the connection is advertised.
    async fn execute_inner(&self, request: Request) -> DriverResult<Response> {
        let (slot, pending) = oneshot::channel();
        self.send_command(Command::Execute {
            request,
            slot,
        })?;
        match timeout(self.config.timeout, pending).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DriverError::ConnectionClosed),
            Err(_) => {
                // The request may still be written; reset the connection so
                // its slot (and anything else in flight) fails promptly.
                let _ = self.send_command(Command::Fail {
                    error: DriverError::Timeout,
                });
                Err(DriverError::Timeout)
            }
        }
    }
}

/// Probe sent when no authentication is configured, to detect a server that
/// expects credentials. Any response code other than 401 counts as success
/// (a single server may answer 404 on this cluster endpoint).
fn endpoints_probe() -> Request {
    Request::builder()
        .database("_system")
        .request_type(RequestType::Get)
        .path("/_api/cluster/endpoints")
        .build()
}

#[async_trait]
impl Connection for VstConnection {
    async fn initialize(&self) -> DriverResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(DriverError::invalid_state("connection already initialized"));
        }
        tracing::debug!(host = %self.host, "initializing connection");
        let (reply, connected) = oneshot::channel();
        self.send_command(Command::Connect { reply })?;
        match timeout(self.config.timeout, connected).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(DriverError::ConnectionClosed),
            Err(_) => {
                let _ = self.send_command(Command::Fail {
                    error: DriverError::Timeout,
                });
                return Err(DriverError::Timeout);
            }
        }
        if !self.auth_configured {
            let response = self.execute_inner(endpoints_probe()).await?;
            if response.response_code() == 401 {
                return Err(DriverError::Authentication { code: 401 });
            }
        }
        Ok(())
    }

    async fn execute(&self, request: Request) -> DriverResult<Response> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(DriverError::invalid_state("connection is closed"));
        }
        self.execute_inner(request).await
    }

    async fn is_connected(&self) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.send_command(Command::IsConnected { reply }).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    async fn close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            let _ = self.send_command(Command::Close);
        }
        let mut closed = self.closed.clone();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                // Actor gone; everything is torn down.
                break;
            }
        }
    }

    fn host(&self) -> &HostDescription {
        &self.host
    }
}

/// Factory producing [`VstConnection`]s bound round-robin onto an executor
/// fleet.
pub struct VstConnectionFactory {
    auth: Option<AuthenticationMethod>,
    config: ConnectionConfig,
    schedulers: Arc<SchedulerPool>,
}

impl VstConnectionFactory {
    /// Create a factory.
    pub fn new(
        auth: Option<AuthenticationMethod>,
        config: ConnectionConfig,
        schedulers: Arc<SchedulerPool>,
    ) -> Self {
        Self {
            auth,
            config,
            schedulers,
        }
    }
}

impl ConnectionFactory for VstConnectionFactory {
    fn create(&self, host: &HostDescription) -> DriverResult<Arc<dyn Connection>> {
        let scheduler = self.schedulers.assign();
        let connection = VstConnection::new(
            host.clone(),
            self.auth.clone(),
            self.config.clone(),
            &scheduler,
        )?;
        Ok(Arc::new(connection))
    }
}
