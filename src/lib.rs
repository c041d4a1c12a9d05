//! # VelocyStream client driver
//!
//! An asynchronous client driver for document databases speaking the
//! VelocyStream (VST) binary protocol: chunked messages multiplexed over
//! persistent TCP (optionally TLS) connections, routed across one or more
//! hosts according to the deployment topology.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ Communication (façade)                          │
//! │ • bootstrap, execute(request), shutdown         │
//! ├─────────────────────────────────────────────────┤
//! │ ConnectionPool (topology routing)               │
//! │ • N connections per host                        │
//! │ • single server / cluster: random host          │
//! │ • active failover: leader discovery, 503 refresh│
//! ├─────────────────────────────────────────────────┤
//! │ VstConnection (actor per connection)            │
//! │ • single-thread affinity via executor fleet     │
//! │ • concurrent in-flight requests by message id   │
//! │ • handshake, authentication, error-driven reset │
//! ├─────────────────────────────────────────────────┤
//! │ Wire format                                     │
//! │ • 24-byte chunk headers, little-endian          │
//! │ • out-of-order message reassembly               │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Request and response bodies are opaque byte buffers; the [`vpack`]
//! module builds and reads the VelocyPack envelopes around them and can be
//! used to construct bodies as well.
//!
//! ## Quick start
//!
//! ```no_run
//! use velocystream::{
//!     AuthenticationMethod, Communication, CommunicationConfig, Request, RequestType,
//! };
//!
//! # async fn example() -> Result<(), velocystream::DriverError> {
//! let config = CommunicationConfig::builder()
//!     .host("127.0.0.1", 8529)
//!     .authentication(AuthenticationMethod::basic("root", "secret"))
//!     .build()?;
//! let communication = Communication::connect(config).await?;
//! let version = communication
//!     .execute(Request::builder().path("/_api/version").build())
//!     .await?;
//! println!("code: {}", version.response_code());
//! communication.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod auth;
mod communication;
mod config;
mod error;
mod message;
mod request;
mod response;
mod scheduler;

/// Connection handling: the per-connection actor and its public handle.
pub mod connection;

/// Topology-aware connection pooling.
pub mod pool;

/// Minimal VelocyPack codec for envelopes and bodies.
pub mod vpack;

/// VelocyStream wire format: chunk framing and message reassembly.
pub mod wire;

pub use auth::AuthenticationMethod;
pub use communication::Communication;
pub use config::{
    CommunicationConfig, CommunicationConfigBuilder, ConnectionConfig, HostDescription, Topology,
};
pub use connection::{Connection, ConnectionFactory, VstConnection, VstConnectionFactory};
pub use error::{DriverError, DriverResult};
pub use pool::{create_pool, ConnectionPool};
pub use request::{Request, RequestBuilder, RequestType};
pub use response::Response;
pub use scheduler::{Scheduler, SchedulerPool};
