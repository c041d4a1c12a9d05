//! The connection actor: owns the socket and every piece of per-connection
//! mutable state.
//!
//! One actor task runs per connection, bound to a single-thread executor.
//! Callers talk to it exclusively through [`Command`]s on its mailbox, so
//! the message counter, lifecycle state, assembler and pending-request
//! store are only ever touched from one thread, and close-vs-execute races
//! are resolved by mailbox order.

use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;

use crate::auth::AuthenticationMethod;
use crate::config::{ConnectionConfig, HostDescription};
use crate::error::{DriverError, DriverResult};
use crate::message::{MessageStore, ReplySlot};
use crate::request::Request;
use crate::response::Response;
use crate::wire::{chunk_message, ChunkAssembler, PROTOCOL_HANDSHAKE};

use super::stream::{self, SessionStream};

/// Read buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 8192;

/// Commands accepted by the connection actor.
pub(crate) enum Command {
    /// Ensure the connection is established and authenticated.
    Connect {
        /// Completed when the session is up (or failed to come up).
        reply: oneshot::Sender<DriverResult<()>>,
    },
    /// Send a request and register its completion slot.
    Execute {
        /// The request to send.
        request: Request,
        /// Slot completed with the response or a failure.
        slot: ReplySlot,
    },
    /// Report whether the connection is currently established.
    IsConnected {
        /// Receives the answer.
        reply: oneshot::Sender<bool>,
    },
    /// Reset the connection after an externally observed failure (an
    /// operation timeout).
    Fail {
        /// The failure to propagate to every pending request.
        error: DriverError,
    },
    /// Tear the connection down for good.
    Close,
}

/// Lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// An established session: both socket halves plus its establishment time
/// for TTL-based recycling.
struct Session {
    read: ReadHalf<SessionStream>,
    write: WriteHalf<SessionStream>,
    established: Instant,
}

/// Actor-local state other than the session itself.
struct Actor {
    host: HostDescription,
    auth: Option<AuthenticationMethod>,
    config: ConnectionConfig,
    state: ConnectionState,
    store: MessageStore,
    assembler: ChunkAssembler,
    next_message_id: u64,
}

/// Run one connection to completion. Exits when `Close` arrives or every
/// handle to the mailbox is dropped.
pub(crate) async fn run_connection(
    host: HostDescription,
    auth: Option<AuthenticationMethod>,
    config: ConnectionConfig,
    mut commands: tokio::sync::mpsc::UnboundedReceiver<Command>,
    closed: watch::Sender<bool>,
) {
    let mut actor = Actor {
        host,
        auth,
        config,
        state: ConnectionState::Disconnected,
        store: MessageStore::new(),
        assembler: ChunkAssembler::new(),
        next_message_id: 0,
    };
    let mut session: Option<Session> = None;
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(Command::Connect { reply }) => {
                        let result = actor.ensure_session(&mut session).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Execute { request, slot }) => {
                        actor.execute(&mut session, request, slot).await;
                    }
                    Some(Command::IsConnected { reply }) => {
                        let _ = reply.send(actor.state == ConnectionState::Connected);
                    }
                    Some(Command::Fail { error }) => {
                        actor.handle_error(&mut session, error);
                    }
                    Some(Command::Close) | None => {
                        actor.close(&mut session).await;
                        break;
                    }
                }
            }
            read_result = read_some(&mut session, &mut read_buf) => {
                match read_result {
                    Ok(0) => {
                        actor.handle_error(
                            &mut session,
                            DriverError::transport("connection closed by peer"),
                        );
                    }
                    Ok(n) => {
                        if let Err(error) = actor.dispatch_bytes(&read_buf[..n]) {
                            actor.handle_error(&mut session, error);
                        }
                    }
                    Err(error) => {
                        actor.handle_error(&mut session, DriverError::from(error));
                    }
                }
            }
        }
    }

    let _ = closed.send(true);
    tracing::debug!(host = %actor.host, "connection actor stopped");
}

/// Read from the session when one exists; never resolves otherwise, leaving
/// the mailbox branch in charge.
async fn read_some(session: &mut Option<Session>, buf: &mut [u8]) -> std::io::Result<usize> {
    match session.as_mut() {
        Some(session) => session.read.read(buf).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    /// Feed received bytes into the assembler and resolve completed
    /// messages.
    fn dispatch_bytes(&mut self, bytes: &[u8]) -> DriverResult<()> {
        for (message_id, payload) in self.assembler.feed(bytes)? {
            self.store.resolve(message_id, payload)?;
        }
        Ok(())
    }

    /// Allocate the next message id. Ids start at 1 and reset with the
    /// session.
    fn next_id(&mut self) -> u64 {
        self.next_message_id += 1;
        self.next_message_id
    }

    /// Establish the session if there is none, including handshake and
    /// authentication. The whole attempt is bounded by the operation
    /// timeout.
    async fn ensure_session(&mut self, session: &mut Option<Session>) -> DriverResult<()> {
        if session.is_some() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        let deadline = self.config.timeout;
        let result = match timeout(deadline, self.open_session()).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout),
        };
        match result {
            Ok(new_session) => {
                self.state = ConnectionState::Connected;
                tracing::debug!(host = %self.host, "connected");
                *session = Some(new_session);
                Ok(())
            }
            Err(error) => {
                self.state = ConnectionState::Disconnected;
                self.assembler.clear();
                self.next_message_id = 0;
                tracing::debug!(host = %self.host, %error, "connect failed");
                Err(error)
            }
        }
    }

    /// Connect, send the protocol handshake and authenticate.
    async fn open_session(&mut self) -> DriverResult<Session> {
        let stream = stream::connect(&self.host, &self.config).await?;
        let (read, write) = tokio::io::split(stream);
        let mut session = Session {
            read,
            write,
            established: Instant::now(),
        };
        session.write.write_all(PROTOCOL_HANDSHAKE).await?;
        session.write.flush().await?;
        if let Some(auth) = self.auth.clone() {
            self.authenticate(&mut session, &auth).await?;
        }
        Ok(session)
    }

    /// Run the VST authentication exchange on a fresh session. The auth
    /// message takes the first message id; nothing else can be in flight.
    async fn authenticate(
        &mut self,
        session: &mut Session,
        auth: &AuthenticationMethod,
    ) -> DriverResult<()> {
        let id = self.next_id();
        let frame = chunk_message(id, &auth.vst_payload(), self.config.chunk_size);
        session.write.write_all(&frame).await?;
        session.write.flush().await?;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = session.read.read(&mut buf).await?;
            if n == 0 {
                return Err(DriverError::transport(
                    "connection closed during authentication",
                ));
            }
            for (message_id, payload) in self.assembler.feed(&buf[..n])? {
                if message_id != id {
                    tracing::warn!(
                        message_id,
                        "unexpected message during authentication, discarding"
                    );
                    continue;
                }
                let response = Response::from_payload(payload)?;
                if response.response_code() != 200 {
                    tracing::warn!(
                        host = %self.host,
                        code = response.response_code(),
                        "authentication rejected"
                    );
                    return Err(DriverError::Authentication {
                        code: response.response_code(),
                    });
                }
                return Ok(());
            }
        }
    }

    /// Process one execute command: recycle an over-TTL session, connect if
    /// needed, then send the request and register its completion slot.
    async fn execute(&mut self, session: &mut Option<Session>, request: Request, slot: ReplySlot) {
        self.recycle_expired(session);
        if let Err(error) = self.ensure_session(session).await {
            let _ = slot.send(Err(error));
            return;
        }
        let id = self.next_id();
        let payload = request.into_payload();
        let frame = chunk_message(id, &payload, self.config.chunk_size);
        self.store.add(id, slot);
        tracing::debug!(host = %self.host, message_id = id, bytes = frame.len(), "sending request");

        // The session is present: ensure_session just succeeded.
        let write_result = match session.as_mut() {
            Some(session) => {
                let result = session.write.write_all(&frame).await;
                match result {
                    Ok(()) => session.write.flush().await,
                    Err(error) => Err(error),
                }
            }
            None => return,
        };
        if let Err(error) = write_result {
            // Fails every pending request, including the one just added.
            self.handle_error(session, DriverError::from(error));
        }
    }

    /// Quietly drop a session older than the TTL when nothing is in flight,
    /// so the next request gets a fresh one.
    fn recycle_expired(&mut self, session: &mut Option<Session>) {
        let expired = session
            .as_ref()
            .map(|s| s.established.elapsed() > self.config.ttl)
            .unwrap_or(false);
        if expired && self.store.is_empty() {
            tracing::debug!(host = %self.host, "recycling session past its TTL");
            *session = None;
            self.state = ConnectionState::Disconnected;
            self.assembler.clear();
            self.next_message_id = 0;
        }
    }

    /// Reset after a failure: fail every pending request, drop the session
    /// and partial frames, restart the message id sequence. No reconnect is
    /// attempted here; the next execute triggers one.
    fn handle_error(&mut self, session: &mut Option<Session>, error: DriverError) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        tracing::debug!(host = %self.host, %error, "resetting connection");
        self.state = ConnectionState::Disconnected;
        self.assembler.clear();
        self.store.clear(&error);
        self.next_message_id = 0;
        *session = None;
    }

    /// Dispose the session and fail whatever is still in flight.
    async fn close(&mut self, session: &mut Option<Session>) {
        tracing::debug!(host = %self.host, "closing connection");
        if let Some(mut open) = session.take() {
            let _ = open.write.shutdown().await;
        }
        self.handle_error(session, DriverError::ConnectionClosed);
    }
}
