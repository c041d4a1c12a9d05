//! In-process mock VelocyStream server for integration tests.
#![allow(dead_code)] // not every test binary uses every helper
//!
//! Speaks just enough of the protocol to exercise the driver end to end:
//! handshake validation, chunk reassembly of incoming requests (using the
//! crate's own assembler), plain authentication, and per-request behavior
//! driven by a handler closure.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use velocystream::vpack::{self, Slice};
use velocystream::wire::{chunk_message, ChunkAssembler, PROTOCOL_HANDSHAKE};

/// A request message decoded by the mock server.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub message_id: u64,
    pub database: String,
    pub method: u64,
    pub path: String,
    pub body: Vec<u8>,
}

/// What the mock server does with a request.
pub enum Action {
    /// Send a response, optionally after a delay (without blocking other
    /// requests on the same connection).
    Respond {
        code: u16,
        body: Vec<u8>,
        delay: Option<Duration>,
    },
    /// Drop the TCP connection without responding.
    Close,
}

impl Action {
    pub fn ok() -> Self {
        Action::respond(200)
    }

    pub fn respond(code: u16) -> Self {
        Action::Respond {
            code,
            body: Vec::new(),
            delay: None,
        }
    }

    pub fn with_body(code: u16, body: Vec<u8>) -> Self {
        Action::Respond {
            code,
            body,
            delay: None,
        }
    }

    pub fn delayed(code: u16, delay: Duration) -> Self {
        Action::Respond {
            code,
            body: Vec::new(),
            delay: Some(delay),
        }
    }
}

pub type Handler = Arc<dyn Fn(&ParsedRequest) -> Action + Send + Sync>;

/// Mock server configuration.
pub struct MockServerOptions {
    /// Accepted plain credentials; `None` disables the auth check (any auth
    /// message is acknowledged with 200).
    pub credentials: Option<(String, String)>,
    /// Content bytes per response chunk, to exercise chunked responses.
    pub response_chunk_size: usize,
    pub handler: Handler,
}

impl MockServerOptions {
    pub fn answering(handler: impl Fn(&ParsedRequest) -> Action + Send + Sync + 'static) -> Self {
        Self {
            credentials: None,
            response_chunk_size: 30_000,
            handler: Arc::new(handler),
        }
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_owned(), password.to_owned()));
        self
    }

    pub fn with_response_chunk_size(mut self, chunk_size: usize) -> Self {
        self.response_chunk_size = chunk_size;
        self
    }
}

pub struct MockServer {
    port: u16,
    /// Message ids observed per accepted connection, in arrival order.
    pub message_ids: Arc<Mutex<Vec<Vec<u64>>>>,
    /// Number of request (non-auth) messages served.
    pub requests_served: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn start(options: MockServerOptions) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let port = listener.local_addr().expect("local addr").port();
        let message_ids: Arc<Mutex<Vec<Vec<u64>>>> = Arc::new(Mutex::new(Vec::new()));
        let requests_served = Arc::new(AtomicUsize::new(0));

        let server = MockServer {
            port,
            message_ids: message_ids.clone(),
            requests_served: requests_served.clone(),
        };
        let options = Arc::new(options);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let connection_ids = {
                    let mut all = message_ids.lock().expect("lock");
                    all.push(Vec::new());
                    all.len() - 1
                };
                tokio::spawn(serve_connection(
                    stream,
                    options.clone(),
                    message_ids.clone(),
                    connection_ids,
                    requests_served.clone(),
                ));
            }
        });
        server
    }

    pub fn host(&self) -> (&'static str, u16) {
        ("127.0.0.1", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Message ids seen on connection `index`, in arrival order.
    pub fn ids_on_connection(&self, index: usize) -> Vec<u64> {
        self.message_ids
            .lock()
            .expect("lock")
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connections_accepted(&self) -> usize {
        self.message_ids.lock().expect("lock").len()
    }
}

/// Build a response payload: `[1, 2, code, {}]` head plus body.
pub fn response_payload(code: u16, body: &[u8]) -> Vec<u8> {
    let mut payload = vpack::array(&[
        vpack::uint(1),
        vpack::uint(2),
        vpack::uint(u64::from(code)),
        vpack::object(&BTreeMap::new()),
    ]);
    payload.extend_from_slice(body);
    payload
}

async fn serve_connection(
    stream: TcpStream,
    options: Arc<MockServerOptions>,
    message_ids: Arc<Mutex<Vec<Vec<u64>>>>,
    connection_index: usize,
    requests_served: Arc<AtomicUsize>,
) {
    let (mut read, write) = stream.into_split();

    let mut handshake = [0u8; PROTOCOL_HANDSHAKE.len()];
    if read.read_exact(&mut handshake).await.is_err() || handshake != *PROTOCOL_HANDSHAKE {
        return;
    }

    let write = Arc::new(tokio::sync::Mutex::new(write));
    let mut assembler = ChunkAssembler::new();
    let mut buf = vec![0u8; 8192];

    loop {
        let n = match read.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let messages = match assembler.feed(&buf[..n]) {
            Ok(messages) => messages,
            Err(_) => return,
        };
        for (message_id, payload) in messages {
            {
                let mut all = message_ids.lock().expect("lock");
                all[connection_index].push(message_id);
            }
            if !handle_message(
                message_id,
                payload,
                &options,
                &write,
                &requests_served,
            )
            .await
            {
                let _ = write.lock().await.shutdown().await;
                return;
            }
        }
    }
}

/// Process one decoded message. Returns false when the connection should be
/// dropped.
async fn handle_message(
    message_id: u64,
    payload: Vec<u8>,
    options: &Arc<MockServerOptions>,
    write: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    requests_served: &Arc<AtomicUsize>,
) -> bool {
    let head = match Slice::new(&payload) {
        Ok(head) => head,
        Err(_) => return false,
    };
    let head_size = head.byte_size().expect("head size");
    let items = match head.array_items() {
        Ok(items) => items,
        Err(_) => return false,
    };
    let message_type = items
        .get(1)
        .and_then(|slice| slice.as_u64().ok())
        .unwrap_or(0);

    if message_type == 1000 {
        // Authentication message: [1, 1000, "plain", user, password].
        let authorized = match &options.credentials {
            None => true,
            Some((user, password)) => {
                let encryption = items.get(2).and_then(|s| s.as_str().ok());
                let given_user = items.get(3).and_then(|s| s.as_str().ok());
                let given_password = items.get(4).and_then(|s| s.as_str().ok());
                encryption == Some("plain")
                    && given_user == Some(user.as_str())
                    && given_password == Some(password.as_str())
            }
        };
        let code = if authorized { 200 } else { 401 };
        send_response(write, message_id, code, &[], options.response_chunk_size).await;
        return true;
    }

    // Request message: [1, 1, database, method, path, query, headers] | body.
    let request = ParsedRequest {
        message_id,
        database: items
            .get(2)
            .and_then(|s| s.as_str().ok())
            .unwrap_or_default()
            .to_owned(),
        method: items.get(3).and_then(|s| s.as_u64().ok()).unwrap_or(0),
        path: items
            .get(4)
            .and_then(|s| s.as_str().ok())
            .unwrap_or_default()
            .to_owned(),
        body: payload[head_size..].to_vec(),
    };
    requests_served.fetch_add(1, Ordering::SeqCst);

    match (options.handler)(&request) {
        Action::Close => false,
        Action::Respond { code, body, delay } => {
            match delay {
                None => {
                    send_response(write, message_id, code, &body, options.response_chunk_size)
                        .await;
                }
                Some(delay) => {
                    // Respond later without holding up other requests on
                    // this connection.
                    let write = write.clone();
                    let chunk_size = options.response_chunk_size;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        send_response(&write, message_id, code, &body, chunk_size).await;
                    });
                }
            }
            true
        }
    }
}

async fn send_response(
    write: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    message_id: u64,
    code: u16,
    body: &[u8],
    chunk_size: usize,
) {
    let payload = response_payload(code, body);
    let frame = chunk_message(message_id, &payload, chunk_size);
    let mut guard = write.lock().await;
    let _ = guard.write_all(&frame).await;
    let _ = guard.flush().await;
}

/// A `127.0.0.1` port with nothing listening on it.
pub async fn unreachable_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}
