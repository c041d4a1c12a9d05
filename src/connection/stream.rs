//! TCP stream establishment, with or without TLS.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::{ConnectionConfig, HostDescription};
use crate::error::{DriverError, DriverResult};

/// One established session stream: plain TCP or TLS over TCP.
pub(crate) enum SessionStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Connect to `host`, applying TLS when the configuration asks for it.
pub(crate) async fn connect(
    host: &HostDescription,
    config: &ConnectionConfig,
) -> DriverResult<SessionStream> {
    let tcp = TcpStream::connect((host.host(), host.port()))
        .await
        .map_err(|e| DriverError::transport(format!("connect to {host} failed: {e}")))?;
    tcp.set_nodelay(true)
        .map_err(|e| DriverError::transport(format!("set_nodelay on {host} failed: {e}")))?;

    if !config.use_ssl {
        return Ok(SessionStream::Plain(tcp));
    }
    let tls_config = config
        .tls
        .clone()
        .ok_or_else(|| DriverError::invalid_state("use_ssl is set without a TLS configuration"))?;
    let server_name = rustls::pki_types::ServerName::try_from(host.host().to_owned())
        .map_err(|e| DriverError::transport(format!("invalid TLS server name {}: {e}", host.host())))?;
    let stream = TlsConnector::from(tls_config)
        .connect(server_name, tcp)
        .await
        .map_err(|e| DriverError::transport(format!("TLS handshake with {host} failed: {e}")))?;
    Ok(SessionStream::Tls(Box::new(stream)))
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SessionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SessionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SessionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SessionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
