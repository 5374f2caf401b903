use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::debug;

use super::endpoint::Endpoint;
use crate::error::{EngineError, Result};

/// One physical connection to the daemon.
pub enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    /// Open a connection, bounded by `timeout`.
    pub async fn open(
        endpoint: &Endpoint,
        tls: Option<&(TlsConnector, Option<String>)>,
        timeout: Duration,
    ) -> Result<Self> {
        let connect = async {
            let conn: Result<Self> = match endpoint {
                #[cfg(unix)]
                Endpoint::Unix(path) => Ok(Self::Unix(UnixStream::connect(path).await?)),
                #[cfg(not(unix))]
                Endpoint::Unix(_) => Err(EngineError::UnsupportedTransport(
                    "unix sockets are not available on this platform",
                )),
                Endpoint::Tcp { host, port, tls: false } => {
                    let stream = TcpStream::connect((host.as_str(), *port)).await?;
                    stream.set_nodelay(true)?;
                    Ok(Self::Tcp(stream))
                }
                Endpoint::Tcp { host, port, tls: true } => {
                    let (connector, server_name) = tls.ok_or_else(|| {
                        EngineError::Config("TLS endpoint without TLS configuration".into())
                    })?;
                    let name = server_name.as_deref().unwrap_or(host.as_str());
                    let name = ServerName::try_from(name.to_string()).map_err(|e| {
                        EngineError::Config(format!("invalid TLS server name {name:?}: {e}"))
                    })?;
                    let stream = TcpStream::connect((host.as_str(), *port)).await?;
                    stream.set_nodelay(true)?;
                    let stream = connector.connect(name, stream).await?;
                    Ok(Self::Tls(Box::new(stream)))
                }
            };
            conn
        };

        let conn = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| EngineError::Timeout(timeout))??;
        debug!(%endpoint, "connected to daemon");
        Ok(conn)
    }

    /// Whether a write-only shutdown leaves the read side usable.
    pub fn supports_half_close(&self) -> bool {
        match self {
            Self::Tcp(_) => true,
            #[cfg(unix)]
            Self::Unix(_) => true,
            Self::Tls(_) => false,
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
