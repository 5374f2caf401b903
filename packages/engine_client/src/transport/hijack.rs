//! Raw duplex byte stream left over after a successful protocol upgrade.

use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Chain, ReadBuf, ReadHalf, WriteHalf,
};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Anything the connector can hand over after an upgrade.
pub trait RawIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> RawIo for T {}

type BoxedIo = Box<dyn RawIo>;

fn no_write_side() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "daemon did not upgrade the connection; input is not accepted",
    )
}

/// Reader with a write side that refuses everything.
struct ReadOnlyIo<R>(R);

impl<R: AsyncRead + Unpin> AsyncRead for ReadOnlyIo<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl<R: Unpin> AsyncWrite for ReadOnlyIo<R> {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(no_write_side()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn disposed_io() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "hijacked stream disposed")
}

/// Bidirectional stream over an upgraded connection.
///
/// Bytes the HTTP layer buffered past the end of the response head are
/// replayed before anything is read from the socket. `close_write` sends a
/// write-side shutdown and leaves the read side open, so the daemon sees
/// end-of-input while output keeps flowing.
pub struct HijackedStream {
    io: Option<BoxedIo>,
    read_ahead: Bytes,
    can_close_write: bool,
}

impl HijackedStream {
    pub fn new<T: RawIo>(io: T, read_ahead: Bytes, can_close_write: bool) -> Self {
        Self {
            io: Some(Box::new(io)),
            read_ahead,
            can_close_write,
        }
    }

    /// Output-only stream over a body the daemon sent without switching
    /// protocols. Writes fail; there is no write side to close.
    pub fn read_only<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        Self::new(ReadOnlyIo(reader), Bytes::new(), false)
    }

    /// Whether the transport supports a write-only shutdown. TLS sessions
    /// cannot send a half-close without tearing down the session.
    pub fn can_close_write(&self) -> bool {
        self.can_close_write
    }

    pub fn is_disposed(&self) -> bool {
        self.io.is_none()
    }

    fn io_mut(&mut self) -> Result<&mut BoxedIo> {
        self.io.as_mut().ok_or(EngineError::Disposed)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.io_mut()?;
        Ok(AsyncReadExt::read(self, buf).await?)
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.io_mut()?.write(buf).await?)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let io = self.io_mut()?;
        io.write_all(buf).await?;
        io.flush().await?;
        Ok(())
    }

    /// Half-close: no more bytes will be sent. Reads are unaffected.
    pub async fn close_write(&mut self) -> Result<()> {
        if !self.can_close_write {
            return Err(EngineError::UnsupportedTransport(
                "write-side shutdown is not available on this connection",
            ));
        }
        self.io_mut()?.shutdown().await?;
        debug!("hijacked stream write side closed");
        Ok(())
    }

    /// Release the connection. Idempotent.
    pub fn dispose(&mut self) {
        if self.io.take().is_some() {
            debug!("hijacked stream disposed");
        }
    }

    /// Split into independently owned halves, read-ahead bytes first.
    pub fn into_split(mut self) -> Result<(HijackedReader, HijackedWriter)> {
        let io = self.io.take().ok_or(EngineError::Disposed)?;
        let (read, write) = tokio::io::split(io);
        let read_ahead = std::mem::take(&mut self.read_ahead);
        Ok((
            HijackedReader {
                inner: AsyncReadExt::chain(io::Cursor::new(read_ahead), read),
            },
            HijackedWriter {
                inner: write,
                can_close_write: self.can_close_write,
            },
        ))
    }
}

impl AsyncRead for HijackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.read_ahead.is_empty() {
            let n = buf.remaining().min(this.read_ahead.len());
            buf.put_slice(&this.read_ahead[..n]);
            this.read_ahead.advance(n);
            return Poll::Ready(Ok(()));
        }
        match this.io.as_mut() {
            Some(io) => Pin::new(io).poll_read(cx, buf),
            None => Poll::Ready(Err(disposed_io())),
        }
    }
}

impl AsyncWrite for HijackedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().io.as_mut() {
            Some(io) => Pin::new(io).poll_write(cx, buf),
            None => Poll::Ready(Err(disposed_io())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().io.as_mut() {
            Some(io) => Pin::new(io).poll_flush(cx),
            None => Poll::Ready(Err(disposed_io())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.can_close_write {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "write-side shutdown is not available on this connection",
            )));
        }
        match this.io.as_mut() {
            Some(io) => Pin::new(io).poll_shutdown(cx),
            None => Poll::Ready(Err(disposed_io())),
        }
    }
}

/// Read half of a split [`HijackedStream`].
pub struct HijackedReader {
    inner: Chain<io::Cursor<Bytes>, ReadHalf<BoxedIo>>,
}

impl AsyncRead for HijackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Write half of a split [`HijackedStream`].
pub struct HijackedWriter {
    inner: WriteHalf<BoxedIo>,
    can_close_write: bool,
}

impl HijackedWriter {
    pub fn can_close_write(&self) -> bool {
        self.can_close_write
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.inner.write(buf).await?)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn close_write(&mut self) -> Result<()> {
        if !self.can_close_write {
            return Err(EngineError::UnsupportedTransport(
                "write-side shutdown is not available on this connection",
            ));
        }
        self.inner.shutdown().await?;
        debug!("hijacked stream write side closed");
        Ok(())
    }
}
