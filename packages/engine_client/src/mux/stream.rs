//! Session-level view of an attach/exec connection: demultiplexed output
//! plus raw input, shareable across tasks.

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::demux::{Demuxer, ReadResult, Step};
use super::frame::{Frame, StreamKind};
use crate::error::{EngineError, Result};
use crate::transport::{HijackedReader, HijackedStream, HijackedWriter};

const COPY_CHUNK: usize = 8 * 1024;

type DemuxSlot = Mutex<Option<Demuxer<HijackedReader>>>;
type WriterSlot = Mutex<Option<HijackedWriter>>;

struct Session {
    demux: DemuxSlot,
    writer: WriterSlot,
    multiplexed: bool,
    can_close_write: bool,
    token: CancellationToken,
    disposed: AtomicBool,
}

impl Session {
    fn closed_error(&self) -> EngineError {
        if self.disposed.load(Ordering::Acquire) {
            EngineError::Disposed
        } else {
            EngineError::Cancelled
        }
    }

    /// Drop whichever halves are not held by an in-flight operation. A held
    /// half is dropped by its holder once it observes the token.
    fn release_idle(&self) {
        if let Ok(mut demux) = self.demux.try_lock() {
            demux.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }

    fn closed(&self) -> EngineError {
        self.release_idle();
        self.closed_error()
    }
}

/// Attach/exec session stream.
///
/// Output reads go through one demuxer; the lock is held for a single frame
/// at a time, so a stdout reader and a stderr reader on different tasks
/// interleave fairly. Writes are raw and never framed. Cancelling the token
/// passed at construction, or calling [`dispose`](Self::dispose), closes
/// the connection and wakes every pending operation.
pub struct MultiplexedStream {
    reader: MuxReader,
    writer: MuxWriter,
}

impl MultiplexedStream {
    /// `tty` selects passthrough mode: the daemon sends raw terminal output
    /// with no frame headers.
    pub fn new(
        stream: HijackedStream,
        tty: bool,
        max_buffered: usize,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let can_close_write = stream.can_close_write();
        let (read, write) = stream.into_split()?;
        let session = Arc::new(Session {
            demux: Mutex::new(Some(
                Demuxer::new(read, !tty).with_max_buffered(max_buffered),
            )),
            writer: Mutex::new(Some(write)),
            multiplexed: !tty,
            can_close_write,
            token: cancel.child_token(),
            disposed: AtomicBool::new(false),
        });

        Ok(Self {
            reader: MuxReader {
                session: session.clone(),
            },
            writer: MuxWriter { session },
        })
    }

    fn session(&self) -> &Session {
        &self.reader.session
    }

    pub fn is_multiplexed(&self) -> bool {
        self.session().multiplexed
    }

    pub fn can_close_write(&self) -> bool {
        self.session().can_close_write
    }

    /// A handle for reading output from another task.
    pub fn reader(&self) -> MuxReader {
        self.reader.clone()
    }

    /// A handle for writing input from another task.
    pub fn writer(&self) -> MuxWriter {
        self.writer.clone()
    }

    pub async fn read_output(&self, buf: &mut [u8]) -> Result<ReadResult> {
        self.reader.read_output(buf).await
    }

    pub async fn next_frame(&self) -> Result<Option<Frame>> {
        self.reader.next_frame().await
    }

    pub async fn read_channel(&self, kind: StreamKind) -> Result<Option<Bytes>> {
        self.reader.read_channel(kind).await
    }

    pub async fn discard(&self, kind: StreamKind) -> Result<()> {
        self.reader.discard(kind).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.writer.write(buf).await
    }

    pub async fn write_all(&self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf).await
    }

    pub async fn close_write(&self) -> Result<()> {
        self.writer.close_write().await
    }

    /// Pump `input` into the session until it ends. Does not half-close.
    pub async fn copy_from<R: AsyncRead + Unpin>(&self, input: &mut R) -> Result<u64> {
        let session = self.session();
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut total = 0u64;
        loop {
            let n = tokio::select! {
                biased;
                _ = session.token.cancelled() => return Err(session.closed()),
                n = input.read(&mut buf) => n?,
            };
            if n == 0 {
                return Ok(total);
            }
            self.writer.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Copy output to two sinks, in wire order, until end-of-stream.
    pub async fn copy_output_to<O, E>(&self, stdout: &mut O, stderr: &mut E) -> Result<()>
    where
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        while let Some(frame) = self.reader.next_frame().await? {
            match frame.stream.channel() {
                StreamKind::Stderr => {
                    stderr.write_all(&frame.payload).await?;
                    stderr.flush().await?;
                }
                _ => {
                    stdout.write_all(&frame.payload).await?;
                    stdout.flush().await?;
                }
            }
        }
        Ok(())
    }

    /// Drain both channels to strings. Invalid UTF-8 is replaced.
    pub async fn read_output_to_end(&self) -> Result<(String, String)> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        self.copy_output_to(&mut stdout, &mut stderr).await?;
        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }

    /// Close the connection and fail pending and future operations with
    /// [`EngineError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        let session = self.session();
        if session.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        session.token.cancel();
        session.release_idle();
        debug!("multiplexed stream disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.session().disposed.load(Ordering::Acquire)
    }
}

/// Cloneable output handle of a [`MultiplexedStream`].
#[derive(Clone)]
pub struct MuxReader {
    session: Arc<Session>,
}

impl MuxReader {
    async fn lock(&self) -> Result<MutexGuard<'_, Option<Demuxer<HijackedReader>>>> {
        let session = &*self.session;
        let guard = tokio::select! {
            biased;
            _ = session.token.cancelled() => None,
            guard = session.demux.lock() => Some(guard),
        };
        guard.ok_or_else(|| session.closed())
    }

    /// Next payload for one channel; `None` at end-of-stream.
    pub async fn read_channel(&self, kind: StreamKind) -> Result<Option<Bytes>> {
        let session = &*self.session;
        loop {
            let mut guard = self.lock().await?;
            let step = {
                let Some(demux) = guard.as_mut() else {
                    return Err(session.closed_error());
                };
                tokio::select! {
                    biased;
                    _ = session.token.cancelled() => None,
                    step = demux.step(kind) => Some(step),
                }
            };
            let Some(step) = step else {
                guard.take();
                return Err(session.closed());
            };
            match step? {
                Step::Ready(data) => return Ok(data),
                // Let a reader of the other channel take its frame.
                Step::Routed => drop(guard),
            }
        }
    }

    pub async fn next_frame(&self) -> Result<Option<Frame>> {
        let session = &*self.session;
        let mut guard = self.lock().await?;
        let frame = {
            let Some(demux) = guard.as_mut() else {
                return Err(session.closed_error());
            };
            tokio::select! {
                biased;
                _ = session.token.cancelled() => None,
                frame = demux.next_frame() => Some(frame),
            }
        };
        match frame {
            Some(frame) => frame,
            None => {
                guard.take();
                Err(session.closed())
            }
        }
    }

    pub async fn read_output(&self, buf: &mut [u8]) -> Result<ReadResult> {
        let session = &*self.session;
        let mut guard = self.lock().await?;
        let result = {
            let Some(demux) = guard.as_mut() else {
                return Err(session.closed_error());
            };
            tokio::select! {
                biased;
                _ = session.token.cancelled() => None,
                result = demux.read_output(buf) => Some(result),
            }
        };
        match result {
            Some(result) => result,
            None => {
                guard.take();
                Err(session.closed())
            }
        }
    }

    /// Drop all current and future output for one channel.
    pub async fn discard(&self, kind: StreamKind) -> Result<()> {
        let mut guard = self.lock().await?;
        let demux = guard
            .as_mut()
            .ok_or_else(|| self.session.closed_error())?;
        demux.discard(kind);
        Ok(())
    }
}

/// Cloneable input handle of a [`MultiplexedStream`].
#[derive(Clone)]
pub struct MuxWriter {
    session: Arc<Session>,
}

impl MuxWriter {
    async fn lock(&self) -> Result<MutexGuard<'_, Option<HijackedWriter>>> {
        let session = &*self.session;
        let guard = tokio::select! {
            biased;
            _ = session.token.cancelled() => None,
            guard = session.writer.lock() => Some(guard),
        };
        guard.ok_or_else(|| session.closed())
    }

    pub fn can_close_write(&self) -> bool {
        self.session.can_close_write
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let session = &*self.session;
        let mut guard = self.lock().await?;
        let written = {
            let Some(half) = guard.as_mut() else {
                return Err(session.closed_error());
            };
            tokio::select! {
                biased;
                _ = session.token.cancelled() => None,
                n = half.write(buf) => Some(n),
            }
        };
        match written {
            Some(n) => n,
            None => {
                guard.take();
                Err(session.closed())
            }
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> Result<()> {
        let session = &*self.session;
        let mut guard = self.lock().await?;
        let written = {
            let Some(half) = guard.as_mut() else {
                return Err(session.closed_error());
            };
            tokio::select! {
                biased;
                _ = session.token.cancelled() => None,
                res = half.write_all(buf) => Some(res),
            }
        };
        match written {
            Some(res) => res,
            None => {
                guard.take();
                Err(session.closed())
            }
        }
    }

    /// Signal end-of-input. Fails without touching the connection when the
    /// transport cannot half-close.
    pub async fn close_write(&self) -> Result<()> {
        if !self.session.can_close_write {
            return Err(EngineError::UnsupportedTransport(
                "write-side shutdown is not available on this connection",
            ));
        }
        let mut guard = self.lock().await?;
        let half = guard
            .as_mut()
            .ok_or_else(|| self.session.closed_error())?;
        half.close_write().await
    }
}
