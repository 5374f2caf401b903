//! Streaming response bodies (logs, stats) exposed as pull-based streams.
//!
//! Every stream is wrapped in a [`Monitor`]: cancellation is checked before
//! each pull and wakes a pull that is waiting on the network, so a follow
//! stream that never produces data still ends promptly. After cancellation
//! the body is dropped, which releases the connection.

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::codec::{BytesCodec, Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::mux::{Frame, FrameCodec, StreamKind};

/// A response body as a byte stream.
pub struct ResponseBody {
    inner: Pin<Box<dyn AsyncRead + Send>>,
}

impl ResponseBody {
    pub fn from_incoming(body: Incoming) -> Self {
        let data = body.into_data_stream().map_err(io::Error::other);
        Self {
            inner: Box::pin(StreamReader::new(data)),
        }
    }

    pub fn from_reader<R: AsyncRead + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Box::pin(reader),
        }
    }

    /// Read the remaining body into memory.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(buf.into())
    }
}

impl AsyncRead for ResponseBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

/// Cancellable wrapper around a stream of decoded units.
///
/// Yields `Err(EngineError::Cancelled)` once after the token fires, then
/// ends. Any error from the inner stream is terminal too.
pub struct Monitor<S> {
    inner: Option<S>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> Monitor<S> {
    pub fn new(inner: S, token: &CancellationToken) -> Self {
        Self {
            inner: Some(inner),
            cancelled: Box::pin(token.clone().cancelled_owned()),
        }
    }

    /// True once the stream has ended, failed, or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }
}

impl<S, T> Stream for Monitor<S>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        let this = self.get_mut();
        if this.inner.is_none() {
            return Poll::Ready(None);
        }
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.inner = None;
            debug!("streaming response cancelled");
            return Poll::Ready(Some(Err(EngineError::Cancelled)));
        }

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(Pin::new(inner).poll_next(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(Ok(item))),
            Some(Err(err)) => {
                this.inner = None;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.inner = None;
                Poll::Ready(None)
            }
        }
    }
}

/// Hand each unit to `sink` until the stream ends or the sink breaks.
/// Returns how many units were delivered.
pub async fn deliver<S, T, F>(mut stream: S, mut sink: F) -> Result<usize>
where
    S: Stream<Item = Result<T>> + Unpin,
    F: FnMut(T) -> ControlFlow<()>,
{
    let mut delivered = 0;
    while let Some(item) = stream.next().await {
        let item = item?;
        delivered += 1;
        if sink(item).is_break() {
            break;
        }
    }
    Ok(delivered)
}

// =============================================================================
// Logs
// =============================================================================

/// Default cap on a log line held back waiting for its newline.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// One log line, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: StreamKind,
    /// Set when the daemon was asked for timestamps and the prefix parsed.
    pub timestamp: Option<DateTime<Utc>>,
    pub text: String,
    /// The line hit the length cap; the next line on this channel continues it.
    pub partial: bool,
}

fn parse_line(stream: StreamKind, raw: &[u8], timestamps: bool, partial: bool) -> LogLine {
    let raw = if partial {
        raw
    } else {
        raw.strip_suffix(b"\r").unwrap_or(raw)
    };
    let text = String::from_utf8_lossy(raw);

    if timestamps {
        if let Some((prefix, rest)) = text.split_once(' ') {
            if let Ok(ts) = DateTime::parse_from_rfc3339(prefix) {
                return LogLine {
                    stream,
                    timestamp: Some(ts.with_timezone(&Utc)),
                    text: rest.to_string(),
                    partial,
                };
            }
        }
    }
    LogLine {
        stream,
        timestamp: None,
        text: text.into_owned(),
        partial,
    }
}

/// Longest prefix of `buf` up to `max` bytes that does not split a UTF-8
/// sequence. Falls back to `max` when no boundary is close.
fn fragment_len(buf: &[u8], max: usize) -> usize {
    (max.saturating_sub(3)..=max)
        .rev()
        .find(|&cut| cut > 0 && buf.get(cut).is_none_or(|b| (b & 0xC0) != 0x80))
        .unwrap_or(max)
}

/// Splits per-channel output into lines. A line may span several frames;
/// one longer than the cap is emitted in `partial` pieces.
pub struct LogLines {
    frames: BoxStream<'static, Result<Frame>>,
    timestamps: bool,
    max_line: usize,
    partial: [BytesMut; 2],
    /// Last emission on the channel was a fragment.
    continuing: [bool; 2],
    ready: VecDeque<LogLine>,
    done: bool,
}

impl LogLines {
    pub fn new(
        frames: BoxStream<'static, Result<Frame>>,
        timestamps: bool,
        max_line: usize,
    ) -> Self {
        Self {
            frames,
            timestamps,
            max_line: max_line.max(1),
            partial: Default::default(),
            continuing: [false; 2],
            ready: VecDeque::new(),
            done: false,
        }
    }

    fn emit(&mut self, stream: StreamKind, raw: &[u8], partial: bool) {
        let idx = stream.index();
        // Only the start of a line carries a timestamp.
        let timestamps = self.timestamps && !self.continuing[idx];
        self.ready
            .push_back(parse_line(stream, raw, timestamps, partial));
        self.continuing[idx] = partial;
    }

    fn push(&mut self, frame: Frame) {
        let stream = frame.stream.channel();
        let idx = stream.index();
        self.partial[idx].extend_from_slice(&frame.payload);
        while let Some(pos) = self.partial[idx].iter().position(|b| *b == b'\n') {
            let line = self.partial[idx].split_to(pos + 1);
            self.emit(stream, &line[..pos], false);
        }
        while self.partial[idx].len() >= self.max_line {
            let cut = fragment_len(&self.partial[idx], self.max_line);
            let piece = self.partial[idx].split_to(cut);
            self.emit(stream, &piece, true);
        }
    }

    fn flush(&mut self) {
        for stream in [StreamKind::Stdout, StreamKind::Stderr] {
            let idx = stream.index();
            if !self.partial[idx].is_empty() {
                let line = self.partial[idx].split();
                self.emit(stream, &line, false);
            }
        }
    }
}

impl Stream for LogLines {
    type Item = Result<LogLine>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<LogLine>>> {
        let this = self.get_mut();
        loop {
            if let Some(line) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match ready!(this.frames.poll_next_unpin(cx)) {
                Some(Ok(frame)) => this.push(frame),
                Some(Err(err)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.done = true;
                    this.flush();
                }
            }
        }
    }
}

pub type LogStream = Monitor<LogLines>;

/// Decode a logs body. TTY containers send raw text, everything else is
/// framed per channel.
pub fn log_stream(
    body: ResponseBody,
    tty: bool,
    timestamps: bool,
    max_line: usize,
    token: &CancellationToken,
) -> LogStream {
    let frames = if tty {
        FramedRead::new(body, BytesCodec::new())
            .map(|chunk| {
                chunk
                    .map(|bytes| Frame::new(StreamKind::Stdout, bytes.freeze()))
                    .map_err(EngineError::from)
            })
            .boxed()
    } else {
        FramedRead::new(body, FrameCodec).boxed()
    };
    Monitor::new(LogLines::new(frames, timestamps, max_line), token)
}

// =============================================================================
// Stats / JSON message streams
// =============================================================================

/// Decodes a sequence of concatenated JSON documents.
pub struct JsonStreamCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for JsonStreamCodec<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonStreamCodec<T> {
    type Item = T;
    type Error = EngineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>> {
        let Some(start) = src.iter().position(|b| !b.is_ascii_whitespace()) else {
            src.clear();
            return Ok(None);
        };
        src.advance(start);

        let (value, used) = {
            let mut docs = serde_json::Deserializer::from_slice(src).into_iter::<T>();
            match docs.next() {
                Some(Ok(value)) => (value, docs.byte_offset()),
                Some(Err(err)) if err.is_eof() => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(None),
            }
        };
        src.advance(used);
        Ok(Some(value))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<T>> {
        if let Some(value) = self.decode(src)? {
            return Ok(Some(value));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Trailing partial document.
        let value = serde_json::from_slice::<T>(src)?;
        src.clear();
        Ok(Some(value))
    }
}

pub type JsonStream<T> = Monitor<FramedRead<ResponseBody, JsonStreamCodec<T>>>;

pub fn json_stream<T: DeserializeOwned>(
    body: ResponseBody,
    token: &CancellationToken,
) -> JsonStream<T> {
    Monitor::new(FramedRead::new(body, JsonStreamCodec::default()), token)
}

/// One resource-usage sample. Well-known fields are typed; the rest of the
/// document is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSample {
    #[serde(default)]
    pub read: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl StatsSample {
    /// Total memory usage in bytes, when reported.
    pub fn memory_usage(&self) -> Option<u64> {
        self.rest.get("memory_stats")?.get("usage")?.as_u64()
    }

    /// Cumulative CPU time in nanoseconds, when reported.
    pub fn cpu_total_usage(&self) -> Option<u64> {
        self.rest
            .get("cpu_stats")?
            .get("cpu_usage")?
            .get("total_usage")?
            .as_u64()
    }
}

pub type StatsStream = JsonStream<StatsSample>;
