//! Frame demultiplexer over a single physical read path.
//!
//! Reads are cancel-safe: a partially received header or payload lives in the
//! demuxer, not in the read future, so dropping a pending read (a `select!`
//! losing, a cancelled task) never desynchronizes the byte stream.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

use super::frame::{Frame, FrameHeader, HEADER_LEN, StreamKind};
use crate::error::{EngineError, ProtocolViolation, Result};

/// Default per-channel bound on queued cross-channel data.
pub const DEFAULT_MAX_BUFFERED: usize = 1024 * 1024;

/// Upper bound on a single allocation while receiving a payload.
const READ_CHUNK: usize = 32 * 1024;

/// Outcome of one demux read for a specific channel.
#[derive(Debug)]
pub(crate) enum Step {
    /// Data (or end-of-stream) for the requested channel.
    Ready(Option<Bytes>),
    /// A frame for the other channel was queued; the caller may retry.
    Routed,
}

/// Result of [`Demuxer::read_output`], the wire-order byte read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    pub count: usize,
    pub stream: StreamKind,
    pub eof: bool,
}

enum ReadState {
    Header {
        buf: [u8; HEADER_LEN],
        filled: usize,
    },
    Payload {
        stream: StreamKind,
        data: BytesMut,
        remaining: usize,
    },
}

impl ReadState {
    fn header() -> Self {
        Self::Header {
            buf: [0; HEADER_LEN],
            filled: 0,
        }
    }
}

#[derive(Default)]
struct ChannelQueue {
    frames: VecDeque<Frame>,
    bytes: usize,
    discard: bool,
}

impl ChannelQueue {
    fn pop(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        self.bytes -= frame.payload.len();
        Some(frame)
    }
}

pub struct Demuxer<R> {
    io: R,
    multiplexed: bool,
    state: ReadState,
    queues: [ChannelQueue; 2],
    max_buffered: usize,
    leftover: Option<(StreamKind, Bytes)>,
    eof: bool,
    poisoned: Option<ProtocolViolation>,
}

impl<R: AsyncRead + Unpin> Demuxer<R> {
    /// `multiplexed` is false for TTY sessions: bytes then pass through
    /// untouched and are reported on stdout.
    pub fn new(io: R, multiplexed: bool) -> Self {
        Self {
            io,
            multiplexed,
            state: ReadState::header(),
            queues: Default::default(),
            max_buffered: DEFAULT_MAX_BUFFERED,
            leftover: None,
            eof: false,
            poisoned: None,
        }
    }

    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered;
        self
    }

    pub fn is_multiplexed(&self) -> bool {
        self.multiplexed
    }

    /// Bytes currently queued for `kind`'s channel.
    pub fn buffered(&self, kind: StreamKind) -> usize {
        self.queues[kind.index()].bytes
    }

    /// Stop retaining data for a channel nobody will read. Already queued
    /// data is released; later frames for it are drained and dropped.
    pub fn discard(&mut self, kind: StreamKind) {
        let queue = &mut self.queues[kind.index()];
        queue.discard = true;
        if queue.bytes > 0 {
            debug!(stream = %kind.channel(), bytes = queue.bytes, "releasing queued output");
        }
        queue.frames.clear();
        queue.bytes = 0;
    }

    /// Read the next frame off the wire, in arrival order.
    ///
    /// `Ok(None)` is a clean end-of-stream at a frame boundary. A close in the
    /// middle of a header or payload is a protocol violation.
    async fn read_wire_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(violation) = &self.poisoned {
            return Err(violation.clone().into());
        }
        if self.eof {
            return Ok(None);
        }

        if !self.multiplexed {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            let n = self.io.read_buf(&mut buf).await?;
            if n == 0 {
                self.eof = true;
                return Ok(None);
            }
            return Ok(Some(Frame::new(StreamKind::Stdout, buf.freeze())));
        }

        loop {
            let next = match &mut self.state {
                ReadState::Header { buf, filled } => {
                    let n = self.io.read(&mut buf[*filled..]).await?;
                    if n == 0 {
                        self.eof = true;
                        let received = *filled;
                        if received == 0 {
                            return Ok(None);
                        }
                        return Err(self.poison(ProtocolViolation::TruncatedHeader { received }));
                    }
                    *filled += n;
                    if *filled < HEADER_LEN {
                        continue;
                    }
                    let header = match FrameHeader::decode(buf) {
                        Ok(header) => header,
                        Err(violation) => return Err(self.poison(violation)),
                    };
                    let len = header.len as usize;
                    trace!(stream = %header.stream, len, "frame header");
                    ReadState::Payload {
                        stream: header.stream,
                        data: BytesMut::with_capacity(len.min(READ_CHUNK)),
                        remaining: len,
                    }
                }
                ReadState::Payload {
                    stream,
                    data,
                    remaining,
                } => {
                    if *remaining == 0 {
                        let frame = Frame::new(*stream, data.split().freeze());
                        self.state = ReadState::header();
                        return Ok(Some(frame));
                    }
                    data.reserve((*remaining).min(READ_CHUNK));
                    let n = AsyncReadExt::take(&mut self.io, *remaining as u64)
                        .read_buf(data)
                        .await?;
                    if n == 0 {
                        self.eof = true;
                        let violation = ProtocolViolation::TruncatedPayload {
                            expected: data.len() + *remaining,
                            received: data.len(),
                        };
                        return Err(self.poison(violation));
                    }
                    *remaining -= n;
                    continue;
                }
            };
            self.state = next;
        }
    }

    fn poison(&mut self, violation: ProtocolViolation) -> EngineError {
        warn!(%violation, "frame stream desynchronized");
        self.poisoned = Some(violation.clone());
        violation.into()
    }

    fn enqueue(&mut self, frame: Frame) -> Result<()> {
        let channel = frame.stream.channel();
        let max_buffered = self.max_buffered;
        let queue = &mut self.queues[frame.stream.index()];
        if queue.discard {
            trace!(stream = %channel, len = frame.payload.len(), "discarding frame");
            return Ok(());
        }

        let over = queue.bytes > 0 && queue.bytes + frame.payload.len() > max_buffered;
        queue.bytes += frame.payload.len();
        queue.frames.push_back(frame);

        // The frame is kept either way; the error tells the caller to drain
        // or discard the other channel.
        if over {
            warn!(
                stream = %channel,
                bytes = queue.bytes,
                limit = max_buffered,
                "channel buffer overflow"
            );
            return Err(EngineError::ChannelOverflow {
                stream: channel,
                limit: max_buffered,
            });
        }
        Ok(())
    }

    /// One routing step for `kind`'s channel.
    pub(crate) async fn step(&mut self, kind: StreamKind) -> Result<Step> {
        if let Some(frame) = self.queues[kind.index()].pop() {
            return Ok(Step::Ready(Some(frame.payload)));
        }
        if let Some((stream, rest)) = self.leftover.take() {
            if stream.index() == kind.index() {
                return Ok(Step::Ready(Some(rest)));
            }
            self.enqueue(Frame::new(stream, rest))?;
            return Ok(Step::Routed);
        }
        if !self.multiplexed && kind.channel() == StreamKind::Stderr {
            return Ok(Step::Ready(None));
        }
        if self.queues[kind.index()].discard {
            return Ok(Step::Ready(None));
        }

        match self.read_wire_frame().await? {
            None => Ok(Step::Ready(None)),
            Some(frame) if frame.stream.index() == kind.index() => {
                Ok(Step::Ready(Some(frame.payload)))
            }
            Some(frame) => {
                self.enqueue(frame)?;
                Ok(Step::Routed)
            }
        }
    }

    /// Read the next payload for one channel.
    ///
    /// Frames for the other channel met on the way are queued. Returns
    /// `Some(empty)` for a zero-length frame and `None` at end-of-stream.
    pub async fn read_channel(&mut self, kind: StreamKind) -> Result<Option<Bytes>> {
        loop {
            if let Step::Ready(data) = self.step(kind).await? {
                return Ok(data);
            }
        }
    }

    /// Next whole frame regardless of channel. Queued frames come first.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some((stream, payload)) = self.leftover.take() {
            return Ok(Some(Frame::new(stream, payload)));
        }
        for queue in &mut self.queues {
            if let Some(frame) = queue.pop() {
                return Ok(Some(frame));
            }
        }
        loop {
            match self.read_wire_frame().await? {
                Some(frame) if self.queues[frame.stream.index()].discard => continue,
                other => return Ok(other),
            }
        }
    }

    /// Copy the next available bytes into `buf`, tagging their channel.
    ///
    /// A frame larger than `buf` is continued by the following calls. A
    /// zero-length frame yields `count == 0` with `eof == false`.
    pub async fn read_output(&mut self, buf: &mut [u8]) -> Result<ReadResult> {
        loop {
            if let Some((stream, rest)) = &mut self.leftover {
                let stream = *stream;
                let count = buf.len().min(rest.len());
                buf[..count].copy_from_slice(&rest[..count]);
                rest.advance(count);
                if rest.is_empty() {
                    self.leftover = None;
                }
                return Ok(ReadResult {
                    count,
                    stream,
                    eof: false,
                });
            }

            match self.next_frame().await? {
                None => {
                    return Ok(ReadResult {
                        count: 0,
                        stream: StreamKind::Stdout,
                        eof: true,
                    });
                }
                Some(frame) if frame.payload.is_empty() => {
                    return Ok(ReadResult {
                        count: 0,
                        stream: frame.stream,
                        eof: false,
                    });
                }
                Some(frame) => self.leftover = Some((frame.stream, frame.payload)),
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::frame::encode_frames;
    use std::io;
    use tokio::io::AsyncWriteExt;

    fn wire(frames: &[(StreamKind, &[u8])]) -> Vec<u8> {
        let frames: Vec<Frame> = frames
            .iter()
            .map(|(kind, data)| Frame::new(*kind, Bytes::copy_from_slice(data)))
            .collect();
        encode_frames(&frames).to_vec()
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let bytes = wire(&[
            (StreamKind::Stdout, b"hello"),
            (StreamKind::Stderr, b"bye"),
            (StreamKind::Stdout, b""),
        ]);
        let mut demux = Demuxer::new(&bytes[..], true);

        assert_eq!(
            demux.read_channel(StreamKind::Stdout).await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
        assert_eq!(
            demux.read_channel(StreamKind::Stdout).await.unwrap(),
            Some(Bytes::new())
        );
        assert_eq!(demux.read_channel(StreamKind::Stdout).await.unwrap(), None);

        assert_eq!(
            demux.read_channel(StreamKind::Stderr).await.unwrap(),
            Some(Bytes::from_static(b"bye"))
        );
        assert_eq!(demux.read_channel(StreamKind::Stderr).await.unwrap(), None);
    }

    #[tokio::test]
    async fn split_reads_reassemble_frames() {
        let bytes = wire(&[(StreamKind::Stdout, b"abcdef"), (StreamKind::Stderr, b"xy")]);
        let mock = tokio_test::io::Builder::new()
            .read(&bytes[..3])
            .read(&bytes[3..9])
            .read(&bytes[9..])
            .build();
        let mut demux = Demuxer::new(mock, true);

        let frame = demux.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::new(StreamKind::Stdout, &b"abcdef"[..]));
        let frame = demux.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::new(StreamKind::Stderr, &b"xy"[..]));
        assert!(demux.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_header_is_protocol_violation() {
        let mut bytes = wire(&[(StreamKind::Stdout, b"ok")]);
        bytes.extend_from_slice(&[1, 0, 0, 0, 0]);
        let mut demux = Demuxer::new(&bytes[..], true);

        assert!(demux.next_frame().await.unwrap().is_some());
        let err = demux.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolViolation::TruncatedHeader { received: 5 })
        ));
        // Stays failed; a desynchronized stream is never resumed.
        assert!(matches!(
            demux.read_channel(StreamKind::Stderr).await.unwrap_err(),
            EngineError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_protocol_violation() {
        let mut bytes = wire(&[(StreamKind::Stderr, b"abcd")]);
        bytes.truncate(bytes.len() - 2);
        let mut demux = Demuxer::new(&bytes[..], true);

        let err = demux.read_channel(StreamKind::Stderr).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolViolation::TruncatedPayload {
                expected: 4,
                received: 2
            })
        ));
    }

    #[tokio::test]
    async fn unknown_stream_type_is_protocol_violation() {
        let bytes = [7u8, 0, 0, 0, 0, 0, 0, 1, b'x'];
        let mut demux = Demuxer::new(&bytes[..], true);
        let err = demux.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolViolation::UnknownStreamType(7))
        ));
    }

    #[tokio::test]
    async fn connection_reset_is_transport_failure() {
        let bytes = wire(&[(StreamKind::Stdout, b"one")]);
        let mock = tokio_test::io::Builder::new()
            .read(&bytes)
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        let mut demux = Demuxer::new(mock, true);

        assert!(demux.next_frame().await.unwrap().is_some());
        let err = demux.next_frame().await.unwrap_err();
        match err {
            EngineError::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn tty_mode_passes_header_lookalikes_through() {
        let bytes = wire(&[(StreamKind::Stderr, b"not a frame")]);
        let mut demux = Demuxer::new(&bytes[..], false);

        let mut collected = Vec::new();
        while let Some(chunk) = demux.read_channel(StreamKind::Stdout).await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, bytes);
        assert_eq!(demux.read_channel(StreamKind::Stderr).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stdin_tagged_frames_read_as_stdout() {
        let bytes = wire(&[(StreamKind::Stdin, b"echo")]);
        let mut demux = Demuxer::new(&bytes[..], true);
        assert_eq!(
            demux.read_channel(StreamKind::Stdout).await.unwrap(),
            Some(Bytes::from_static(b"echo"))
        );
    }

    #[tokio::test]
    async fn overflow_keeps_data_and_reports() {
        let bytes = wire(&[
            (StreamKind::Stderr, b"aaaa"),
            (StreamKind::Stderr, b"bbbb"),
            (StreamKind::Stdout, b"out"),
        ]);
        let mut demux = Demuxer::new(&bytes[..], true).with_max_buffered(6);

        let err = demux.read_channel(StreamKind::Stdout).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::ChannelOverflow {
                stream: StreamKind::Stderr,
                limit: 6
            }
        ));
        assert_eq!(demux.buffered(StreamKind::Stderr), 8);

        // Nothing was lost: stderr still has both frames, stdout its own.
        assert_eq!(
            demux.read_channel(StreamKind::Stderr).await.unwrap(),
            Some(Bytes::from_static(b"aaaa"))
        );
        assert_eq!(
            demux.read_channel(StreamKind::Stderr).await.unwrap(),
            Some(Bytes::from_static(b"bbbb"))
        );
        assert_eq!(
            demux.read_channel(StreamKind::Stdout).await.unwrap(),
            Some(Bytes::from_static(b"out"))
        );
    }

    #[tokio::test]
    async fn discarded_channel_is_drained_not_buffered() {
        let bytes = wire(&[
            (StreamKind::Stderr, b"noise"),
            (StreamKind::Stdout, b"signal"),
            (StreamKind::Stderr, b"more noise"),
        ]);
        let mut demux = Demuxer::new(&bytes[..], true).with_max_buffered(1);
        demux.discard(StreamKind::Stderr);

        assert_eq!(
            demux.read_channel(StreamKind::Stdout).await.unwrap(),
            Some(Bytes::from_static(b"signal"))
        );
        assert_eq!(demux.read_channel(StreamKind::Stdout).await.unwrap(), None);
        assert_eq!(demux.buffered(StreamKind::Stderr), 0);
    }

    #[tokio::test]
    async fn read_output_continues_large_frames() {
        let bytes = wire(&[(StreamKind::Stdout, b"abcdefgh"), (StreamKind::Stderr, b"")]);
        let mut demux = Demuxer::new(&bytes[..], true);
        let mut buf = [0u8; 3];

        let mut out = Vec::new();
        loop {
            let res = demux.read_output(&mut buf).await.unwrap();
            if res.count == 0 {
                assert_eq!(res.stream, StreamKind::Stderr);
                assert!(!res.eof);
                break;
            }
            assert_eq!(res.stream, StreamKind::Stdout);
            out.extend_from_slice(&buf[..res.count]);
        }
        assert_eq!(out, b"abcdefgh");
        assert!(demux.read_output(&mut buf).await.unwrap().eof);
    }

    #[tokio::test]
    async fn dropped_read_does_not_desync() {
        let bytes = wire(&[(StreamKind::Stdout, b"first"), (StreamKind::Stderr, b"second")]);
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut demux = Demuxer::new(rx, true);

        // Deliver half a header, then abandon the pending read.
        tx.write_all(&bytes[..4]).await.unwrap();
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), demux.next_frame()).await;
        assert!(pending.is_err());

        tx.write_all(&bytes[4..]).await.unwrap();
        drop(tx);
        assert_eq!(
            demux.next_frame().await.unwrap().unwrap(),
            Frame::new(StreamKind::Stdout, &b"first"[..])
        );
        assert_eq!(
            demux.next_frame().await.unwrap().unwrap(),
            Frame::new(StreamKind::Stderr, &b"second"[..])
        );
        assert!(demux.next_frame().await.unwrap().is_none());
    }
}
