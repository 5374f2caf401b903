//! Stream frame wire format.
//!
//! Wire format: `[1-byte stream type][3 reserved bytes][4-byte big-endian length][payload]`
//!
//! The daemon applies this framing to attach/exec output and to log bodies
//! of containers started without a TTY. Outbound (stdin) data is never framed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{EngineError, ProtocolViolation};

/// Length of the frame header.
pub const HEADER_LEN: usize = 8;

/// Logical channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StreamKind {
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolViolation> {
        match byte {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(ProtocolViolation::UnknownStreamType(other)),
        }
    }

    /// The output channel this kind is delivered on. Stdin-tagged frames are
    /// written to stdout, matching the daemon's own stdcopy.
    pub fn channel(self) -> Self {
        match self {
            Self::Stdin | Self::Stdout => Self::Stdout,
            Self::Stderr => Self::Stderr,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self.channel() {
            Self::Stderr => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub stream: StreamKind,
    pub len: u32,
}

impl FrameHeader {
    /// Decode a header. Reserved bytes 1..4 are ignored.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, ProtocolViolation> {
        let stream = StreamKind::from_byte(bytes[0])?;
        let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self { stream, len })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let len = self.len.to_be_bytes();
        [self.stream as u8, 0, 0, 0, len[0], len[1], len[2], len[3]]
    }
}

/// One demultiplexed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream: StreamKind, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

/// Codec over buffered bodies: multiplexed log responses, and fake daemons
/// in tests. Live sessions use [`super::Demuxer`], which reads straight off
/// the connection without an intermediate buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = EngineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, EngineError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&src[..HEADER_LEN]);
        let header = FrameHeader::decode(&raw)?;
        let len = header.len as usize;

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame {
            stream: header.stream,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, EngineError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None if src.len() < HEADER_LEN => Err(ProtocolViolation::TruncatedHeader {
                received: src.len(),
            }
            .into()),
            None => {
                let mut raw = [0u8; HEADER_LEN];
                raw.copy_from_slice(&src[..HEADER_LEN]);
                let header = FrameHeader::decode(&raw)?;
                Err(ProtocolViolation::TruncatedPayload {
                    expected: header.len as usize,
                    received: src.len() - HEADER_LEN,
                }
                .into())
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = EngineError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), EngineError> {
        let len = u32::try_from(frame.payload.len())
            .map_err(|_| EngineError::InvalidArgument("frame payload exceeds 4 GiB".into()))?;
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_slice(
            &FrameHeader {
                stream: frame.stream,
                len,
            }
            .encode(),
        );
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Encode frames into one contiguous buffer.
pub fn encode_frames<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> Bytes {
    let mut buf = BytesMut::new();
    for frame in frames {
        let len = frame.payload.len() as u32;
        buf.put_slice(
            &FrameHeader {
                stream: frame.stream,
                len,
            }
            .encode(),
        );
        buf.put_slice(&frame.payload);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = FrameHeader {
            stream: StreamKind::Stderr,
            len: 0x0102_0304,
        };
        assert_eq!(header.encode(), [2, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(FrameHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn reserved_bytes_ignored() {
        let header = FrameHeader::decode(&[1, 9, 9, 9, 0, 0, 0, 5]).unwrap();
        assert_eq!(header.stream, StreamKind::Stdout);
        assert_eq!(header.len, 5);
    }

    #[test]
    fn unknown_stream_type_rejected() {
        let err = FrameHeader::decode(&[3, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, ProtocolViolation::UnknownStreamType(3));
    }

    #[test]
    fn stdin_frames_route_to_stdout() {
        assert_eq!(StreamKind::Stdin.channel(), StreamKind::Stdout);
        assert_eq!(StreamKind::Stdin.index(), StreamKind::Stdout.index());
        assert_ne!(StreamKind::Stderr.index(), StreamKind::Stdout.index());
    }

    #[test]
    fn codec_waits_for_full_payload() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0, 0, 0, 5, b'h', b'e'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"llo");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::new(StreamKind::Stdout, &b"hello"[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_zero_length_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[2u8, 0, 0, 0, 0, 0, 0, 0][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.stream, StreamKind::Stderr);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn codec_eof_partial_header() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[1u8, 0, 0][..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolViolation::TruncatedHeader { received: 3 })
        ));
    }

    #[test]
    fn codec_eof_partial_payload() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0, 0, 0, 4, b'a'][..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolViolation::TruncatedPayload {
                expected: 4,
                received: 1
            })
        ));
    }

    #[test]
    fn encoder_matches_encode_frames() {
        let frames = [
            Frame::new(StreamKind::Stdout, &b"out"[..]),
            Frame::new(StreamKind::Stderr, Bytes::new()),
        ];
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        for frame in frames.clone() {
            codec.encode(frame, &mut buf).unwrap();
        }
        assert_eq!(buf.freeze(), encode_frames(&frames));
    }
}
