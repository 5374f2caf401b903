//! Stream multiplexing for attach/exec sessions and non-TTY log bodies.
//!
//! Submodules:
//! - `frame` — 8-byte frame header, stream kinds, buffered codec
//! - `demux` — cancel-safe frame reader with per-channel queues
//! - `stream` — shareable session stream over a hijacked connection

pub mod demux;
pub mod frame;
pub mod stream;

pub use demux::{DEFAULT_MAX_BUFFERED, Demuxer, ReadResult};
pub use frame::{Frame, FrameCodec, FrameHeader, HEADER_LEN, StreamKind, encode_frames};
pub use stream::{MultiplexedStream, MuxReader, MuxWriter};
