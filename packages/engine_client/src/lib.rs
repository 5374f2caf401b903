//! Client for a container-engine daemon's streaming endpoints.
//!
//! - `transport` — connections, HTTP upgrade, hijacked duplex streams
//! - `mux` — stdout/stderr frame demultiplexing for attach/exec sessions
//! - `monitor` — cancellable log and stats streams
//! - `archive` — path stat metadata from archive responses
//! - `client` / `containers` — request execution over the endpoint table

pub mod archive;
pub mod client;
pub mod config;
pub mod containers;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod monitor;
pub mod mux;
pub mod query;
pub mod request;
pub mod transport;

pub use client::EngineClient;
pub use config::{ClientConfig, load_config};
pub use error::{EngineError, ProtocolViolation, Result};
pub use mux::{Frame, MultiplexedStream, StreamKind};
