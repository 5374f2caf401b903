//! Connections to the daemon.
//!
//! Submodules:
//! - `endpoint` — daemon address parsing (`unix://`, `tcp://`, `http(s)://`)
//! - `conn` — one physical connection, plain or TLS
//! - `tls` — rustls client configuration from PEM files
//! - `connector` — per-request HTTP/1.1 exchange and protocol upgrade
//! - `hijack` — raw duplex stream after an upgrade

pub mod conn;
pub mod connector;
pub mod endpoint;
pub mod hijack;
pub mod tls;

pub use conn::Connection;
pub use connector::Connector;
pub use endpoint::Endpoint;
pub use hijack::{HijackedReader, HijackedStream, HijackedWriter, RawIo};
