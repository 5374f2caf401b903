use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{EngineError, Result};

const DEFAULT_PLAIN_PORT: u16 = 2375;
const DEFAULT_TLS_PORT: u16 = 2376;

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16, tls: bool },
}

impl Endpoint {
    /// Parse `unix:///path`, `tcp://host[:port]`, `http://…` or `https://…`.
    /// A bare absolute path is taken as a unix socket.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with_tls(raw, false)
    }

    /// Like [`Endpoint::parse`], but with `tls` set a `tcp://` address is
    /// dialed over TLS and defaults to the TLS port.
    pub fn parse_with_tls(raw: &str, tls: bool) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None if raw.starts_with('/') => ("unix".to_string(), raw),
            None => {
                return Err(EngineError::Config(format!(
                    "daemon host {raw:?} has no scheme"
                )));
            }
        };

        match scheme.as_str() {
            "unix" => {
                if rest.is_empty() {
                    return Err(EngineError::Config("unix socket path is empty".into()));
                }
                Ok(Self::Unix(PathBuf::from(rest)))
            }
            "tcp" | "http" => Self::parse_tcp(rest, tls),
            "https" => Self::parse_tcp(rest, true),
            "npipe" => Err(EngineError::UnsupportedTransport(
                "named pipes are not supported",
            )),
            other => Err(EngineError::Config(format!(
                "unsupported daemon scheme {other:?}"
            ))),
        }
    }

    fn parse_tcp(rest: &str, tls: bool) -> Result<Self> {
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(EngineError::Config("daemon host is empty".into()));
        }
        let default_port = if tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| EngineError::Config(format!("bad IPv6 host {authority:?}")))?;
            let port = match after.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None => default_port,
            };
            (host.to_string(), port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), parse_port(port)?),
                None => (authority.to_string(), default_port),
            }
        };

        Ok(Self::Tcp { host, port, tls })
    }

    pub fn uses_tls(&self) -> bool {
        matches!(self, Self::Tcp { tls: true, .. })
    }

    /// Value for the `Host` request header.
    pub fn host_header(&self) -> String {
        match self {
            Self::Unix(_) => "localhost".to_string(),
            Self::Tcp { host, port, .. } if host.contains(':') => format!("[{host}]:{port}"),
            Self::Tcp { host, port, .. } => format!("{host}:{port}"),
        }
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| EngineError::Config(format!("invalid daemon port {port:?}")))
}

impl FromStr for Endpoint {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp { tls: true, .. } => write!(f, "https://{}", self.host_header()),
            Self::Tcp { .. } => write!(f, "tcp://{}", self.host_header()),
        }
    }
}
