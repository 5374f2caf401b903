//! Error taxonomy for the transport, demux, and monitor layers.

use crate::mux::StreamKind;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Wire-level violations. Always fatal to the operation that hit them: the
/// byte stream cannot be resynchronized once one of these is observed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("stream closed mid frame header ({received} of 8 bytes)")]
    TruncatedHeader { received: usize },

    #[error("stream closed mid frame payload ({received} of {expected} bytes)")]
    TruncatedPayload { expected: usize, received: usize },

    #[error("unknown stream type byte {0:#04x}")]
    UnknownStreamType(u8),

    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("response header {name} is malformed: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    #[error("daemon answered the upgrade request with status {0}")]
    UpgradeRefused(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no such container: {message}")]
    NotFound { message: String },

    #[error("daemon returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(&'static str),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("http: {0}")]
    Http(#[from] hyper::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("stream has been disposed")]
    Disposed,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{stream} buffer exceeded {limit} bytes with no reader")]
    ChannelOverflow { stream: StreamKind, limit: usize },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl EngineError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Api { .. } => "api_error",
            Self::UnsupportedTransport(_) => "unsupported_transport",
            Self::Protocol(_) => "protocol_violation",
            Self::Transport(_) => "transport_failure",
            Self::Http(_) => "http_error",
            Self::Cancelled => "cancelled",
            Self::Disposed => "disposed",
            Self::Timeout(_) => "timeout",
            Self::ChannelOverflow { .. } => "channel_overflow",
            Self::Json(_) => "json_error",
            Self::Config(_) => "config_error",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Build the error for a non-success daemon reply from its body.
    ///
    /// The daemon answers with `{"message": "..."}`; anything else is kept
    /// verbatim so nothing the daemon said is lost.
    pub(crate) fn from_response(status: u16, body: &[u8], not_found: bool) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

        if not_found && status == 404 {
            Self::NotFound { message }
        } else {
            Self::Api { status, message }
        }
    }
}

impl From<figment::Error> for EngineError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(EngineError::Cancelled.error_code(), "cancelled");
        assert_eq!(
            EngineError::UnsupportedTransport("tls").error_code(),
            "unsupported_transport"
        );
        assert_eq!(
            EngineError::from(ProtocolViolation::UnknownStreamType(7)).error_code(),
            "protocol_violation"
        );
    }

    #[test]
    fn not_found_from_json_body() {
        let err = EngineError::from_response(404, br#"{"message":"No such container: abc"}"#, true);
        assert!(err.is_not_found());
        match err {
            EngineError::NotFound { message } => assert_eq!(message, "No such container: abc"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_found_without_handler_is_api_error() {
        let err = EngineError::from_response(404, b"gone\n", false);
        match err {
            EngineError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "gone");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_is_distinct_from_transport() {
        let io = EngineError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(!io.is_cancelled());
        assert!(EngineError::Cancelled.is_cancelled());
    }
}
