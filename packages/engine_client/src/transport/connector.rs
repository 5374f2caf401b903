//! HTTP/1.1 exchanges with the daemon, one connection per request.
//!
//! Upgraded requests ("hijack") keep the connection: after a `101 Switching
//! Protocols` the socket is taken back from the HTTP layer, together with any
//! bytes it had already buffered, and handed out as a [`HijackedStream`].
//! A daemon that answers `200` instead streams the session in the response
//! body; that becomes an output-only [`HijackedStream`].

use bytes::Bytes;
use http::header::{CONNECTION, HOST, UPGRADE};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::conn::Connection;
use super::endpoint::Endpoint;
use super::hijack::HijackedStream;
use super::tls::build_connector;
use crate::config::ClientConfig;
use crate::error::{EngineError, ProtocolViolation, Result};
use crate::monitor::ResponseBody;

pub struct Connector {
    endpoint: Endpoint,
    tls: Option<(TlsConnector, Option<String>)>,
    connect_timeout: Duration,
}

impl Connector {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let tls = if endpoint.uses_tls() {
            let tls_config = config.tls.clone().unwrap_or_default();
            Some((build_connector(&tls_config)?, tls_config.server_name))
        } else {
            None
        };
        Ok(Self {
            endpoint,
            tls,
            connect_timeout: config.timeouts.connect(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn host_header(&self) -> Result<HeaderValue> {
        HeaderValue::from_str(&self.endpoint.host_header())
            .map_err(|e| EngineError::Config(format!("invalid host header: {e}")))
    }

    async fn open(&self) -> Result<http1::SendRequest<Full<Bytes>>> {
        let conn = Connection::open(&self.endpoint, self.tls.as_ref(), self.connect_timeout).await?;
        let (sender, connection) = http1::handshake(TokioIo::new(conn)).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.with_upgrades().await {
                debug!(error = %err, "daemon connection ended with error");
            }
        });
        Ok(sender)
    }

    /// Send a request on a fresh connection and return the response head.
    /// The body streams from the connection as it is polled.
    pub async fn send(&self, mut request: Request<Full<Bytes>>) -> Result<Response<Incoming>> {
        request.headers_mut().insert(HOST, self.host_header()?);
        let mut sender = self.open().await?;
        debug!(method = %request.method(), uri = %request.uri(), "daemon request");
        Ok(sender.send_request(request).await?)
    }

    /// Send an upgrade request and take over the connection.
    ///
    /// `101` hands over the socket. Any other success status means the
    /// daemon ignored the upgrade and sends output in the body, so the
    /// stream is read-only. Error statuses are mapped like any other
    /// response, with `not_found` selecting the no-such-container mapping
    /// for 404. Anything else is a protocol violation.
    pub async fn hijack(
        &self,
        mut request: Request<Full<Bytes>>,
        not_found: bool,
    ) -> Result<HijackedStream> {
        let headers = request.headers_mut();
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("tcp"));

        let mut response = self.send(request).await?;
        let status = response.status();
        if status.is_success() {
            warn!(%status, "daemon did not switch protocols; session is output-only");
            let body = ResponseBody::from_incoming(response.into_body());
            return Ok(HijackedStream::read_only(body));
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(error_from_response(response, not_found).await);
        }
        if status != StatusCode::SWITCHING_PROTOCOLS {
            return Err(ProtocolViolation::UpgradeRefused(status.as_u16()).into());
        }

        let upgraded = hyper::upgrade::on(&mut response).await?;
        match upgraded.downcast::<TokioIo<Connection>>() {
            Ok(parts) => {
                let conn = parts.io.into_inner();
                let can_close_write = conn.supports_half_close();
                debug!(
                    read_ahead = parts.read_buf.len(),
                    can_close_write, "connection hijacked"
                );
                Ok(HijackedStream::new(conn, parts.read_buf, can_close_write))
            }
            // Not our connection type; it still works, minus half-close.
            Err(upgraded) => Ok(HijackedStream::new(
                TokioIo::new(upgraded),
                Bytes::new(),
                false,
            )),
        }
    }
}

/// Turn a non-success response into an error, keeping the daemon's message.
pub(crate) async fn error_from_response(
    response: Response<Incoming>,
    not_found: bool,
) -> EngineError {
    let status = response.status().as_u16();
    match response.into_body().collect().await {
        Ok(body) => EngineError::from_response(status, &body.to_bytes(), not_found),
        Err(err) => err.into(),
    }
}
