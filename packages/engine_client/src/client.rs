//! Generic request execution against the endpoint table.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span};

use crate::config::ClientConfig;
use crate::containers::Containers;
use crate::error::{EngineError, Result};
use crate::monitor::ResponseBody;
use crate::request::{Call, NotFoundPolicy, TimeoutPolicy};
use crate::transport::connector::error_from_response;
use crate::transport::{Connector, HijackedStream};

struct ClientInner {
    connector: Connector,
    config: ClientConfig,
    prefix: String,
}

/// Handle to one daemon. Cheap to clone; every request opens its own
/// connection.
#[derive(Clone)]
pub struct EngineClient {
    inner: Arc<ClientInner>,
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        res = fut => res,
    }
}

impl EngineClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = Connector::new(&config)?;
        let prefix = config.path_prefix();
        debug!(endpoint = %connector.endpoint(), prefix, "engine client ready");
        Ok(Self {
            inner: Arc::new(ClientInner {
                connector,
                config,
                prefix,
            }),
        })
    }

    /// Client configured from `DOCKER_HOST` / `ENGINE_*` and defaults.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::load(None)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn containers(&self) -> Containers<'_> {
        Containers::new(self)
    }

    fn build_request(&self, call: Call<'_>) -> Result<Request<Full<Bytes>>> {
        let target = call.target(&self.inner.prefix)?;
        let method = call
            .method
            .clone()
            .unwrap_or_else(|| call.endpoint.method.clone());
        let mut builder = Request::builder().method(method).uri(target);
        if let Some(content_type) = call.body.content_type() {
            builder = builder.header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        builder
            .body(Full::new(call.body.into_bytes()))
            .map_err(|e| EngineError::InvalidArgument(format!("{}: {e}", call.endpoint.name)))
    }

    /// Send a call and map non-success statuses through the endpoint's
    /// error policy. `304 Not Modified` is passed through.
    async fn execute(&self, call: Call<'_>) -> Result<Response<Incoming>> {
        let endpoint = call.endpoint;
        let request = self.build_request(call)?;
        let span = debug_span!(
            "request",
            endpoint = endpoint.name,
            method = %request.method(),
            path = %request.uri()
        );

        async {
            let response = self.inner.connector.send(request).await?;
            let status = response.status();
            debug!(%status, "daemon response");
            if status.is_success() || status == StatusCode::NOT_MODIFIED {
                return Ok(response);
            }
            let not_found = endpoint.not_found == NotFoundPolicy::NoSuchContainer;
            Err(error_from_response(response, not_found).await)
        }
        .instrument(span)
        .await
    }

    async fn bounded<T>(
        &self,
        timeout: TimeoutPolicy,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout {
            TimeoutPolicy::Unbounded => fut.await,
            TimeoutPolicy::Default => {
                let limit = self.inner.config.timeouts.request();
                tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| EngineError::Timeout(limit))?
            }
        }
    }

    /// Response head with a live body; no request timeout.
    pub async fn call_response(
        &self,
        call: Call<'_>,
        cancel: &CancellationToken,
    ) -> Result<Response<Incoming>> {
        cancellable(cancel, self.execute(call)).await
    }

    /// Status of a call whose body carries nothing of interest.
    pub async fn call_status(
        &self,
        call: Call<'_>,
        cancel: &CancellationToken,
    ) -> Result<StatusCode> {
        let timeout = call.endpoint.timeout;
        let fut = async {
            let response = self.execute(call).await?;
            let status = response.status();
            response.into_body().collect().await?;
            Ok(status)
        };
        cancellable(cancel, self.bounded(timeout, fut)).await
    }

    /// Decode the whole JSON response body.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        call: Call<'_>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let timeout = call.endpoint.timeout;
        let fut = async {
            let response = self.execute(call).await?;
            let body = response.into_body().collect().await?.to_bytes();
            Ok(serde_json::from_slice(&body)?)
        };
        cancellable(cancel, self.bounded(timeout, fut)).await
    }

    /// Open-ended body (logs, stats, export) as a byte stream.
    pub async fn call_stream(
        &self,
        call: Call<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResponseBody> {
        let response = self.call_response(call, cancel).await?;
        Ok(ResponseBody::from_incoming(response.into_body()))
    }

    /// Upgrade the call's connection into a raw duplex stream.
    pub async fn call_hijack(
        &self,
        call: Call<'_>,
        cancel: &CancellationToken,
    ) -> Result<HijackedStream> {
        let not_found = call.endpoint.not_found == NotFoundPolicy::NoSuchContainer;
        let name = call.endpoint.name;
        let request = self.build_request(call)?;
        let span = debug_span!("hijack", endpoint = name, path = %request.uri());
        cancellable(
            cancel,
            self.inner
                .connector
                .hijack(request, not_found)
                .instrument(span),
        )
        .await
    }
}
