//! Endpoint descriptors and the per-call request description.

use bytes::Bytes;
use http::Method;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::query::{encode_component, to_query_string};

/// How a 404 from this endpoint is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// Plain [`EngineError::Api`].
    Generic,
    /// [`EngineError::NotFound`]: the container (or exec instance) is gone.
    NoSuchContainer,
}

/// Whether the configured request timeout applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    Default,
    /// Calls that legitimately block for as long as the daemon needs
    /// (stop, restart, wait).
    Unbounded,
}

/// One REST endpoint: verb, path template and error mapping.
#[derive(Debug)]
pub struct EndpointSpec {
    pub name: &'static str,
    pub method: Method,
    /// Path relative to the version prefix, with `{}` placeholders for
    /// path arguments.
    pub path: &'static str,
    pub not_found: NotFoundPolicy,
    pub timeout: TimeoutPolicy,
}

impl EndpointSpec {
    /// Fill the path template. Every argument must be non-empty and the
    /// argument count must match the placeholders.
    pub fn render_path(&self, args: &[&str]) -> Result<String> {
        let mut pieces = self.path.split("{}");
        let mut path = String::from("/");
        path.push_str(pieces.next().unwrap_or_default());

        let mut args = args.iter();
        for piece in pieces {
            let arg = args.next().ok_or_else(|| {
                EngineError::InvalidArgument(format!("{}: missing path argument", self.name))
            })?;
            if arg.is_empty() {
                return Err(EngineError::InvalidArgument(format!(
                    "{}: path argument must not be empty",
                    self.name
                )));
            }
            path.push_str(&encode_component(arg));
            path.push_str(piece);
        }
        if args.next().is_some() {
            return Err(EngineError::InvalidArgument(format!(
                "{}: too many path arguments",
                self.name
            )));
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Bytes),
    Tar(Bytes),
}

impl RequestBody {
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Json(_) => Some("application/json"),
            Self::Tar(_) => Some("application/x-tar"),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Json(bytes) | Self::Tar(bytes) => bytes,
        }
    }
}

/// A call against an endpoint: path arguments, query and body.
#[derive(Debug)]
pub struct Call<'a> {
    pub(crate) endpoint: &'static EndpointSpec,
    pub(crate) args: Vec<&'a str>,
    pub(crate) query: String,
    pub(crate) body: RequestBody,
    pub(crate) method: Option<Method>,
}

impl<'a> Call<'a> {
    pub fn new(endpoint: &'static EndpointSpec) -> Self {
        Self {
            endpoint,
            args: Vec::new(),
            query: String::new(),
            body: RequestBody::Empty,
            method: None,
        }
    }

    pub fn arg(mut self, arg: &'a str) -> Self {
        self.args.push(arg);
        self
    }

    pub fn query<Q: Serialize + ?Sized>(mut self, params: &Q) -> Result<Self> {
        self.query = to_query_string(params)?;
        Ok(self)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_vec(body)?.into());
        Ok(self)
    }

    pub fn tar(mut self, archive: Bytes) -> Self {
        self.body = RequestBody::Tar(archive);
        self
    }

    /// Override the endpoint's verb (archive stat uses HEAD on the GET path).
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn endpoint(&self) -> &'static EndpointSpec {
        self.endpoint
    }

    /// Origin-form target: `/v1.43/containers/abc/logs?stdout=true`.
    pub fn target(&self, prefix: &str) -> Result<String> {
        let path = self.endpoint.render_path(&self.args)?;
        Ok(if self.query.is_empty() {
            format!("{prefix}{path}")
        } else {
            format!("{prefix}{path}?{}", self.query)
        })
    }
}
