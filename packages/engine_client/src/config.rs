use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::monitor::DEFAULT_MAX_LINE;
use crate::mux::DEFAULT_MAX_BUFFERED;
use crate::transport::Endpoint;

// =============================================================================
// Client config (figment-deserialized from defaults / engine.toml / env vars)
// =============================================================================
//
// Equivalent ways to configure:
//
//   engine.toml:     host = "tcp://10.0.0.5:2376"
//                    [timeouts]
//                    request_secs = 30
//
//   env var:         ENGINE_TIMEOUTS__REQUEST_SECS=30   (double underscore = nesting)
//
//   conventional:    DOCKER_HOST, DOCKER_API_VERSION (overridden by ENGINE_*)

pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// API version path prefix, e.g. `1.43`. Unversioned paths when unset.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub mux: MuxConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_version: None,
            timeouts: TimeoutConfig::default(),
            tls: None,
            mux: MuxConfig::default(),
        }
    }
}

/// Timeout tunables (lives under `[timeouts]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// Applies to request/response calls. Streaming bodies, hijacked
    /// sessions and wait-style calls are never subject to it.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            request_secs: default_request_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// TLS material (lives under `[tls]`). Presence enables TLS for `tcp://`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle of trusted roots. Falls back to the webpki roots.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    /// Overrides the name checked against the daemon certificate.
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Session stream tunables (lives under `[mux]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Per-channel bound on output queued for a channel nobody is reading.
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
    /// Longest log line held back waiting for its newline.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: default_max_buffered_bytes(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_connect_secs() -> u64 {
    10
}
fn default_request_secs() -> u64 {
    100
}
fn default_max_buffered_bytes() -> usize {
    DEFAULT_MAX_BUFFERED
}
fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE
}

/// Defaults → optional TOML file. No environment layers.
fn file_figment(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    let figment = Figment::from(Serialized::defaults(ClientConfig::default()));
    match path {
        Some(path) => figment.merge(Toml::file(path)),
        None => figment,
    }
}

/// Build a figment that layers: defaults → config file → DOCKER_* → ENGINE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `ENGINE_TIMEOUTS__CONNECT_SECS=5`  →  `timeouts.connect_secs = 5`
///   `ENGINE_MUX__MAX_BUFFERED_BYTES=65536`  →  `mux.max_buffered_bytes = 65536`
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::providers::Env;

    file_figment(path)
        .merge(Env::raw().filter_map(|key| {
            if key.as_str().eq_ignore_ascii_case("DOCKER_HOST") {
                Some("host".into())
            } else if key.as_str().eq_ignore_ascii_case("DOCKER_API_VERSION") {
                Some("api_version".into())
            } else {
                None
            }
        }))
        .merge(Env::prefixed("ENGINE_").split("__"))
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(load_config(path))
    }

    pub fn from_figment(figment: figment::Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.endpoint()?;
        if self.mux.max_buffered_bytes == 0 {
            return Err(EngineError::Config(
                "mux.max_buffered_bytes must be greater than zero".into(),
            ));
        }
        if self.mux.max_line_bytes == 0 {
            return Err(EngineError::Config(
                "mux.max_line_bytes must be greater than zero".into(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.client_cert.is_some() != tls.client_key.is_some() {
                return Err(EngineError::Config(
                    "tls.client_cert and tls.client_key must be set together".into(),
                ));
            }
        }
        Ok(())
    }

    /// Parsed daemon address. A `[tls]` section upgrades `tcp://` to TLS.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::parse_with_tls(&self.host, self.tls.is_some())
    }

    /// `/v1.43` style prefix, or empty when no version is pinned.
    pub fn path_prefix(&self) -> String {
        match self.api_version.as_deref().map(str::trim) {
            Some(version) if !version.is_empty() => {
                format!("/v{}", version.trim_start_matches('v'))
            }
            _ => String::new(),
        }
    }
}
