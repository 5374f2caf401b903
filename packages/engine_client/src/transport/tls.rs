use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::config::TlsConfig;
use crate::error::{EngineError, Result};

fn pem_error(what: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Config(format!("{what}: {err}"))
}

/// Build a rustls connector from PEM files.
pub fn build_connector(config: &TlsConfig) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    match &config.ca_cert {
        Some(path) => {
            let certs = CertificateDer::pem_file_iter(path)
                .map_err(|e| pem_error("reading tls.ca_cert", e))?;
            for cert in certs {
                let cert = cert.map_err(|e| pem_error("parsing tls.ca_cert", e))?;
                roots
                    .add(cert)
                    .map_err(|e| pem_error("adding tls.ca_cert", e))?;
            }
            debug!(path = %path.display(), roots = roots.len(), "loaded daemon CA bundle");
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let client = match (&config.client_cert, &config.client_key) {
        (Some(cert), Some(key)) => {
            let chain = CertificateDer::pem_file_iter(cert)
                .map_err(|e| pem_error("reading tls.client_cert", e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| pem_error("parsing tls.client_cert", e))?;
            let key = PrivateKeyDer::from_pem_file(key)
                .map_err(|e| pem_error("reading tls.client_key", e))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| pem_error("client certificate", e))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(EngineError::Config(
                "tls.client_cert and tls.client_key must be set together".into(),
            ));
        }
    };

    Ok(TlsConnector::from(Arc::new(client)))
}
