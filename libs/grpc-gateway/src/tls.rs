//! Server TLS configuration
//!
//! Loads PEM material from the configured paths and builds the tonic
//! server TLS config. Providing a client CA root enables mutual TLS:
//! the transport then authenticates connecting services before any
//! call reaches the interceptor chain.

use std::fs;
use std::path::Path;

use tonic::transport::{Certificate, Identity, ServerTlsConfig};
use tracing::info;

use crate::config::TlsSettings;
use crate::error::GatewayError;

/// PEM material read from disk at bind time
#[derive(Clone, Debug)]
pub struct ServerTlsMaterial {
    cert_pem: String,
    key_pem: String,
    client_ca_pem: Option<String>,
}

impl ServerTlsMaterial {
    pub fn load(settings: &TlsSettings) -> Result<Self, GatewayError> {
        let cert_pem = read_pem(&settings.cert_path)?;
        let key_pem = read_pem(&settings.key_path)?;
        let client_ca_pem = settings
            .client_ca_path
            .as_ref()
            .map(|path| read_pem(path))
            .transpose()?;

        info!(
            cert_path = %settings.cert_path.display(),
            mtls_enabled = client_ca_pem.is_some(),
            "server TLS material loaded"
        );

        Ok(Self {
            cert_pem,
            key_pem,
            client_ca_pem,
        })
    }

    /// Build the tonic server TLS config
    pub fn build(&self) -> ServerTlsConfig {
        let identity = Identity::from_pem(&self.cert_pem, &self.key_pem);
        let mut tls = ServerTlsConfig::new().identity(identity);

        if let Some(ref ca_pem) = self.client_ca_pem {
            tls = tls.client_ca_root(Certificate::from_pem(ca_pem));
            info!("mutual TLS enabled with client CA root");
        }

        tls
    }
}

fn read_pem(path: &Path) -> Result<String, GatewayError> {
    fs::read_to_string(path).map_err(|source| GatewayError::TlsRead {
        path: path.display().to_string(),
        source,
    })
}
