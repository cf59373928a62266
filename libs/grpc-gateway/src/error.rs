//! Gateway construction and serving errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// TLS material could not be read from the configured path
    #[error("failed to read TLS material from {path}")]
    TlsRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// tonic rejected the assembled TLS configuration
    #[error("failed to configure TLS")]
    TlsConfig(#[source] tonic::transport::Error),

    /// Transport-level serving failure
    #[error("transport error")]
    Transport(#[source] tonic::transport::Error),
}
