//! Configuration management for the gateway service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub tls: TlsPathSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
        }

        Ok(Settings {
            server: ServerSettings::from_env()?,
            auth: AuthSettings::from_env()?,
            tls: TlsPathSettings::from_env(),
        })
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub metrics_enabled: bool,
    /// Seconds granted to in-flight calls on shutdown
    pub shutdown_grace_secs: u64,
    pub max_message_bytes: usize,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "50051".to_string())
                .parse()
                .context("Invalid SERVER_PORT")?,
            metrics_enabled: env::var("METRICS_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid METRICS_ENABLED")?,
            shutdown_grace_secs: env::var("SHUTDOWN_GRACE_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid SHUTDOWN_GRACE_SECS")?,
            max_message_bytes: env::var("GRPC_MAX_MESSAGE_BYTES")
                .unwrap_or_else(|_| (4 * 1024 * 1024).to_string())
                .parse()
                .context("Invalid GRPC_MAX_MESSAGE_BYTES")?,
        })
    }
}

/// Which credential check the gateway applies to incoming calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthSettings {
    None,
    SharedSecret {
        secret: String,
        peer_service: String,
        peer_roles: Vec<String>,
    },
    Token {
        signing_key_pem: String,
        verification_key_pem: String,
        issuer: String,
    },
}

impl AuthSettings {
    fn from_env() -> Result<Self> {
        let mode = env::var("AUTH_MODE").unwrap_or_else(|_| "token".to_string());
        match mode.as_str() {
            "none" => Ok(Self::None),
            "shared-secret" => Ok(Self::SharedSecret {
                secret: env::var("SHARED_SECRET")
                    .context("SHARED_SECRET must be set for shared-secret auth")?,
                peer_service: env::var("PEER_SERVICE_NAME")
                    .unwrap_or_else(|_| "internal".to_string()),
                peer_roles: env::var("PEER_ROLES")
                    .unwrap_or_else(|_| "internal".to_string())
                    .split(',')
                    .map(|role| role.trim().to_string())
                    .collect(),
            }),
            "token" => Ok(Self::Token {
                signing_key_pem: env::var("JWT_PRIVATE_KEY")
                    .context("JWT_PRIVATE_KEY must be set for token auth")?,
                verification_key_pem: env::var("JWT_PUBLIC_KEY")
                    .context("JWT_PUBLIC_KEY must be set for token auth")?,
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "gateway".to_string()),
            }),
            other => bail!("Invalid AUTH_MODE: {other}"),
        }
    }
}

/// TLS material paths; TLS is disabled when no cert is configured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsPathSettings {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub client_ca_path: Option<String>,
}

impl TlsPathSettings {
    fn from_env() -> Self {
        Self {
            cert_path: env::var("TLS_CERT_PATH").ok(),
            key_path: env::var("TLS_KEY_PATH").ok(),
            client_ca_path: env::var("TLS_CLIENT_CA_PATH").ok(),
        }
    }
}
