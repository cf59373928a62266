//! Gateway service entry point
//!
//! Stands up a [`grpc_gateway::GatewayServer`] from environment
//! configuration: health checking is always registered (and exempt
//! from authentication), the credential mode comes from `AUTH_MODE`,
//! and SIGTERM/ctrl-c trigger a graceful drain.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use grpc_gateway::{
    AuthMode, GatewayConfig, GatewayServer, MessageLimits, SharedSecretConfig, ShutdownHandle,
    TlsSettings,
};
use token_authority::{AuthorityConfig, TokenAuthority};

use crate::config::{AuthSettings, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gateway_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting gateway service");

    let settings = Settings::load().context("Failed to load configuration")?;

    let bind_addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("Invalid server address")?;

    let auth = match &settings.auth {
        AuthSettings::None => {
            warn!("authentication disabled; all calls pass unchecked");
            AuthMode::None
        }
        AuthSettings::SharedSecret {
            secret,
            peer_service,
            peer_roles,
        } => AuthMode::SharedSecret(SharedSecretConfig {
            secret: secret.clone(),
            service_name: peer_service.clone(),
            roles: peer_roles.clone(),
        }),
        AuthSettings::Token {
            signing_key_pem,
            verification_key_pem,
            issuer,
        } => {
            let authority = TokenAuthority::new(AuthorityConfig::new(
                signing_key_pem.clone(),
                verification_key_pem.clone(),
                issuer.clone(),
            ))
            .context("Failed to initialize token authority")?;
            AuthMode::TokenAuthority(Arc::new(authority))
        }
    };

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    let mut config = GatewayConfig::new(bind_addr)
        .auth_mode(auth)
        .exempt_method("/grpc.health.v1.Health/Check")
        .exempt_method("/grpc.health.v1.Health/Watch")
        .metrics(settings.server.metrics_enabled)
        .message_limits(MessageLimits {
            max_recv_bytes: settings.server.max_message_bytes,
            max_send_bytes: settings.server.max_message_bytes,
        })
        .registrar(move |routes, limits| {
            routes.add_service(
                health_service
                    .max_decoding_message_size(limits.max_recv_bytes)
                    .max_encoding_message_size(limits.max_send_bytes),
            );
        });

    if let (Some(cert_path), Some(key_path)) =
        (&settings.tls.cert_path, &settings.tls.key_path)
    {
        config = config.tls(TlsSettings {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            client_ca_path: settings.tls.client_ca_path.as_ref().map(Into::into),
        });
    }

    let grace = Duration::from_secs(settings.server.shutdown_grace_secs);
    let (server, shutdown) = GatewayServer::new(config);
    spawn_signal_listener(shutdown, grace);

    server.serve().await.context("Gateway server failed")?;
    info!("Gateway service stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown: ShutdownHandle, grace: Duration) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(grace_secs = grace.as_secs(), "shutdown signal received");
        shutdown.shutdown(grace);
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
