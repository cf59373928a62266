//! Server assembly and lifecycle
//!
//! [`GatewayServer::serve`] assembles the interceptor chain in its
//! fixed order, registers the configured services and runs until the
//! shutdown handle fires. Shutdown drains in-flight calls for the
//! caller-supplied grace period, then terminates whatever remains.
//!
//! Chain order, outermost first: recovery, context, logging,
//! authentication, metrics. Recovery must be outermost so a panic in
//! any other stage is still converted to a status; metrics sit
//! innermost so latency reflects handler time.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::Server;
use tower::ServiceBuilder;
use tracing::{info, warn};

use crate::auth::AuthLayer;
use crate::config::GatewayConfig;
use crate::context::ContextLayer;
use crate::error::GatewayError;
use crate::logging::LoggingLayer;
use crate::metrics::MetricsLayer;
use crate::recovery::RecoveryLayer;
use crate::tls::ServerTlsMaterial;

pub struct GatewayServer {
    config: GatewayConfig,
    drain: CancellationToken,
    force: CancellationToken,
}

/// Triggers shutdown of the server it was created with
#[derive(Clone)]
pub struct ShutdownHandle {
    drain: CancellationToken,
    force: CancellationToken,
}

impl ShutdownHandle {
    /// Stop accepting calls and drain in-flight ones for at most
    /// `grace`; anything still running afterwards is terminated.
    pub fn shutdown(&self, grace: Duration) {
        self.drain.cancel();
        let force = self.force.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            force.cancel();
        });
    }
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> (Self, ShutdownHandle) {
        let drain = CancellationToken::new();
        let force = CancellationToken::new();
        let handle = ShutdownHandle {
            drain: drain.clone(),
            force: force.clone(),
        };
        (
            Self {
                config,
                drain,
                force,
            },
            handle,
        )
    }

    /// Bind and serve until shutdown
    ///
    /// Consumes the server; the registration callback runs exactly
    /// once, before the listener binds.
    pub async fn serve(mut self) -> Result<(), GatewayError> {
        let mut routes = RoutesBuilder::default();
        if let Some(registrar) = self.config.registrar.take() {
            registrar(&mut routes, &self.config.limits);
        }

        let mut builder = Server::builder();
        if let Some(settings) = &self.config.tls {
            let material = ServerTlsMaterial::load(settings)?;
            builder = builder
                .tls_config(material.build())
                .map_err(GatewayError::TlsConfig)?;
        }

        let stack = ServiceBuilder::new()
            .layer(RecoveryLayer::new())
            .layer(ContextLayer::new(self.config.resources.clone()))
            .layer(LoggingLayer::new())
            .layer(AuthLayer::new(
                self.config.auth.clone(),
                self.config.exempt_methods.clone(),
                self.config.validator.clone(),
            ))
            .layer(MetricsLayer::new(self.config.metrics_enabled))
            .into_inner();

        let router = builder.layer(stack).add_routes(routes.routes());

        info!(
            addr = %self.config.bind_addr,
            tls = self.config.tls.is_some(),
            "gateway listening"
        );

        let drain = self.drain.clone();
        let serve = router.serve_with_shutdown(self.config.bind_addr, async move {
            drain.cancelled().await;
            info!("gateway draining in-flight calls");
        });

        tokio::select! {
            result = serve => {
                result.map_err(GatewayError::Transport)?;
                info!("gateway stopped");
            }
            _ = self.force.cancelled() => {
                warn!("grace period elapsed, terminating remaining calls");
            }
        }

        Ok(())
    }
}
