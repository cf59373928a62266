//! gRPC gateway with a layered request pipeline
//!
//! Wraps a tonic server in a fixed interceptor chain: panic recovery,
//! correlation/request-ID propagation, structured call logging,
//! bearer-credential authentication and per-method metrics. Services
//! are registered through a callback; behavior is controlled entirely
//! by [`GatewayConfig`].
//!
//! ```no_run
//! use grpc_gateway::{AuthMode, GatewayConfig, GatewayServer};
//!
//! # async fn run() -> Result<(), grpc_gateway::GatewayError> {
//! let config = GatewayConfig::new("0.0.0.0:50051".parse().unwrap())
//!     .auth_mode(AuthMode::None)
//!     .exempt_method("/grpc.health.v1.Health/Check")
//!     .metrics(true);
//!
//! let (server, shutdown) = GatewayServer::new(config);
//! # drop(shutdown);
//! server.serve().await
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod server;
pub mod tls;

pub use auth::{AuthContextExt, AuthIdentity, AuthLayer};
pub use config::{
    AuthMode, GatewayConfig, MessageLimits, MethodValidator, ServiceRegistrar,
    SharedSecretConfig, TlsSettings,
};
pub use context::{ContextLayer, CorrelationId, RequestId, CORRELATION_ID_HEADER};
pub use error::GatewayError;
pub use logging::LoggingLayer;
pub use metrics::MetricsLayer;
pub use recovery::RecoveryLayer;
pub use server::{GatewayServer, ShutdownHandle};
