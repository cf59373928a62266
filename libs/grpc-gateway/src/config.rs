//! Gateway configuration
//!
//! Everything here is fixed before the first call and read-only for
//! the server's lifetime. Pluggable behavior is supplied as explicit
//! values: a tagged auth mode, a validator function, a registration
//! callback. Nothing is discovered at runtime.

use std::any::Any;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tonic::service::RoutesBuilder;

use token_authority::{Claims, TokenAuthority};

/// Default inbound/outbound message cap (4 MiB, tonic's default)
const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Per-call validation hook
///
/// Invoked with the call's full method name (e.g.
/// `/pkg.Svc/Method`) and the verified claims; an error vetoes the
/// call as permission-denied with the returned message.
pub type MethodValidator = Arc<dyn Fn(&str, &Claims) -> Result<(), String> + Send + Sync>;

/// Service registration callback, invoked exactly once at startup
///
/// External code adds its generated tonic services to the builder.
/// The message limits are passed along because tonic enforces them
/// per generated service type, not at the transport layer.
pub type ServiceRegistrar = Box<dyn FnOnce(&mut RoutesBuilder, &MessageLimits) + Send>;

/// How the authentication stage treats incoming calls
#[derive(Clone)]
pub enum AuthMode {
    /// Stage skipped entirely
    None,
    /// Static bearer credential shared between trusted services
    SharedSecret(SharedSecretConfig),
    /// Signed-token verification through a [`TokenAuthority`]
    TokenAuthority(Arc<TokenAuthority>),
}

/// Shared-secret mode settings
///
/// A matching credential attaches the configured identity
/// attributes to the call.
#[derive(Clone)]
pub struct SharedSecretConfig {
    pub secret: String,
    pub service_name: String,
    pub roles: Vec<String>,
}

/// Inbound/outbound message size caps in bytes
#[derive(Debug, Clone, Copy)]
pub struct MessageLimits {
    pub max_recv_bytes: usize,
    pub max_send_bytes: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_recv_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_send_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// TLS material paths; loaded lazily when the server binds
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Client CA root enabling mutual TLS when present
    pub client_ca_path: Option<PathBuf>,
}

/// Construction-time configuration for a [`crate::GatewayServer`]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub tls: Option<TlsSettings>,
    pub auth: AuthMode,
    /// Full method names exempt from authentication
    pub exempt_methods: HashSet<String>,
    pub validator: Option<MethodValidator>,
    pub registrar: Option<ServiceRegistrar>,
    pub limits: MessageLimits,
    pub metrics_enabled: bool,
    /// Process-wide shared-resources handle propagated into every
    /// call's context
    pub resources: Option<Arc<dyn Any + Send + Sync>>,
}

impl GatewayConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            tls: None,
            auth: AuthMode::None,
            exempt_methods: HashSet::new(),
            validator: None,
            registrar: None,
            limits: MessageLimits::default(),
            metrics_enabled: false,
            resources: None,
        }
    }

    pub fn auth_mode(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn exempt_method(mut self, full_method: impl Into<String>) -> Self {
        self.exempt_methods.insert(full_method.into());
        self
    }

    pub fn validator(
        mut self,
        validator: impl Fn(&str, &Claims) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn registrar(
        mut self,
        registrar: impl FnOnce(&mut RoutesBuilder, &MessageLimits) + Send + 'static,
    ) -> Self {
        self.registrar = Some(Box::new(registrar));
        self
    }

    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn message_limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn resources(mut self, resources: Arc<dyn Any + Send + Sync>) -> Self {
        self.resources = Some(resources);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::new("127.0.0.1:50051".parse().unwrap());
        assert!(matches!(config.auth, AuthMode::None));
        assert!(config.exempt_methods.is_empty());
        assert!(!config.metrics_enabled);
        assert_eq!(config.limits.max_recv_bytes, DEFAULT_MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_builder_accumulates_exemptions() {
        let config = GatewayConfig::new("127.0.0.1:50051".parse().unwrap())
            .exempt_method("/grpc.health.v1.Health/Check")
            .exempt_method("/grpc.health.v1.Health/Watch");
        assert_eq!(config.exempt_methods.len(), 2);
        assert!(config
            .exempt_methods
            .contains("/grpc.health.v1.Health/Check"));
    }
}
