//! Authentication stage
//!
//! Extracts a bearer credential from the `authorization` header and
//! checks it against the configured mode. On success the verified
//! identity is attached to the request extensions and the call
//! context; on failure the call is rejected with `Unauthenticated`
//! before reaching the handler. Methods in the exempt set (health
//! checks, typically) bypass the stage entirely.
//!
//! The optional per-call validator runs after verification, so it
//! sees the same identity the handler would; a veto maps to
//! `PermissionDenied`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use subtle::ConstantTimeEq;
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};
use tracing::warn;

use call_context::{keys, CallContext};
use token_authority::{essential_claims_check, Claims};

use crate::config::{AuthMode, MethodValidator};

/// Verified caller identity attached to authenticated requests
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub token_id: Option<String>,
    /// Peer service name, set in shared-secret mode
    pub service_name: Option<String>,
    pub roles: Vec<String>,
    pub ext: Option<HashMap<String, serde_json::Value>>,
}

/// Typed lookup of the authenticated identity on a call context
///
/// The identity is stored under [`keys::AUTH_IDENTITY`] by the
/// authentication stage; exempt and unauthenticated calls have none.
pub trait AuthContextExt {
    fn auth_identity(&self) -> Option<Arc<AuthIdentity>>;
}

impl AuthContextExt for CallContext {
    fn auth_identity(&self) -> Option<Arc<AuthIdentity>> {
        self.value::<AuthIdentity>(keys::AUTH_IDENTITY)
    }
}

impl AuthIdentity {
    fn from_claims(claims: &Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            issuer: Some(claims.iss.clone()),
            token_id: Some(claims.jti.clone()),
            service_name: None,
            roles: Vec::new(),
            ext: claims.ext.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthLayer {
    mode: AuthMode,
    exempt: Arc<HashSet<String>>,
    validator: Option<MethodValidator>,
}

impl AuthLayer {
    pub fn new(
        mode: AuthMode,
        exempt: HashSet<String>,
        validator: Option<MethodValidator>,
    ) -> Self {
        Self {
            mode,
            exempt: Arc::new(exempt),
            validator,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            mode: self.mode.clone(),
            exempt: self.exempt.clone(),
            validator: self.validator.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    mode: AuthMode,
    exempt: Arc<HashSet<String>>,
    validator: Option<MethodValidator>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let method = req.uri().path().to_string();

        if matches!(self.mode, AuthMode::None) || self.exempt.contains(&method) {
            return Box::pin(async move { inner.call(req).await });
        }

        let token = match bearer_token(req.headers()) {
            Some(token) => token.to_string(),
            None => {
                warn!(method = %method, "missing bearer credential");
                return reject(Status::unauthenticated("missing bearer credential"));
            }
        };

        let outcome = match &self.mode {
            AuthMode::SharedSecret(config) => {
                // Timing-safe comparison; equality time must not
                // depend on where the first mismatching byte sits.
                let matches: bool = token
                    .as_bytes()
                    .ct_eq(config.secret.as_bytes())
                    .into();
                if matches {
                    Ok((
                        AuthIdentity {
                            subject: None,
                            issuer: None,
                            token_id: None,
                            service_name: Some(config.service_name.clone()),
                            roles: config.roles.clone(),
                            ext: None,
                        },
                        None,
                    ))
                } else {
                    Err(Status::unauthenticated("invalid credential"))
                }
            }
            AuthMode::TokenAuthority(authority) => {
                match authority.verify(&token, Some(&essential_claims_check)) {
                    Ok(claims) => Ok((AuthIdentity::from_claims(&claims), Some(claims))),
                    Err(err) => Err(Status::unauthenticated(format!(
                        "credential rejected: {err}"
                    ))),
                }
            }
            AuthMode::None => unreachable!("handled above"),
        };

        let (identity, claims) = match outcome {
            Ok(verified) => verified,
            Err(status) => {
                warn!(method = %method, reason = %status.message(), "call rejected");
                return reject(status);
            }
        };

        // The validator sees the same claims the handler would.
        if let (Some(validator), Some(claims)) = (&self.validator, &claims) {
            if let Err(reason) = validator(&method, claims) {
                warn!(method = %method, reason = %reason, "call vetoed by validator");
                return reject(Status::permission_denied(reason));
            }
        }

        if let Some(ctx) = req.extensions().get::<CallContext>() {
            let enriched = ctx.with_value(keys::AUTH_IDENTITY, identity.clone());
            req.extensions_mut().insert(enriched);
        }
        req.extensions_mut().insert(identity);
        if let Some(claims) = claims {
            req.extensions_mut().insert(claims);
        }

        Box::pin(async move { inner.call(req).await })
    }
}

fn reject<E>(
    status: Status,
) -> Pin<Box<dyn Future<Output = Result<http::Response<BoxBody>, E>> + Send>> {
    Box::pin(async move { Ok(status.into_http()) })
}

fn bearer_token(headers: &http::HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedSecretConfig;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceExt};

    fn shared_secret_layer() -> AuthLayer {
        AuthLayer::new(
            AuthMode::SharedSecret(SharedSecretConfig {
                secret: "s3cret".to_string(),
                service_name: "billing-service".to_string(),
                roles: vec!["internal".to_string()],
            }),
            HashSet::new(),
            None,
        )
    }

    async fn echo_identity(
        req: http::Request<()>,
    ) -> Result<http::Response<BoxBody>, Infallible> {
        let identity = req.extensions().get::<AuthIdentity>().cloned();
        let status = match identity {
            Some(identity) => Status::ok(identity.service_name.unwrap_or_default()),
            None => Status::ok("anonymous"),
        };
        Ok(status.into_http())
    }

    fn request(path: &str, bearer: Option<&str>) -> http::Request<()> {
        let mut builder = http::Request::builder().uri(path);
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(()).unwrap()
    }

    fn grpc_status(response: &http::Response<BoxBody>) -> i32 {
        crate::logging::grpc_status_code(response.headers())
    }

    #[tokio::test]
    async fn test_missing_credential_is_unauthenticated() {
        let mut svc = shared_secret_layer().layer(service_fn(echo_identity));
        let response = svc
            .ready()
            .await
            .unwrap()
            .call(request("/pkg.Svc/Method", None))
            .await
            .unwrap();
        assert_eq!(grpc_status(&response), tonic::Code::Unauthenticated as i32);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_unauthenticated() {
        let mut svc = shared_secret_layer().layer(service_fn(echo_identity));
        let response = svc
            .ready()
            .await
            .unwrap()
            .call(request("/pkg.Svc/Method", Some("not-the-secret")))
            .await
            .unwrap();
        assert_eq!(grpc_status(&response), tonic::Code::Unauthenticated as i32);
    }

    #[tokio::test]
    async fn test_same_length_wrong_secret_rejected() {
        let mut svc = shared_secret_layer().layer(service_fn(echo_identity));
        let response = svc
            .ready()
            .await
            .unwrap()
            .call(request("/pkg.Svc/Method", Some("s3cre7")))
            .await
            .unwrap();
        assert_eq!(grpc_status(&response), tonic::Code::Unauthenticated as i32);
    }

    #[tokio::test]
    async fn test_matching_secret_attaches_identity() {
        let mut svc = shared_secret_layer().layer(service_fn(echo_identity));
        let response = svc
            .ready()
            .await
            .unwrap()
            .call(request("/pkg.Svc/Method", Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(grpc_status(&response), 0);
        let message = response
            .headers()
            .get("grpc-message")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert_eq!(message, "billing-service");
    }

    #[tokio::test]
    async fn test_exempt_method_skips_authentication() {
        let mut exempt = HashSet::new();
        exempt.insert("/grpc.health.v1.Health/Check".to_string());
        let layer = AuthLayer::new(
            AuthMode::SharedSecret(SharedSecretConfig {
                secret: "s3cret".to_string(),
                service_name: "billing-service".to_string(),
                roles: Vec::new(),
            }),
            exempt,
            None,
        );

        let mut svc = layer.layer(service_fn(echo_identity));
        let response = svc
            .ready()
            .await
            .unwrap()
            .call(request("/grpc.health.v1.Health/Check", None))
            .await
            .unwrap();
        assert_eq!(grpc_status(&response), 0);
    }

    #[tokio::test]
    async fn test_mode_none_passes_everything() {
        let layer = AuthLayer::new(AuthMode::None, HashSet::new(), None);
        let mut svc = layer.layer(service_fn(echo_identity));
        let response = svc
            .ready()
            .await
            .unwrap()
            .call(request("/pkg.Svc/Method", None))
            .await
            .unwrap();
        assert_eq!(grpc_status(&response), 0);
    }

    #[tokio::test]
    async fn test_malformed_authorization_header_rejected() {
        let mut svc = shared_secret_layer().layer(service_fn(echo_identity));
        let req = http::Request::builder()
            .uri("/pkg.Svc/Method")
            .header("authorization", "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap();
        let response = svc.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(grpc_status(&response), tonic::Code::Unauthenticated as i32);
    }
}
