//! Correlation, request-ID and context-propagation stages
//!
//! Runs early in the chain so every later stage (and the handler)
//! sees the same identifiers. The correlation ID is taken from the
//! `x-correlation-id` header when a caller supplies one and generated
//! otherwise; the request ID is always freshly generated so a single
//! correlation chain can contain many distinct calls.

use std::any::Any;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use uuid::Uuid;

use call_context::{keys, CallContext};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Per-call identifier, unique to this call
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Chain-of-calls identifier, propagated from the caller when present
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[derive(Clone)]
pub struct ContextLayer {
    resources: Option<Arc<dyn Any + Send + Sync>>,
}

impl ContextLayer {
    pub fn new(resources: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        Self { resources }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            resources: self.resources.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ContextService<S> {
    inner: S,
    resources: Option<Arc<dyn Any + Send + Sync>>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for ContextService<S>
where
    S: Service<http::Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Always fresh; never accepted from the wire.
        let request_id = Uuid::new_v4().to_string();

        req.extensions_mut()
            .insert(CorrelationId(correlation_id.clone()));
        req.extensions_mut().insert(RequestId(request_id.clone()));

        let ctx = match &self.resources {
            Some(resources) => CallContext::new(resources.clone()),
            None => CallContext::background(),
        }
        .with_value(keys::REQUEST_ID, request_id)
        .with_value(keys::CORRELATION_ID, correlation_id);
        req.extensions_mut().insert(ctx);

        self.inner.call(req)
    }
}
