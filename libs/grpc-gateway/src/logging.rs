//! Call logging stage
//!
//! Emits a structured record at call start and another at completion
//! carrying the method name, both call identifiers, the gRPC status
//! code and the elapsed time. Runs after the context stage so the
//! identifiers are always present.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{error, info};

use crate::context::{CorrelationId, RequestId};

#[derive(Clone, Default)]
pub struct LoggingLayer;

impl LoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService { inner }
    }
}

#[derive(Clone)]
pub struct LoggingService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for LoggingService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let method = req.uri().path().to_string();
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        let correlation_id = req
            .extensions()
            .get::<CorrelationId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();

        info!(
            method = %method,
            request_id = %request_id,
            correlation_id = %correlation_id,
            "call started"
        );

        let started = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    info!(
                        method = %method,
                        request_id = %request_id,
                        correlation_id = %correlation_id,
                        grpc_status = grpc_status_code(response.headers()),
                        latency_ms,
                        "call completed"
                    );
                }
                Err(err) => {
                    error!(
                        method = %method,
                        request_id = %request_id,
                        correlation_id = %correlation_id,
                        error = %err,
                        latency_ms,
                        "call failed"
                    );
                }
            }

            result
        })
    }
}

/// Numeric gRPC status from response headers
///
/// Success responses carry the status in trailers rather than
/// headers, so an absent header means OK.
pub(crate) fn grpc_status_code(headers: &http::HeaderMap) -> i32 {
    headers
        .get("grpc-status")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
