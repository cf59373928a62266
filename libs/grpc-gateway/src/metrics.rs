//! Per-method call metrics
//!
//! Innermost stage of the chain: whatever runs below it is the
//! handler itself, so the recorded latency excludes interceptor
//! overhead from outer stages but includes authentication only when
//! this layer is placed inside it. Counters are labelled by service,
//! method and final status code; the in-flight gauge is decremented
//! on every exit path including panics, via the RAII guard.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use tower::{Layer, Service};

use crate::logging::grpc_status_code;

lazy_static! {
    static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "grpc_requests_total",
        "Total gRPC requests by service, method and status code",
        &["service", "method", "code"]
    )
    .unwrap();
    static ref REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "grpc_request_duration_seconds",
        "gRPC request latency by service and method",
        &["service", "method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();
    static ref REQUESTS_IN_FLIGHT: IntGaugeVec = register_int_gauge_vec!(
        "grpc_requests_in_flight",
        "Currently executing gRPC requests by service and method",
        &["service", "method"]
    )
    .unwrap();
}

/// Decrements the in-flight gauge when dropped
struct InFlightGuard {
    service: String,
    method: String,
}

impl InFlightGuard {
    fn enter(service: &str, method: &str) -> Self {
        REQUESTS_IN_FLIGHT
            .with_label_values(&[service, method])
            .inc();
        Self {
            service: service.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        REQUESTS_IN_FLIGHT
            .with_label_values(&[&self.service, &self.method])
            .dec();
    }
}

/// Split `/pkg.Service/Method` into its service and method parts
fn split_full_method(path: &str) -> (&str, &str) {
    path.trim_start_matches('/')
        .split_once('/')
        .unwrap_or(("unknown", path))
}

#[derive(Clone)]
pub struct MetricsLayer {
    enabled: bool,
}

impl MetricsLayer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            enabled: self.enabled,
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    enabled: bool,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for MetricsService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        if !self.enabled {
            let fut = self.inner.call(req);
            return Box::pin(fut);
        }

        let path = req.uri().path().to_string();
        let (service, method) = split_full_method(&path);
        let service = service.to_string();
        let method = method.to_string();

        let guard = InFlightGuard::enter(&service, &method);
        let started = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            drop(guard);

            REQUEST_DURATION_SECONDS
                .with_label_values(&[&service, &method])
                .observe(started.elapsed().as_secs_f64());

            let code = match &result {
                Ok(response) => grpc_status_code(response.headers()).to_string(),
                // Transport-level failure; no gRPC code was produced.
                Err(_) => "transport_error".to_string(),
            };
            REQUESTS_TOTAL
                .with_label_values(&[&service, &method, &code])
                .inc();

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceExt};

    #[test]
    fn test_split_full_method() {
        assert_eq!(
            split_full_method("/pkg.Svc/Method"),
            ("pkg.Svc", "Method")
        );
        assert_eq!(split_full_method("garbage"), ("unknown", "garbage"));
    }

    #[tokio::test]
    async fn test_counter_increments_with_status_label() {
        let mut svc = MetricsLayer::new(true).layer(service_fn(
            |_req: http::Request<()>| async move {
                let mut response = http::Response::new(());
                response
                    .headers_mut()
                    .insert("grpc-status", http::HeaderValue::from_static("7"));
                Ok::<_, Infallible>(response)
            },
        ));

        let before = REQUESTS_TOTAL
            .with_label_values(&["pkg.Svc", "Denied", "7"])
            .get();
        let req = http::Request::builder()
            .uri("/pkg.Svc/Denied")
            .body(())
            .unwrap();
        svc.ready().await.unwrap().call(req).await.unwrap();

        let after = REQUESTS_TOTAL
            .with_label_values(&["pkg.Svc", "Denied", "7"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn test_in_flight_returns_to_zero() {
        let mut svc = MetricsLayer::new(true).layer(service_fn(
            |_req: http::Request<()>| async move {
                Ok::<_, Infallible>(http::Response::new(()))
            },
        ));

        let req = http::Request::builder()
            .uri("/pkg.Svc/Gauge")
            .body(())
            .unwrap();
        svc.ready().await.unwrap().call(req).await.unwrap();

        assert_eq!(
            REQUESTS_IN_FLIGHT
                .with_label_values(&["pkg.Svc", "Gauge"])
                .get(),
            0
        );
    }

    #[tokio::test]
    async fn test_disabled_layer_records_nothing() {
        let mut svc = MetricsLayer::new(false).layer(service_fn(
            |_req: http::Request<()>| async move {
                Ok::<_, Infallible>(http::Response::new(()))
            },
        ));

        let before = REQUESTS_TOTAL
            .with_label_values(&["pkg.Svc", "Quiet", "0"])
            .get();
        let req = http::Request::builder()
            .uri("/pkg.Svc/Quiet")
            .body(())
            .unwrap();
        svc.ready().await.unwrap().call(req).await.unwrap();

        assert_eq!(
            REQUESTS_TOTAL
                .with_label_values(&["pkg.Svc", "Quiet", "0"])
                .get(),
            before
        );
    }
}
