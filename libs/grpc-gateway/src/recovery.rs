//! Panic recovery stage
//!
//! Outermost stage of the chain: a panic anywhere below it is caught
//! and converted into an `Internal` status so one misbehaving handler
//! cannot take down the process. The panic payload is logged but
//! never echoed back to the caller.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};
use tracing::error;

#[derive(Clone, Default)]
pub struct RecoveryLayer;

impl RecoveryLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService { inner }
    }
}

#[derive(Clone)]
pub struct RecoveryService<S> {
    inner: S,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for RecoveryService<S>
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

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // Take the ready service; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let method = req.uri().path().to_string();

        Box::pin(async move {
            let outcome = std::panic::AssertUnwindSafe(inner.call(req))
                .catch_unwind()
                .await;

            match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let detail = panic_message(panic.as_ref());
                    error!(method = %method, panic = %detail, "handler panicked");
                    Ok(Status::internal("internal server error").into_http())
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
