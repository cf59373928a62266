//! Per-call execution context
//!
//! A [`CallContext`] carries call identifiers, propagated values and
//! a handle to process-wide shared resources through the interceptor
//! chain into handlers. Every enrichment returns a NEW context value
//! layered over the previous one; nothing is ever mutated in place,
//! so two concurrent calls deriving from the same parent can never
//! observe each other's additions.
//!
//! Cancellation and deadlines derive the same way: a child context's
//! cancellation is triggered by its parent but never flows back up.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Well-known overlay keys
///
/// Absence of any of these is a valid state (for example an
/// unauthenticated health-check call has no identity).
pub mod keys {
    pub const REQUEST_ID: &str = "request-id";
    pub const CORRELATION_ID: &str = "correlation-id";
    pub const TRACE_ID: &str = "trace-id";
    pub const AUTH_IDENTITY: &str = "auth-identity";
}

/// One overlay entry; entries form a persistent chain shared by
/// derived contexts.
struct OverlayEntry {
    key: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    prev: Option<Arc<OverlayEntry>>,
}

/// Immutable, derivable per-call value carrier
///
/// Cloning is cheap (a few `Arc` bumps); handlers receive it by
/// value through request extensions.
#[derive(Clone)]
pub struct CallContext {
    resources: Option<Arc<dyn Any + Send + Sync>>,
    overlay: Option<Arc<OverlayEntry>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

/// Cancels the context it was derived with
///
/// Dropping the handle without calling [`CancelHandle::cancel`]
/// leaves the context governed by its parent alone.
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl CallContext {
    /// Root context carrying the process-wide shared-resources handle
    pub fn new(resources: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            resources: Some(resources),
            overlay: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Root context without shared resources
    pub fn background() -> Self {
        Self {
            resources: None,
            overlay: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a context with one additional overlay entry
    ///
    /// The receiver is unchanged. A repeated key shadows the older
    /// entry in the derived context only.
    pub fn with_value<V: Any + Send + Sync>(&self, key: &'static str, value: V) -> Self {
        let mut derived = self.clone();
        derived.overlay = Some(Arc::new(OverlayEntry {
            key,
            value: Arc::new(value),
            prev: self.overlay.clone(),
        }));
        derived
    }

    /// Derive a context cancellable independently of (but triggered
    /// by) this one
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let child = self.cancel.child_token();
        let mut derived = self.clone();
        derived.cancel = child.clone();
        (derived, CancelHandle { token: child })
    }

    /// Derive a context cancelled at `deadline` at the latest
    ///
    /// An earlier deadline inherited from the parent wins.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let (mut derived, handle) = self.with_cancel();
        derived.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        (derived, handle)
    }

    /// Derive a context cancelled after `timeout` at the latest
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Typed lookup of an overlay entry; newest entry wins
    pub fn value<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        let mut entry = self.overlay.as_ref();
        while let Some(current) = entry {
            if current.key == key {
                return current.value.clone().downcast::<V>().ok();
            }
            entry = current.prev.as_ref();
        }
        None
    }

    /// Downcast access to the process-wide shared-resources handle
    pub fn resources<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resources
            .as_ref()
            .and_then(|res| res.clone().downcast::<T>().ok())
    }

    pub fn request_id(&self) -> Option<String> {
        self.value::<String>(keys::REQUEST_ID).map(|v| (*v).clone())
    }

    pub fn correlation_id(&self) -> Option<String> {
        self.value::<String>(keys::CORRELATION_ID)
            .map(|v| (*v).clone())
    }

    pub fn trace_id(&self) -> Option<String> {
        self.value::<String>(keys::TRACE_ID).map(|v| (*v).clone())
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("request_id", &self.request_id())
            .field("correlation_id", &self.correlation_id())
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_value_does_not_mutate_parent() {
        let parent = CallContext::background();
        let child = parent.with_value(keys::REQUEST_ID, "req-1".to_string());

        assert_eq!(child.request_id().as_deref(), Some("req-1"));
        assert!(parent.request_id().is_none());
    }

    #[test]
    fn test_newest_entry_shadows_older() {
        let ctx = CallContext::background()
            .with_value(keys::REQUEST_ID, "first".to_string())
            .with_value(keys::REQUEST_ID, "second".to_string());

        assert_eq!(ctx.request_id().as_deref(), Some("second"));
    }

    #[test]
    fn test_siblings_do_not_see_each_other() {
        let parent = CallContext::background().with_value(keys::CORRELATION_ID, "c".to_string());
        let a = parent.with_value("a-key", 1u32);
        let b = parent.with_value("b-key", 2u32);

        assert!(a.value::<u32>("b-key").is_none());
        assert!(b.value::<u32>("a-key").is_none());
        // Both still see the shared parent entry.
        assert_eq!(a.correlation_id().as_deref(), Some("c"));
        assert_eq!(b.correlation_id().as_deref(), Some("c"));
    }

    #[test]
    fn test_resources_downcast() {
        struct Shared {
            name: &'static str,
        }

        let ctx = CallContext::new(Arc::new(Shared { name: "state" }));
        assert_eq!(ctx.resources::<Shared>().unwrap().name, "state");
        assert!(ctx.resources::<String>().is_none());
        assert!(CallContext::background().resources::<Shared>().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_derivations_are_isolated() {
        let parent = Arc::new(CallContext::background());
        let mut handles = Vec::new();

        for i in 0..100usize {
            let parent = parent.clone();
            handles.push(tokio::spawn(async move {
                // Leak a unique key name; overlay keys are 'static.
                let key: &'static str = Box::leak(format!("task-{i}").into_boxed_str());
                let ctx = parent.with_value(key, i);

                assert_eq!(*ctx.value::<usize>(key).unwrap(), i);
                // No other task's key is visible in this branch.
                for j in 0..100usize {
                    if j != i {
                        let other = format!("task-{j}");
                        assert!(ctx.value::<usize>(&other).is_none());
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_children() {
        let root = CallContext::background();
        let (parent, parent_cancel) = root.with_cancel();
        let (child, _child_cancel) = parent.with_cancel();

        assert!(!child.is_cancelled());
        parent_cancel.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let (parent, _parent_cancel) = CallContext::background().with_cancel();
        let (child, child_cancel) = parent.with_cancel();

        child_cancel.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_cancellation() {
        let (ctx, _cancel) = CallContext::background().with_timeout(Duration::from_secs(5));

        assert!(!ctx.is_cancelled());
        tokio::time::advance(Duration::from_secs(6)).await;
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_parent_deadline_wins() {
        let (parent, _a) = CallContext::background().with_timeout(Duration::from_secs(2));
        let (child, _b) = parent.with_timeout(Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(child.is_cancelled());
    }
}
