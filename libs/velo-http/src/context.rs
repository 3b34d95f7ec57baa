use crate::request::Request;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A named point on the per-request timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Event name, e.g. `TransportConnecting`.
    pub name: String,
    /// Elapsed time from context creation to the recording of this event.
    pub at: Duration,
    /// Optional free-form detail.
    pub detail: Option<String>,
}

/// Per-request context threaded through the middleware chain.
///
/// Carries a monotonic stopwatch, an ordered event timeline, a sticky
/// state bag, the current (possibly middleware-rewritten) request, and the
/// caller's cancellation token.
///
/// The client creates one context per pipeline invocation and disposes it
/// after the response is returned or the error is raised. Every mutating
/// or reading operation after disposal is a caller bug and fails fast.
///
/// # Panics
///
/// All methods except [`is_disposed`](Self::is_disposed) and
/// [`dispose`](Self::dispose) panic if called after disposal.
pub struct RequestContext {
    started: Instant,
    timeline: Vec<TimelineEvent>,
    state: HashMap<String, Box<dyn Any + Send + Sync>>,
    request: Arc<Request>,
    cancellation: CancellationToken,
    disposed: bool,
}

impl RequestContext {
    /// Create a context for one request. The stopwatch starts here.
    #[must_use]
    pub fn new(request: Request, cancellation: Option<CancellationToken>) -> Self {
        Self {
            started: Instant::now(),
            timeline: Vec::new(),
            state: HashMap::new(),
            request: Arc::new(request),
            cancellation: cancellation.unwrap_or_default(),
            disposed: false,
        }
    }

    fn ensure_live(&self) {
        assert!(
            !self.disposed,
            "request context used after disposal; contexts are single-request scoped"
        );
    }

    /// Elapsed time since context creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.ensure_live();
        self.started.elapsed()
    }

    /// Record a named timeline event.
    pub fn record_event(&mut self, name: impl Into<String>) {
        self.ensure_live();
        self.timeline.push(TimelineEvent {
            name: name.into(),
            at: self.started.elapsed(),
            detail: None,
        });
    }

    /// Record a named timeline event with detail.
    pub fn record_event_with(&mut self, name: impl Into<String>, detail: impl Into<String>) {
        self.ensure_live();
        self.timeline.push(TimelineEvent {
            name: name.into(),
            at: self.started.elapsed(),
            detail: Some(detail.into()),
        });
    }

    /// Events recorded so far, in order.
    #[must_use]
    pub fn timeline(&self) -> &[TimelineEvent] {
        self.ensure_live();
        &self.timeline
    }

    /// Store a value in the sticky state bag, replacing any previous value
    /// under the same key.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.ensure_live();
        self.state.insert(key.into(), Box::new(value));
    }

    /// Read a value from the state bag.
    #[must_use]
    pub fn get_state<T: 'static>(&self, key: &str) -> Option<&T> {
        self.ensure_live();
        self.state.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// The current request. Middleware that rewrites the request records
    /// the replacement here via [`update_request`](Self::update_request).
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        self.ensure_live();
        &self.request
    }

    /// Record a rewritten request as the current one.
    pub fn update_request(&mut self, request: Request) {
        self.ensure_live();
        self.request = Arc::new(request);
    }

    /// The caller's cancellation token (a detached token if none was given).
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        self.ensure_live();
        &self.cancellation
    }

    /// Mark the context disposed. Idempotent.
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    /// Whether the context has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("elapsed", &self.started.elapsed())
            .field("events", &self.timeline.len())
            .field("state_keys", &self.state.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
