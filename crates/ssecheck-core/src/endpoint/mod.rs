//! Mock HTTP endpoints served from one shared listener.
//!
//! Test code allocates endpoints on demand; each one gets its own base URL of the form
//! `<harness-base>/endpoints/<id>` which is handed to the test service. Requests under that
//! prefix are routed to the endpoint's handler with the prefix stripped.
//!
//! # Module Structure
//!
//! - `mod.rs` - registry, endpoints, request dispatch
//! - `server` - binding the registry to a TCP listener

mod server;

pub use server::{serve_registry, wait_until_ready, ListenerHandle};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::{Extensions, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ENDPOINT_PATH_PREFIX;
use crate::error::HarnessError;

// =============================================================================
// Request Types
// =============================================================================

/// Per-request data passed to an endpoint's handler.
///
/// The token is cancelled when the endpoint is closed, when the harness shuts down, or when
/// the client drops the connection. Context decorators can attach typed values to
/// `extensions`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    extensions: Extensions,
}

impl RequestContext {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            extensions: Extensions::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// Snapshot of one inbound request.
#[derive(Debug, Clone)]
pub struct IncomingRequestInfo {
    pub method: Method,
    /// Path relative to the endpoint's base URL. Always starts with `/`.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub context: RequestContext,
}

impl IncomingRequestInfo {
    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Produces the response for requests routed to one endpoint.
///
/// The response is returned as soon as its headers are ready; a streaming body keeps the
/// request alive until it ends.
#[async_trait]
pub trait EndpointHandler: Send + Sync + 'static {
    async fn handle(&self, request: IncomingRequestInfo) -> Response;
}

#[async_trait]
impl<F, Fut> EndpointHandler for F
where
    F: Fn(IncomingRequestInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, request: IncomingRequestInfo) -> Response {
        (self)(request).await
    }
}

/// Adjusts the context of each request before the handler sees it.
pub type ContextDecorator = Box<dyn Fn(&mut RequestContext) + Send + Sync>;

// =============================================================================
// Registry
// =============================================================================

struct RegistryInner {
    base_url: String,
    notification_capacity: usize,
    next_id: AtomicU64,
    endpoints: Mutex<HashMap<String, Arc<EndpointShared>>>,
    shutdown: CancellationToken,
}

/// Owns every mock endpoint and routes requests to them.
///
/// Cloning gives another handle to the same registry.
#[derive(Clone)]
pub struct EndpointRegistry {
    inner: Arc<RegistryInner>,
}

impl EndpointRegistry {
    /// Creates an empty registry. `base_url` is how the test service reaches the listener.
    pub fn new(base_url: impl Into<String>, notification_capacity: usize) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            inner: Arc::new(RegistryInner {
                base_url,
                notification_capacity: notification_capacity.max(1),
                next_id: AtomicU64::new(1),
                endpoints: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Allocates a new endpoint backed by `handler`.
    ///
    /// Each request is announced to [`MockEndpoint::await_connection`] once the handler has
    /// produced its response.
    pub fn new_endpoint(
        &self,
        handler: impl EndpointHandler,
        decorator: Option<ContextDecorator>,
    ) -> MockEndpoint {
        self.register(Box::new(handler), decorator, true)
    }

    /// Allocates an endpoint whose requests are never announced.
    ///
    /// For endpoints that consume requests entirely in their handler. `await_connection` on
    /// such an endpoint returns `EndpointClosed` at once.
    pub fn new_endpoint_without_notifications(
        &self,
        handler: impl EndpointHandler,
        decorator: Option<ContextDecorator>,
    ) -> MockEndpoint {
        self.register(Box::new(handler), decorator, false)
    }

    fn register(
        &self,
        handler: Box<dyn EndpointHandler>,
        decorator: Option<ContextDecorator>,
        notifications: bool,
    ) -> MockEndpoint {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let base_url = format!("{}{}{}", self.inner.base_url, ENDPOINT_PATH_PREFIX, id);
        let (tx, rx) = mpsc::channel(self.inner.notification_capacity);
        let tx = notifications.then_some(tx);

        let shared = Arc::new(EndpointShared {
            id: id.clone(),
            base_url,
            handler,
            decorator,
            notify: Mutex::new(tx),
            active: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            registry: Arc::downgrade(&self.inner),
        });
        self.inner.endpoints.lock().insert(id.clone(), Arc::clone(&shared));
        tracing::debug!(endpoint = %id, "Registered mock endpoint");

        MockEndpoint {
            shared,
            notifications: tokio::sync::Mutex::new(rx),
        }
    }

    /// Number of currently registered endpoints.
    pub fn len(&self) -> usize {
        self.inner.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, id: &str) -> Option<Arc<EndpointShared>> {
        self.inner.endpoints.lock().get(id).cloned()
    }

    /// Closes every endpoint and cancels all in-flight requests.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let endpoints: Vec<_> = self.inner.endpoints.lock().drain().map(|(_, e)| e).collect();
        for endpoint in endpoints {
            endpoint.close();
        }
    }

    /// Router answering `HEAD /` and dispatching everything else to endpoints.
    pub fn router(&self) -> Router {
        Router::new().fallback(dispatch).with_state(self.clone())
    }
}

async fn dispatch(State(registry): State<EndpointRegistry>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    if path == "/" && request.method() == Method::HEAD {
        return StatusCode::OK.into_response();
    }

    let Some(rest) = path.strip_prefix(ENDPOINT_PATH_PREFIX) else {
        tracing::warn!(%path, "Request for unrecognized path");
        return StatusCode::NOT_FOUND.into_response();
    };
    let (id, suffix) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };

    match registry.get(id) {
        Some(endpoint) => endpoint.serve(request, suffix.to_string()).await,
        None => {
            tracing::debug!(endpoint = %id, "Request for unknown or closed endpoint");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

// =============================================================================
// Endpoints
// =============================================================================

struct EndpointShared {
    id: String,
    base_url: String,
    handler: Box<dyn EndpointHandler>,
    decorator: Option<ContextDecorator>,
    notify: Mutex<Option<mpsc::Sender<IncomingRequestInfo>>>,
    /// Tokens of in-flight requests, by request number.
    active: Mutex<HashMap<u64, CancellationToken>>,
    next_request: AtomicU64,
    closed: AtomicBool,
    registry: Weak<RegistryInner>,
}

impl EndpointShared {
    async fn serve(self: Arc<Self>, request: Request, path: String) -> Response {
        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(endpoint = %self.id, "Failed to read request body: {}", e);
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        let Some(guard) = self.track_request() else {
            return StatusCode::NOT_FOUND.into_response();
        };

        let mut context = RequestContext::new(guard.cancel.clone());
        if let Some(decorate) = &self.decorator {
            decorate(&mut context);
        }

        let info = IncomingRequestInfo {
            method: parts.method,
            path,
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
            context,
        };
        let notice = info.clone();
        let response = self.handler.handle(info).await;

        // Only announce the request once the handler has set it up.
        self.notify(notice);
        attach_guard(response, guard)
    }

    /// Registers a token for a new request, unless the endpoint is closed.
    fn track_request(self: &Arc<Self>) -> Option<RequestGuard> {
        let parent = self.registry.upgrade()?.shutdown.clone();
        let cancel = parent.child_token();
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);

        let mut active = self.active.lock();
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        active.insert(id, cancel.clone());
        Some(RequestGuard {
            endpoint: Arc::clone(self),
            id,
            cancel,
        })
    }

    fn notify(&self, info: IncomingRequestInfo) {
        let notify = self.notify.lock();
        let Some(tx) = notify.as_ref() else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(info) {
            tracing::warn!(
                endpoint = %self.id,
                "Incoming request notification queue is full; notification dropped"
            );
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.endpoints.lock().remove(&self.id);
        }
        self.notify.lock().take();

        let tokens: Vec<_> = self.active.lock().drain().map(|(_, t)| t).collect();
        for token in &tokens {
            token.cancel();
        }
        tracing::debug!(endpoint = %self.id, cancelled = tokens.len(), "Closed mock endpoint");
    }
}

/// Lives as long as the request does; dropping it cancels and forgets the request's token.
struct RequestGuard {
    endpoint: Arc<EndpointShared>,
    id: u64,
    cancel: CancellationToken,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.endpoint.active.lock().remove(&self.id);
    }
}

/// Keeps the request tracked until the response body has been fully sent or dropped.
fn attach_guard(response: Response, guard: RequestGuard) -> Response {
    let (parts, body) = response.into_parts();
    if body.size_hint().exact().is_some() {
        drop(guard);
        return Response::from_parts(parts, body);
    }

    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

/// Handle to one registered endpoint.
///
/// Dropping the handle closes the endpoint.
pub struct MockEndpoint {
    shared: Arc<EndpointShared>,
    notifications: tokio::sync::Mutex<mpsc::Receiver<IncomingRequestInfo>>,
}

impl MockEndpoint {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// URL the test service should use for this endpoint.
    pub fn base_url(&self) -> &str {
        &self.shared.base_url
    }

    /// Waits for the next request to arrive at this endpoint.
    pub async fn await_connection(&self, timeout: Duration) -> Result<IncomingRequestInfo, HarnessError> {
        let mut rx = self.notifications.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(info)) => Ok(info),
            Ok(None) => Err(HarnessError::EndpointClosed(format!("endpoint {}", self.id()))),
            Err(_) => Err(HarnessError::Timeout(
                "waiting for an incoming request from the test service".to_string(),
            )),
        }
    }

    /// Number of requests currently being handled.
    pub fn active_requests(&self) -> usize {
        self.shared.active.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Unregisters the endpoint and cancels its in-flight requests. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler() -> impl EndpointHandler {
        |_req: IncomingRequestInfo| async { StatusCode::OK.into_response() }
    }

    #[test]
    fn test_endpoint_urls_are_unique() {
        let registry = EndpointRegistry::new("http://localhost:8111/", 10);
        let a = registry.new_endpoint(ok_handler(), None);
        let b = registry.new_endpoint(ok_handler(), None);

        assert_ne!(a.base_url(), b.base_url());
        assert!(a.base_url().starts_with("http://localhost:8111/endpoints/"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_close_unregisters_once() {
        let registry = EndpointRegistry::new("http://localhost:8111", 10);
        let endpoint = registry.new_endpoint(ok_handler(), None);

        endpoint.close();
        endpoint.close();
        assert!(endpoint.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_closes_endpoint() {
        let registry = EndpointRegistry::new("http://localhost:8111", 10);
        drop(registry.new_endpoint(ok_handler(), None));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_await_connection_after_close() {
        let registry = EndpointRegistry::new("http://localhost:8111", 10);
        let endpoint = registry.new_endpoint(ok_handler(), None);
        endpoint.close();

        let err = endpoint
            .await_connection(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::EndpointClosed(_)));
    }

    #[tokio::test]
    async fn test_await_connection_times_out() {
        let registry = EndpointRegistry::new("http://localhost:8111", 10);
        let endpoint = registry.new_endpoint(ok_handler(), None);

        let err = endpoint
            .await_connection(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
