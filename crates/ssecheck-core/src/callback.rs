//! Receiving what the test service's client observed.
//!
//! The test service POSTs one JSON message per observation to `<callback>/<counter>`.
//! Requests are handled concurrently, so a [`MessageSortingQueue`] puts them back into
//! counter order before test code sees them. Anything malformed is delivered as an
//! error item instead of being dropped, so a waiting test finds out about it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::endpoint::{EndpointRegistry, IncomingRequestInfo, MockEndpoint};
use crate::error::HarnessError;
use crate::logging::DebugLogger;
use crate::queue::{Disposition, MessageSortingQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Event,
    Comment,
    Error,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Event => "event",
            MessageKind::Comment => "comment",
            MessageKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// An SSE event exactly as the test service's client reported it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub id: String,
}

impl EventMessage {
    /// An event with the default type and no id.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl fmt::Display for EventMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// One callback from the test service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// A callback, or a description of why one could not be used.
type CallbackItem = Result<ReceivedMessage, String>;

/// Mock endpoint that collects callbacks in order.
///
/// At most `capacity` released items wait for the test. Beyond that, the request that
/// released them is not answered until the test catches up, which holds back a test service
/// that posts its callbacks one at a time.
pub struct CallbackReceiver {
    endpoint: MockEndpoint,
    queue: Arc<MessageSortingQueue<CallbackItem>>,
    room: Arc<Semaphore>,
    output: tokio::sync::Mutex<mpsc::UnboundedReceiver<CallbackItem>>,
}

impl CallbackReceiver {
    pub fn new(registry: &EndpointRegistry, capacity: usize, logger: DebugLogger) -> Self {
        let (queue, output) = MessageSortingQueue::new();
        let queue = Arc::new(queue);
        let room = Arc::new(Semaphore::new(capacity.max(1)));

        let handler_queue = Arc::clone(&queue);
        let handler_room = Arc::clone(&room);
        let endpoint = registry.new_endpoint_without_notifications(
            move |request: IncomingRequestInfo| {
                let queue = Arc::clone(&handler_queue);
                let room = Arc::clone(&handler_room);
                let logger = logger.clone();
                async move {
                    let cancel = request.context.cancel_token().clone();
                    let (released, status) = receive(request, &queue, &logger);
                    wait_for_room(&room, released, &cancel).await;
                    status.into_response()
                }
            },
            None,
        );

        Self {
            endpoint,
            queue,
            room,
            output: tokio::sync::Mutex::new(output),
        }
    }

    /// URL to give the test service as its callback URL.
    pub fn url(&self) -> &str {
        self.endpoint.base_url()
    }

    /// Waits for the next callback in sequence.
    pub async fn await_message(&self, timeout: Duration) -> Result<ReceivedMessage, HarnessError> {
        let mut output = self.output.lock().await;
        let item = match tokio::time::timeout(timeout, output.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => return Err(HarnessError::EndpointClosed("callback endpoint".to_string())),
            Err(_) => {
                return Err(HarnessError::Timeout(
                    "waiting for a message from the test service".to_string(),
                ))
            }
        };
        self.room.add_permits(1);
        item.map_err(HarnessError::Protocol)
    }

    /// Closes the endpoint, then the queue. Idempotent.
    pub fn close(&self) {
        self.endpoint.close();
        self.queue.close();
        self.room.close();
    }
}

/// Holds the response until the test has room for `released` more items.
async fn wait_for_room(room: &Semaphore, released: usize, cancel: &CancellationToken) {
    if released == 0 {
        return;
    }
    let wanted = u32::try_from(released).unwrap_or(u32::MAX);
    tokio::select! {
        _ = cancel.cancelled() => {}
        permits = room.acquire_many(wanted) => {
            if let Ok(permits) = permits {
                permits.forget();
            }
        }
    }
}

/// Handles one callback and returns how many items it released to the test.
fn receive(
    request: IncomingRequestInfo,
    queue: &MessageSortingQueue<CallbackItem>,
    logger: &DebugLogger,
) -> (usize, StatusCode) {
    if request.method != Method::POST {
        return (0, StatusCode::METHOD_NOT_ALLOWED);
    }

    let Ok(counter) = request.path.trim_start_matches('/').parse::<u64>() else {
        let error = format!("callback request had invalid path {:?}", request.path);
        logger.log(format!("Error: {}", error));
        let released = usize::from(queue.inject(Err(error)));
        return (released, StatusCode::BAD_REQUEST);
    };

    let (item, status) = match serde_json::from_slice::<ReceivedMessage>(&request.body) {
        Ok(message) => {
            logger.log(format!("Received: {}", String::from_utf8_lossy(&request.body)));
            (Ok(message), StatusCode::ACCEPTED)
        }
        Err(e) => {
            let error = format!(
                "malformed JSON data from test service ({}): {}",
                e,
                String::from_utf8_lossy(&request.body)
            );
            logger.log(format!("Error: {}", error));
            (Err(error), StatusCode::BAD_REQUEST)
        }
    };

    match queue.accept(counter, item) {
        Disposition::Released(n) => (n, status),
        Disposition::Stale => {
            logger.log(format!("Ignored callback with repeated sequence number {}", counter));
            (0, status)
        }
        Disposition::Deferred | Disposition::Closed => (0, status),
    }
}
