//! Simulated SSE server.
//!
//! A [`StreamServer`] is one mock endpoint that answers every request with a long-lived
//! `text/event-stream` response. Test code pushes raw chunks through it; there is no event
//! formatting here, the chunks are written to the socket exactly as given.
//!
//! Each connection gets its own bounded chunk queue. Only the newest connection is active:
//! when a new one arrives the previous response is ended first, so data never reaches two
//! sockets at once.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::endpoint::{ContextDecorator, EndpointRegistry, IncomingRequestInfo, MockEndpoint};
use crate::error::HarnessError;
use crate::logging::DebugLogger;

const CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";
const CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// One unit of work for a connection's writer.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Data { bytes: Bytes, delay_after: Duration },
    /// End the response now.
    Terminate,
}

/// The chunk queue a context decorator attaches to each request.
#[derive(Clone)]
struct ChunkPipe {
    tx: mpsc::Sender<StreamChunk>,
    rx: Arc<Mutex<Option<mpsc::Receiver<StreamChunk>>>>,
}

struct ActiveStream {
    serial: u64,
    connection: StreamConnection,
}

#[derive(Default)]
struct StreamState {
    next_serial: AtomicU64,
    active: Mutex<Option<ActiveStream>>,
}

impl StreamState {
    /// Makes `connection` the active one, ending whichever was active before.
    fn activate(&self, connection: StreamConnection) -> u64 {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let previous = self.active.lock().replace(ActiveStream { serial, connection });
        if let Some(previous) = previous {
            previous.connection.cancel.cancel();
        }
        serial
    }

    fn deactivate(&self, serial: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.serial == serial) {
            *active = None;
        }
    }

    fn current(&self) -> Option<StreamConnection> {
        self.active.lock().as_ref().map(|a| a.connection.clone())
    }
}

/// One connection from the test service's SSE client.
#[derive(Clone)]
pub struct StreamConnection {
    request: IncomingRequestInfo,
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    logger: DebugLogger,
}

impl StreamConnection {
    /// The request that opened this connection.
    pub fn request(&self) -> &IncomingRequestInfo {
        &self.request
    }

    /// True once the response has ended for any reason.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Writes `data` to the stream. Returns false if the connection is gone.
    pub fn send(&self, data: &str) -> bool {
        self.send_then_wait(data, Duration::ZERO)
    }

    /// Writes `data`, then pauses the writer for `delay` before the next chunk.
    pub fn send_then_wait(&self, data: &str, delay: Duration) -> bool {
        self.logger.log(format!("<< sending: {:?}", data));
        self.push(StreamChunk::Data {
            bytes: Bytes::copy_from_slice(data.as_bytes()),
            delay_after: delay,
        })
    }

    /// Writes `data` in pieces of `size` bytes, pausing `delay_between` after every piece
    /// but the last.
    pub fn send_in_chunks(&self, data: &str, size: usize, delay_between: Duration) -> bool {
        let bytes = data.as_bytes();
        let pieces: Vec<&[u8]> = bytes.chunks(size.max(1)).collect();
        let last = pieces.len().saturating_sub(1);

        for (i, piece) in pieces.into_iter().enumerate() {
            self.logger
                .log(format!("<< sending: {:?}", String::from_utf8_lossy(piece)));
            let delay_after = if i < last { delay_between } else { Duration::ZERO };
            let chunk = StreamChunk::Data {
                bytes: Bytes::copy_from_slice(piece),
                delay_after,
            };
            if !self.push(chunk) {
                return false;
            }
        }
        true
    }

    /// Ends the response from the server side. Chunks queued afterwards are never written.
    pub fn interrupt(&self) -> bool {
        self.logger.log("Deliberately breaking stream connection");
        self.push(StreamChunk::Terminate)
    }

    fn push(&self, chunk: StreamChunk) -> bool {
        if self.cancel.is_cancelled() {
            tracing::debug!("Stream connection already ended; chunk not sent");
            return false;
        }
        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Stream chunk queue is full; chunk not sent");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Stream connection already ended; chunk not sent");
                false
            }
        }
    }
}

/// Mock SSE server endpoint.
pub struct StreamServer {
    endpoint: MockEndpoint,
    state: Arc<StreamState>,
    logger: DebugLogger,
}

impl StreamServer {
    /// Allocates a new stream endpoint on `registry`.
    pub fn new(registry: &EndpointRegistry, chunk_capacity: usize, logger: DebugLogger) -> Self {
        let logger = logger.with_prefix("[mock stream] ");
        let state = Arc::new(StreamState::default());

        let capacity = chunk_capacity.max(1);
        let decorator: ContextDecorator = Box::new(move |context| {
            let (tx, rx) = mpsc::channel(capacity);
            context.extensions_mut().insert(ChunkPipe {
                tx,
                rx: Arc::new(Mutex::new(Some(rx))),
            });
        });

        let handler_state = Arc::clone(&state);
        let handler_logger = logger.clone();
        let endpoint = registry.new_endpoint(
            move |request: IncomingRequestInfo| {
                let state = Arc::clone(&handler_state);
                let logger = handler_logger.clone();
                async move { open_stream(request, state, logger) }
            },
            Some(decorator),
        );

        Self {
            endpoint,
            state,
            logger,
        }
    }

    /// URL the test service's client should connect to.
    pub fn url(&self) -> &str {
        self.endpoint.base_url()
    }

    /// Waits for the test service to open a connection.
    ///
    /// By the time this returns the connection is the active one, so `send` on the server
    /// reaches it.
    pub async fn await_connection(&self, timeout: Duration) -> Result<StreamConnection, HarnessError> {
        let request = self.endpoint.await_connection(timeout).await.map_err(|e| match e {
            HarnessError::Timeout(_) => HarnessError::Timeout(
                "waiting for the test service to make a stream connection".to_string(),
            ),
            other => other,
        })?;
        self.connection_for(request)
    }

    fn connection_for(&self, request: IncomingRequestInfo) -> Result<StreamConnection, HarnessError> {
        let tx = request
            .context
            .extensions()
            .get::<ChunkPipe>()
            .map(|pipe| pipe.tx.clone())
            .ok_or_else(|| HarnessError::Protocol("stream request has no chunk queue".to_string()))?;
        Ok(StreamConnection {
            cancel: request.context.cancel_token().clone(),
            tx,
            logger: self.logger.clone(),
            request,
        })
    }

    /// The connection currently receiving data, if any.
    pub fn active_connection(&self) -> Option<StreamConnection> {
        self.state.current()
    }

    /// Sends to the active connection. Without one this does nothing and returns false.
    pub fn send(&self, data: &str) -> bool {
        self.with_active(|c| c.send(data))
    }

    pub fn send_then_wait(&self, data: &str, delay: Duration) -> bool {
        self.with_active(|c| c.send_then_wait(data, delay))
    }

    pub fn send_in_chunks(&self, data: &str, size: usize, delay_between: Duration) -> bool {
        self.with_active(|c| c.send_in_chunks(data, size, delay_between))
    }

    pub fn interrupt(&self) -> bool {
        self.with_active(|c| c.interrupt())
    }

    fn with_active(&self, f: impl FnOnce(&StreamConnection) -> bool) -> bool {
        match self.state.current() {
            Some(connection) => f(&connection),
            None => {
                tracing::debug!(url = self.url(), "No active stream connection; nothing sent");
                false
            }
        }
    }

    /// Closes the endpoint, ending any open response.
    pub fn close(&self) {
        self.endpoint.close();
    }
}

/// Starts the response for a new connection and hands its chunk queue to a writer.
fn open_stream(request: IncomingRequestInfo, state: Arc<StreamState>, logger: DebugLogger) -> Response {
    logger.log(format!(
        "Got {} connection from SSE client; headers follow",
        request.method
    ));
    for (name, value) in &request.headers {
        logger.log(format!("  {}: {}", name, String::from_utf8_lossy(value.as_bytes())));
    }

    let Some(pipe) = request.context.extensions().get::<ChunkPipe>().cloned() else {
        tracing::warn!("Stream request arrived without a chunk queue");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let Some(rx) = pipe.rx.lock().take() else {
        tracing::warn!("Chunk queue for stream request was already taken");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let tx = pipe.tx;

    let cancel = request.context.cancel_token().clone();
    let serial = state.activate(StreamConnection {
        request,
        tx,
        cancel: cancel.clone(),
        logger: logger.clone(),
    });

    let writer = Writer {
        rx,
        cancel,
        pending_delay: Duration::ZERO,
        state,
        serial,
        logger,
    };
    let body = Body::from_stream(futures::stream::unfold(writer, Writer::next_chunk));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    response
}

/// State of one response body. Dropped when the response ends for any reason.
struct Writer {
    rx: mpsc::Receiver<StreamChunk>,
    cancel: CancellationToken,
    pending_delay: Duration,
    state: Arc<StreamState>,
    serial: u64,
    logger: DebugLogger,
}

impl Writer {
    async fn next_chunk(mut self) -> Option<(Result<Bytes, Infallible>, Self)> {
        if !self.pending_delay.is_zero() {
            let delay = std::mem::take(&mut self.pending_delay);
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let chunk = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            chunk = self.rx.recv() => chunk,
        };

        match chunk {
            Some(StreamChunk::Data { bytes, delay_after }) => {
                self.pending_delay = delay_after;
                Some((Ok(bytes), self))
            }
            Some(StreamChunk::Terminate) | None => None,
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.state.deactivate(self.serial);
        self.cancel.cancel();
        self.logger.log("Stream connection ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new("http://localhost:8111", 10)
    }

    #[test]
    fn test_send_without_connection_is_noop() {
        let server = StreamServer::new(&registry(), 10, DebugLogger::new());
        assert!(server.active_connection().is_none());
        assert!(!server.send("data: x\n\n"));
        assert!(!server.interrupt());
    }

    #[test]
    fn test_url_is_endpoint_url() {
        let registry = registry();
        let server = StreamServer::new(&registry, 10, DebugLogger::new());
        assert!(server.url().starts_with("http://localhost:8111/endpoints/"));
        server.close();
        assert!(registry.is_empty());
    }
}
