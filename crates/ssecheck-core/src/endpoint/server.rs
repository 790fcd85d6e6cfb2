//! Binding the endpoint registry to a TCP listener.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::EndpointRegistry;
use crate::error::HarnessError;

/// A running listener. Call [`ListenerHandle::shutdown`] to stop it.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for open ones to finish.
    ///
    /// Long-lived responses only finish once their endpoints are closed, so close the
    /// registry first.
    pub async fn shutdown(self) -> io::Result<()> {
        self.shutdown.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

/// Serves `registry` on `listener` in a background task.
pub async fn serve_registry(listener: TcpListener, registry: EndpointRegistry) -> io::Result<ListenerHandle> {
    let local_addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let app = registry.router();

    let signal = shutdown.clone();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
    });

    tracing::info!(%local_addr, base_url = registry.base_url(), "Listening for requests from test service");
    Ok(ListenerHandle {
        local_addr,
        shutdown,
        task,
    })
}

/// Polls `HEAD <base_url>/` until the listener answers 200 or `timeout` elapses.
pub async fn wait_until_ready(base_url: &str, timeout: Duration, interval: Duration) -> Result<(), HarnessError> {
    let url = format!("{}/", base_url.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let deadline = Instant::now() + timeout;

    loop {
        match client.head(&url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => tracing::debug!(status = %resp.status(), "Listener probe got unexpected status"),
            Err(e) => tracing::debug!("Listener probe failed: {}", e),
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::ListenerNotReady(url));
        }
        tokio::time::sleep(interval).await;
    }
}
