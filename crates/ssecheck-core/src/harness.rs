//! Wiring of the test service client, the shared listener, and the endpoint registry.

use std::future::Future;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;

use crate::callback::CallbackReceiver;
use crate::config::HarnessConfig;
use crate::endpoint::{serve_registry, wait_until_ready, EndpointRegistry, ListenerHandle};
use crate::error::HarnessError;
use crate::logging::DebugLogger;
use crate::service::{Capabilities, TestServiceClient};
use crate::stream::StreamServer;

/// A connected test service plus the listener it calls back into.
pub struct Harness {
    config: HarnessConfig,
    runtime: Handle,
    service: TestServiceClient,
    registry: EndpointRegistry,
    listener: Mutex<Option<ListenerHandle>>,
}

impl Harness {
    /// Connects to the test service and starts listening for its requests.
    ///
    /// Must be called from within a tokio runtime; that runtime is used by
    /// [`block_on`](Self::block_on) afterwards.
    pub async fn start(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;

        let service = TestServiceClient::connect(&config.service).await?;

        let listener = TcpListener::bind(("0.0.0.0", config.listener.port)).await?;
        let registry = EndpointRegistry::new(
            config.listener.external_base_url(),
            config.queues.notification_capacity,
        );
        let handle = serve_registry(listener, registry.clone()).await?;

        if let Err(e) = wait_until_ready(
            registry.base_url(),
            config.listener.ready_timeout(),
            config.listener.probe_interval(),
        )
        .await
        {
            registry.shutdown();
            if let Err(shutdown_err) = handle.shutdown().await {
                tracing::warn!("Listener did not shut down cleanly: {}", shutdown_err);
            }
            return Err(e);
        }

        Ok(Self {
            config,
            runtime: Handle::current(),
            service,
            registry,
            listener: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn service(&self) -> &TestServiceClient {
        &self.service
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn capabilities(&self) -> Capabilities {
        self.service.capabilities()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Runs `future` to completion from the sequential test thread.
    ///
    /// Must not be called from a runtime worker thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn new_stream_server(&self, logger: DebugLogger) -> StreamServer {
        StreamServer::new(&self.registry, self.config.queues.chunk_capacity, logger)
    }

    pub fn new_callback_receiver(&self, logger: DebugLogger) -> CallbackReceiver {
        CallbackReceiver::new(&self.registry, self.config.queues.callback_capacity, logger)
    }

    /// Closes every endpoint and stops the listener. Calling it again does nothing.
    pub async fn shutdown(&self) {
        self.registry.shutdown();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.shutdown().await {
                tracing::warn!("Listener did not shut down cleanly: {}", e);
            }
        }
    }
}
