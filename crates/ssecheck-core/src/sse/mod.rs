//! SSE-specific test API built on the scope engine.
//!
//! Test bodies run on the sequential test thread, so everything here is synchronous and
//! reports problems through the scope: errors become test failures and the helpers return
//! [`Outcome`]s to be propagated with `?`. Every resource created here is released by a
//! cleanup registered on the scope that created it.

mod client;
pub mod servicedef;

pub use client::SseClient;
pub use servicedef::{CommandParams, CreateStreamParams, ListenParams};

use std::sync::Arc;

use crate::harness::Harness;
use crate::scope::{Outcome, TestScope};
use crate::stream::{StreamConnection, StreamServer};

/// Entry point for test bodies; cheap to clone.
#[derive(Clone)]
pub struct SseTestContext {
    harness: Arc<Harness>,
}

impl SseTestContext {
    pub fn new(harness: Arc<Harness>) -> Self {
        Self { harness }
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    /// Creates a mock stream endpoint that is closed when `t` ends.
    pub fn new_stream_server(&self, t: &mut TestScope) -> Arc<StreamServer> {
        let server = Arc::new(self.harness.new_stream_server(t.debug_logger()));
        let cleanup = Arc::clone(&server);
        t.defer(move || cleanup.close());
        server
    }

    /// Waits for the test service to connect to `server`; fails the test on timeout.
    pub fn await_connection(&self, t: &mut TestScope, server: &StreamServer) -> Outcome<StreamConnection> {
        let timeout = self.harness.config().timeouts.await_connection();
        match self.harness.block_on(server.await_connection(timeout)) {
            Ok(connection) => Ok(connection),
            Err(e) => Err(t.fail(format!("error: {}", e))),
        }
    }

    /// Starts an SSE client in the test service, pointed at `server`.
    ///
    /// `configure` can set any parameter; the tag, stream URL and callback URL are always
    /// filled in here.
    pub fn new_sse_client(
        &self,
        t: &mut TestScope,
        server: &StreamServer,
        configure: impl FnOnce(&mut CreateStreamParams),
    ) -> Outcome<SseClient> {
        let mut params = CreateStreamParams::default();
        configure(&mut params);
        params.stream_url = server.url().to_string();
        params.tag = t.id().to_string();
        SseClient::start(t, Arc::clone(&self.harness), params)
    }

    /// Creates a stream server and a client, then waits for the client's first connection.
    pub fn new_stream_and_client(
        &self,
        t: &mut TestScope,
        configure: impl FnOnce(&mut CreateStreamParams),
    ) -> Outcome<(Arc<StreamServer>, StreamConnection, SseClient)> {
        let server = self.new_stream_server(t);
        let client = self.new_sse_client(t, &server, configure)?;
        let stream = self.await_connection(t, &server)?;
        Ok((server, stream, client))
    }
}
