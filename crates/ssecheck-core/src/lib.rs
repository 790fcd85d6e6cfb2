//! Contract-test harness for server-sent-events clients.
//!
//! The harness drives an external test service through its HTTP control protocol,
//! plays the SSE server the service's client connects to, and collects what the client
//! reports back through callbacks.

pub mod callback;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod harness;
pub mod logging;
pub mod queue;
pub mod report;
pub mod scope;
pub mod service;
pub mod sse;
pub mod stream;

pub use callback::{CallbackReceiver, EventMessage, MessageKind, ReceivedMessage};
pub use config::HarnessConfig;
pub use endpoint::{EndpointRegistry, IncomingRequestInfo, MockEndpoint, RequestContext};
pub use error::HarnessError;
pub use harness::Harness;
pub use logging::DebugLogger;
pub use queue::{Disposition, MessageSortingQueue};
pub use report::{ConsoleTestLogger, DebugOutputPolicy, TestLogger};
pub use scope::{run_tests, Abort, Outcome, Results, TestConfiguration, TestId, TestScope, TestStatus};
pub use service::{Capabilities, RemoteEntity, TestServiceClient};
pub use sse::{SseClient, SseTestContext};
pub use stream::{StreamConnection, StreamServer};
