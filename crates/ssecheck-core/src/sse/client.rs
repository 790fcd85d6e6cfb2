use std::cell::Cell;
use std::sync::Arc;

use super::servicedef::{
    CommandParams, CreateStreamParams, ListenParams, CAPABILITY_EVENT_TYPE_LISTENERS, COMMAND_LISTEN,
    COMMAND_RESTART,
};
use crate::callback::{CallbackReceiver, EventMessage, MessageKind, ReceivedMessage};
use crate::harness::Harness;
use crate::logging::DebugLogger;
use crate::scope::{Outcome, TestScope};
use crate::service::RemoteEntity;

const DEFAULT_EVENT_TYPE: &str = "message";

/// An SSE client running inside the test service.
pub struct SseClient {
    harness: Arc<Harness>,
    entity: Arc<RemoteEntity>,
    callback: Arc<CallbackReceiver>,
    ignore_next_error: Cell<bool>,
    logger: DebugLogger,
}

impl SseClient {
    pub(super) fn start(t: &mut TestScope, harness: Arc<Harness>, mut params: CreateStreamParams) -> Outcome<Self> {
        if params.stream_url.is_empty() {
            return Err(t.fail("stream URL was not set in the stream parameters"));
        }
        let logger = t.debug_logger();

        let callback = Arc::new(harness.new_callback_receiver(logger.clone()));
        let cleanup = Arc::clone(&callback);
        t.defer(move || cleanup.close());
        params.callback_url = callback.url().to_string();

        let created = harness.block_on(harness.service().create_entity(&params, "SSE client", &logger));
        let entity = Arc::new(t.require(created)?);

        let cleanup = Arc::clone(&entity);
        let cleanup_harness = Arc::clone(&harness);
        let cleanup_logger = logger.clone();
        t.defer(move || {
            if let Err(e) = cleanup_harness.block_on(cleanup.close()) {
                cleanup_logger.log(format!("Error closing SSE client: {}", e));
            }
        });

        Ok(Self {
            harness,
            entity,
            callback,
            ignore_next_error: Cell::new(false),
            logger,
        })
    }

    pub fn entity(&self) -> &RemoteEntity {
        &self.entity
    }

    /// Waits for the next message of any kind; fails the test on timeout.
    pub fn require_message(&self, t: &mut TestScope) -> Outcome<ReceivedMessage> {
        let timeout = self.harness.config().timeouts.await_message();
        loop {
            let received = self.harness.block_on(self.callback.await_message(timeout));
            let message = t.require(received)?;
            if self.ignore_next_error.replace(false) && message.kind == MessageKind::Error {
                self.logger.log(format!("Ignoring error: {}", message));
                continue;
            }
            return Ok(message);
        }
    }

    fn require_message_of_kind(&self, t: &mut TestScope, kind: MessageKind) -> Outcome<ReceivedMessage> {
        let message = self.require_message(t)?;
        if message.kind != kind {
            return Err(t.fail(format!(
                "received an unexpected message: expected {:?} but got: {}",
                kind.to_string(),
                message
            )));
        }
        Ok(message)
    }

    /// Waits for the client to report an event.
    pub fn require_event(&self, t: &mut TestScope) -> Outcome<EventMessage> {
        let message = self.require_message_of_kind(t, MessageKind::Event)?;
        match message.event {
            Some(event) => Ok(event),
            None => Err(t.fail("event message from test service had no event")),
        }
    }

    /// Waits for the client to report a comment.
    pub fn require_comment(&self, t: &mut TestScope) -> Outcome<String> {
        let message = self.require_message_of_kind(t, MessageKind::Comment)?;
        Ok(message.comment.unwrap_or_default())
    }

    /// Waits for the client to report an error.
    pub fn require_error(&self, t: &mut TestScope) -> Outcome<String> {
        let message = self.require_message_of_kind(t, MessageKind::Error)?;
        Ok(message.error.unwrap_or_default())
    }

    /// Waits for `expected.len()` events and compares each with the expected one.
    ///
    /// An empty event type and "message" are treated as equal, so clients that leave the
    /// default type unset are only caught by tests aimed at that.
    pub fn require_specific_events(&self, t: &mut TestScope, expected: &[EventMessage]) -> Outcome {
        for want in expected {
            let want = with_default_type(want.clone());
            let got = with_default_type(self.require_event(t)?);
            t.check_eq(&want, &got, "event");
        }
        Ok(())
    }

    /// Skips the next message if, and only if, it is an error.
    ///
    /// Some clients report an unexpected end of stream as an error and some do not.
    pub fn ignore_error_here(&self) {
        self.ignore_next_error.set(true);
    }

    /// Tells the client to disconnect and reconnect immediately.
    pub fn restart(&self, t: &mut TestScope) -> Outcome {
        let sent = self
            .harness
            .block_on(self.entity.send_command(COMMAND_RESTART, &()));
        t.require(sent)
    }

    /// Tells the client to listen for `event_type`, for clients that need that.
    ///
    /// Does nothing unless the service has the event-type-listeners capability.
    pub fn be_prepared_to_receive_event_type(&self, t: &mut TestScope, event_type: &str) -> Outcome {
        if !t.has_capability(CAPABILITY_EVENT_TYPE_LISTENERS) {
            return Ok(());
        }
        let params = CommandParams {
            command: COMMAND_LISTEN.to_string(),
            listen: Some(ListenParams {
                event_type: event_type.to_string(),
            }),
        };
        let sent = self
            .harness
            .block_on(self.entity.send_command(&params.command, &params));
        t.require(sent)
    }
}

fn with_default_type(mut event: EventMessage) -> EventMessage {
    if event.event_type.is_empty() {
        event.event_type = DEFAULT_EVENT_TYPE.to_string();
    }
    event
}
