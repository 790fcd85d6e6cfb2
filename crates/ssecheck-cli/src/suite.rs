//! The SSE contract tests run by the binary.

use std::time::Duration;

use ssecheck_core::scope::{Outcome, TestScope};
use ssecheck_core::sse::servicedef::{
    CAPABILITY_COMMENTS, CAPABILITY_LAST_EVENT_ID, CAPABILITY_RESTART,
};
use ssecheck_core::sse::{CreateStreamParams, SseTestContext};
use ssecheck_core::EventMessage;

/// Runs every test group.
pub fn run_all(t: &mut TestScope, ctx: &SseTestContext) -> Outcome {
    t.run("basic parsing", |t| basic_parsing(t, ctx));
    t.run("comments", |t| comments(t, ctx));
    t.run("reconnection", |t| reconnection(t, ctx));
    Ok(())
}

fn no_delay(params: &mut CreateStreamParams) {
    params.initial_delay_ms = Some(0);
}

fn basic_parsing(t: &mut TestScope, ctx: &SseTestContext) -> Outcome {
    t.run("one-line message in one chunk", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send("data: Hello\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello")])
    });

    t.run("one-line message in two chunks", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send("data: Hel");
        stream.send("lo\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello")])
    });

    t.run("two one-line messages in one chunk", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send("data: Hello\n\ndata: World\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello"), EventMessage::data("World")])
    });

    t.run("one two-line message in one chunk", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send("data: Hello\ndata:World\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello\nWorld")])
    });

    t.run("empty data", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send("data:\n\n");
        client.require_specific_events(t, &[EventMessage::data("")])
    });

    t.run("event with specific type", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        client.be_prepared_to_receive_event_type(t, "greeting")?;
        stream.send("event: greeting\ndata: Hello\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello").with_type("greeting")])
    });

    t.run("event with ID", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send("id: abc\ndata: Hello\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello").with_id("abc")])
    });

    t.run("message split into single bytes", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send_in_chunks("data: Hello\n\n", 1, Duration::from_millis(5));
        client.require_specific_events(t, &[EventMessage::data("Hello")])
    });

    Ok(())
}

fn comments(t: &mut TestScope, ctx: &SseTestContext) -> Outcome {
    t.require_capability(CAPABILITY_COMMENTS)?;

    t.run("single comment", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send(":Hello\n");
        let comment = client.require_comment(t)?;
        t.check_eq("Hello", comment.as_str(), "comment");
        Ok(())
    });

    t.run("comment before event", |t| {
        let (_server, stream, client) = ctx.new_stream_and_client(t, |_| {})?;
        stream.send(":Hello\n");
        stream.send("data: Hello\n\n");
        let comment = client.require_comment(t)?;
        t.check_eq("Hello", comment.as_str(), "comment");
        client.require_specific_events(t, &[EventMessage::data("Hello")])
    });

    Ok(())
}

fn reconnection(t: &mut TestScope, ctx: &SseTestContext) -> Outcome {
    t.run("caller can trigger a restart", |t| {
        t.require_capability(CAPABILITY_RESTART)?;
        let (server, stream1, client) = ctx.new_stream_and_client(t, no_delay)?;

        stream1.send("data: Hello\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello")])?;

        client.restart(t)?;
        let stream2 = ctx.await_connection(t, &server)?;

        stream2.send("data: Thanks\n\n");
        client.require_specific_events(t, &[EventMessage::data("Thanks")])
    });

    t.run("reconnects after the server breaks the connection", |t| {
        let (server, stream1, client) = ctx.new_stream_and_client(t, no_delay)?;

        stream1.send("data: Hello\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello")])?;

        stream1.interrupt();
        client.ignore_error_here();
        let stream2 = ctx.await_connection(t, &server)?;

        stream2.send("data: Again\n\n");
        client.require_specific_events(t, &[EventMessage::data("Again")])
    });

    t.run("sends ID of last received event", |t| {
        t.require_capability(CAPABILITY_LAST_EVENT_ID)?;
        let (server, stream1, client) = ctx.new_stream_and_client(t, no_delay)?;
        t.check(
            stream1.request().header("Last-Event-Id").is_none(),
            "first request should not send Last-Event-Id",
        );

        stream1.send("id: abc\ndata: Hello\n\n");
        client.require_specific_events(t, &[EventMessage::data("Hello").with_id("abc")])?;

        stream1.interrupt();
        let stream2 = ctx.await_connection(t, &server)?;
        t.check_eq(
            &Some("abc"),
            &stream2.request().header("Last-Event-Id"),
            "reconnection request Last-Event-Id",
        );
        Ok(())
    });

    Ok(())
}
