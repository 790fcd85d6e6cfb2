use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ssecheck_core::endpoint::{serve_registry, wait_until_ready, ListenerHandle};
use ssecheck_core::{EndpointRegistry, IncomingRequestInfo};
use tokio::net::TcpListener;

async fn start(notification_capacity: usize) -> (EndpointRegistry, ListenerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = EndpointRegistry::new(format!("http://{}", addr), notification_capacity);
    let handle = serve_registry(listener, registry.clone()).await.unwrap();
    (registry, handle)
}

async fn echo(request: IncomingRequestInfo) -> Response {
    format!(
        "{} {} {}",
        request.method,
        request.path,
        String::from_utf8_lossy(&request.body)
    )
    .into_response()
}

/// Streams a tick every 20ms until the request is cancelled.
async fn ticker(request: IncomingRequestInfo) -> Response {
    let cancel = request.context.cancel_token().clone();
    let stream = futures::stream::unfold(cancel, |cancel| async move {
        tokio::select! {
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(Duration::from_millis(20)) => {
                Some((Ok::<_, std::convert::Infallible>(Bytes::from_static(b"tick\n")), cancel))
            }
        }
    });
    Response::new(Body::from_stream(stream))
}

#[tokio::test]
async fn test_listener_answers_head_root() {
    let (registry, handle) = start(10).await;
    wait_until_ready(registry.base_url(), Duration::from_secs(2), Duration::from_millis(10))
        .await
        .unwrap();

    let resp = reqwest::get(format!("{}/", registry.base_url())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    registry.shutdown();
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_path_suffix_is_passed_to_handler() {
    let (registry, _handle) = start(10).await;
    let endpoint = registry.new_endpoint(echo, None);
    let client = reqwest::Client::new();

    let text = client
        .post(format!("{}/some/path?x=1", endpoint.base_url()))
        .body("payload")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "POST /some/path payload");

    let text = client.get(endpoint.base_url()).send().await.unwrap().text().await.unwrap();
    assert_eq!(text, "GET / ");
}

#[tokio::test]
async fn test_unknown_and_closed_endpoints_are_not_found() {
    let (registry, _handle) = start(10).await;
    let endpoint = registry.new_endpoint(echo, None);
    let base = endpoint.base_url().to_string();

    let resp = reqwest::get(format!("{}/endpoints/9999", registry.base_url())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    assert_eq!(reqwest::get(&base).await.unwrap().status(), StatusCode::OK);
    endpoint.close();
    assert_eq!(reqwest::get(&base).await.unwrap().status(), StatusCode::NOT_FOUND);
    assert_eq!(
        reqwest::get(format!("{}/sub/path", base)).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_incoming_request_notification() {
    let (registry, _handle) = start(10).await;
    let endpoint = registry.new_endpoint(echo, None);

    reqwest::Client::new()
        .put(format!("{}/x", endpoint.base_url()))
        .header("X-Test", "yes")
        .body("hello")
        .send()
        .await
        .unwrap();

    let info = endpoint.await_connection(Duration::from_secs(2)).await.unwrap();
    assert_eq!(info.method, "PUT");
    assert_eq!(info.path, "/x");
    assert_eq!(info.header("x-test"), Some("yes"));
    assert_eq!(info.body, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn test_full_notification_queue_drops_without_blocking() {
    let (registry, _handle) = start(1).await;
    let endpoint = registry.new_endpoint(echo, None);

    for _ in 0..3 {
        let resp = reqwest::get(endpoint.base_url()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    assert!(endpoint.await_connection(Duration::from_millis(500)).await.is_ok());
    let err = endpoint
        .await_connection(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_close_ends_streaming_response() {
    let (registry, _handle) = start(10).await;
    let endpoint = registry.new_endpoint(ticker, None);

    let mut resp = reqwest::get(endpoint.base_url()).await.unwrap();
    let first = resp.chunk().await.unwrap().unwrap();
    assert_eq!(first, Bytes::from_static(b"tick\n"));
    assert_eq!(endpoint.active_requests(), 1);

    endpoint.close();

    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(_chunk) = resp.chunk().await.unwrap() {}
    })
    .await;
    assert!(ended.is_ok(), "response did not end after the endpoint was closed");
    assert_eq!(endpoint.active_requests(), 0);
}

#[tokio::test]
async fn test_client_disconnect_cancels_request() {
    let (registry, _handle) = start(10).await;
    let endpoint = registry.new_endpoint(ticker, None);

    let client = reqwest::Client::new();
    let mut resp = client.get(endpoint.base_url()).send().await.unwrap();
    resp.chunk().await.unwrap();
    let info = endpoint.await_connection(Duration::from_secs(2)).await.unwrap();
    assert!(!info.context.is_cancelled());

    drop(resp);
    drop(client);

    let cancelled = tokio::time::timeout(
        Duration::from_secs(2),
        info.context.cancel_token().cancelled(),
    )
    .await;
    assert!(cancelled.is_ok(), "request was not cancelled after the client went away");
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (registry, handle) = start(10).await;
    let endpoint = registry.new_endpoint(ticker, None);

    let mut resp = reqwest::get(endpoint.base_url()).await.unwrap();
    resp.chunk().await.unwrap();

    registry.shutdown();
    assert!(endpoint.is_closed());
    assert!(registry.is_empty());

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("listener did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_endpoint_without_notifications() {
    let (registry, _handle) = start(1).await;
    let endpoint = registry.new_endpoint_without_notifications(echo, None);

    for i in 0..5 {
        let text = reqwest::Client::new()
            .post(format!("{}/{}", endpoint.base_url(), i))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(text, format!("POST /{} ", i));
    }

    let err = endpoint
        .await_connection(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ssecheck_core::HarnessError::EndpointClosed(_)));
}
