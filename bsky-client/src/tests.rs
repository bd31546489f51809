use crate::{BskyApiClient, FeedSource};
use mindfeed_core::{ApiConfig, CoreError, FeedApiError, Session, StaticSession};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serves the scripted `(status, body)` responses in order and reports each request line.
async fn stub_server(
    responses: Vec<(u16, &'static str)>,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let request = String::from_utf8_lossy(&buf).to_string();
            let _ = tx.send(request);

            let reply = format!(
                "HTTP/1.1 {} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{}", addr), rx)
}

fn client_for(base_url: String) -> BskyApiClient {
    let config = ApiConfig {
        base_url,
        timeout_secs: 5,
        ..ApiConfig::default()
    };
    let session = StaticSession::new(Some(Session {
        did: "did:plc:me".to_string(),
        access_jwt: "secret-jwt".to_string(),
    }));
    BskyApiClient::new(&config, Arc::new(session)).unwrap()
}

const ONE_POST: &str = r#"{"feed":[{"post":{"uri":"at://did:plc:a/app.bsky.feed.post/1","cid":"c1","author":{"did":"did:plc:a"},"record":{"text":"hello","createdAt":"2024-05-01T12:00:00Z"}}}],"cursor":"next-1"}"#;

#[tokio::test]
async fn test_timeline_request_shape() {
    let (base, mut requests) = stub_server(vec![(200, ONE_POST)]).await;
    let client = client_for(base);

    let page = client.fetch_timeline(Some("abc"), 25).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.next_cursor.as_deref(), Some("next-1"));

    let request = requests.recv().await.unwrap();
    let request_line = request.lines().next().unwrap();
    assert!(request_line.starts_with("GET /xrpc/app.bsky.feed.getTimeline?"));
    assert!(request_line.contains("algorithm=reverse-chronological"));
    assert!(request_line.contains("limit=25"));
    assert!(request_line.contains("cursor=abc"));
    assert!(request
        .to_ascii_lowercase()
        .contains("authorization: bearer secret-jwt"));
}

#[tokio::test]
async fn test_discovery_and_likes_endpoints() {
    let (base, mut requests) = stub_server(vec![(200, ONE_POST), (200, ONE_POST)]).await;
    let client = client_for(base);

    let feed = "at://did:plc:z72i7hdynmk6r22z27h6tvur/app.bsky.feed.generator/whats-hot";
    let posts = client.fetch_discovery_feed(feed, None, 100).await.unwrap();
    assert_eq!(posts.items[0].text, "hello");
    let line = requests.recv().await.unwrap();
    assert!(line.starts_with("GET /xrpc/app.bsky.feed.getFeed?feed=at%3A%2F%2F"));
    assert!(!line.lines().next().unwrap().contains("cursor="));

    let likes = client.fetch_actor_likes("did:plc:me", None, 50).await.unwrap();
    assert_eq!(likes.items[0].cid, "c1");
    let line = requests.recv().await.unwrap();
    assert!(line.starts_with("GET /xrpc/app.bsky.feed.getActorLikes?actor=did%3Aplc%3Ame"));
}

#[tokio::test]
async fn test_expired_token_is_unauthenticated() {
    let (base, _requests) = stub_server(vec![(
        400,
        r#"{"error":"ExpiredToken","message":"Token has expired"}"#,
    )])
    .await;
    let client = client_for(base);

    let err = client.fetch_timeline(None, 10).await.unwrap_err();
    assert!(err.is_unauthenticated());

    let metrics = client.get_metrics().await;
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(metrics.errors_by_kind.get("unauthorized"), Some(&1));
}

#[tokio::test]
async fn test_server_error_is_recorded() {
    let (base, _requests) = stub_server(vec![(503, r#"{}"#)]).await;
    let client = client_for(base);

    let err = client.fetch_timeline(None, 10).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::FeedApi(FeedApiError::ServerError { status_code: 503 })
    ));

    let endpoint = client
        .get_metrics()
        .await
        .requests_by_endpoint
        .get(crate::api::TIMELINE_ENDPOINT)
        .cloned()
        .unwrap();
    assert_eq!(endpoint.error_count, 1);
    assert_eq!(endpoint.last_status, Some(503));
}

#[tokio::test]
async fn test_garbage_body_is_invalid_response() {
    let (base, _requests) = stub_server(vec![(200, "not json")]).await;
    let client = client_for(base);

    let err = client.fetch_timeline(None, 10).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::FeedApi(FeedApiError::InvalidResponse { .. })
    ));
}

#[test]
fn test_rate_limit_status_starts_full() {
    let client = client_for("http://127.0.0.1:9".to_string());
    let status = tokio_test::block_on(client.get_rate_limit_status());
    assert_eq!(status.available_tokens, status.max_tokens);
    assert!(!status.is_near_limit());
}
