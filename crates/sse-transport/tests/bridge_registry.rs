//! Integration tests for the bridge registry against a mock SSE server.

mod support;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use sse_transport::{
    bridge::{BridgeEvent, EventEmitter, MessagePayload, SourceArgs, SourceConfig, SourceRegistry},
    sse::SseClient,
};
use support::{MockServer, Reply};
use tokio::{sync::mpsc, time::timeout};

type Emitted = mpsc::UnboundedReceiver<(String, BridgeEvent)>;

fn registry() -> (SourceRegistry, Emitted) {
    let (tx, rx) = mpsc::unbounded_channel();
    let emitter: Arc<dyn EventEmitter> = Arc::new(move |id: &str, event: BridgeEvent| {
        let _ = tx.send((id.to_string(), event));
    });
    let registry = SourceRegistry::new(SseClient::new().expect("client"), emitter);
    (registry, rx)
}

async fn next(rx: &mut Emitted) -> (String, BridgeEvent) {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for bridge event")
        .expect("emitter dropped")
}

#[tokio::test]
async fn test_initialize_applies_query_and_headers() {
    let server = MockServer::start(vec![Reply::held(&["id: 1\ndata: hi\n\n"])]).await;
    let (registry, mut events) = registry();

    let args = SourceArgs {
        url: server.url("/events"),
        config: Some(SourceConfig {
            query: BTreeMap::from([
                ("channel".to_string(), "news".to_string()),
                ("v".to_string(), "2".to_string()),
            ]),
            headers: BTreeMap::from([("X-Api-Key".to_string(), "k-1".to_string())]),
        }),
    };
    registry.initialize("feed", args).expect("initialize");
    assert!(registry.contains("feed"));

    assert_eq!(next(&mut events).await, ("feed".to_string(), BridgeEvent::Open));
    assert_eq!(
        next(&mut events).await,
        (
            "feed".to_string(),
            BridgeEvent::Message(MessagePayload {
                id: Some("1".to_string()),
                event: "message".to_string(),
                data: "hi".to_string(),
            })
        )
    );

    let requests = server.requests();
    assert_eq!(requests[0].uri, "/events?channel=news&v=2");
    assert_eq!(
        requests[0].headers.get("x-api-key").map(|v| v.as_bytes()),
        Some(b"k-1".as_slice())
    );

    assert!(registry.close("feed"));
    assert_eq!(next(&mut events).await, ("feed".to_string(), BridgeEvent::Closed));
    assert!(!registry.close("feed"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_duplicate_id_closes_previous_first() {
    let server = MockServer::start(vec![Reply::held(&[]), Reply::held(&[])]).await;
    let (registry, mut events) = registry();

    registry
        .initialize("feed", SourceArgs::new(server.url("/a")))
        .expect("first");
    assert_eq!(next(&mut events).await.1, BridgeEvent::Open);

    let first = registry.get("feed").expect("registered");
    registry
        .initialize("feed", SourceArgs::new(server.url("/b")))
        .expect("second");

    assert_eq!(next(&mut events).await.1, BridgeEvent::Closed);
    assert_eq!(next(&mut events).await.1, BridgeEvent::Open);
    assert!(first.is_closed());
    assert_eq!(registry.len(), 1);
    assert!(!registry.get("feed").expect("registered").is_closed());

    registry.close_all();
    assert_eq!(next(&mut events).await.1, BridgeEvent::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_initialize_from_host_thread_replaces_source() {
    let server = MockServer::start(vec![Reply::held(&[]), Reply::held(&["data: again\n\n"])]).await;
    let (registry, mut events) = registry();
    let registry = Arc::new(registry);

    registry
        .initialize("feed", SourceArgs::new(server.url("/a")))
        .expect("first");
    assert_eq!(next(&mut events).await.1, BridgeEvent::Open);

    // Host bridges call in from their own threads, outside the runtime.
    let host = Arc::clone(&registry);
    let url = server.url("/b");
    std::thread::spawn(move || host.initialize("feed", SourceArgs::new(url)))
        .join()
        .expect("host thread")
        .expect("second initialize");

    assert!(registry.contains("feed"));
    assert_eq!(next(&mut events).await, ("feed".to_string(), BridgeEvent::Closed));
    assert_eq!(next(&mut events).await, ("feed".to_string(), BridgeEvent::Open));
    assert_eq!(
        next(&mut events).await.1,
        BridgeEvent::Message(MessagePayload {
            id: None,
            event: "message".to_string(),
            data: "again".to_string(),
        })
    );
    assert_eq!(server.requests()[1].uri, "/b");

    let host = Arc::clone(&registry);
    assert!(std::thread::spawn(move || host.close("feed")).join().expect("host thread"));
    assert_eq!(next(&mut events).await.1, BridgeEvent::Closed);
}

#[tokio::test]
async fn test_rejection_emits_retry_error_and_keeps_retrying() {
    let server = MockServer::start(vec![
        Reply::status(401, "application/json", r#"{"error":"token"}"#),
        Reply::held(&[]),
    ])
    .await;
    let (registry, mut events) = registry();

    // The bridge retries after the default 3s delay.
    registry
        .initialize("auth", SourceArgs::new(server.url("/events")))
        .expect("initialize");

    let (id, event) = next(&mut events).await;
    assert_eq!(id, "auth");
    let payload = match event {
        BridgeEvent::RetryError(payload) => payload,
        other => panic!("expected RETRY_ERROR, got {other:?}"),
    };
    let response = payload.response.expect("response");
    assert_eq!(response.status, 401);
    assert_eq!(response.body, r#"{"error":"token"}"#);
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    assert!(payload.throwable.is_some());

    assert_eq!(next(&mut events).await.1, BridgeEvent::Open);
    registry.close("auth");
    assert_eq!(next(&mut events).await.1, BridgeEvent::Closed);
}
