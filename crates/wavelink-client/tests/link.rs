//! Client-side end-to-end tests against a real server
//!
//! Each test wires a [`wavelink_server::Server`] on a local port to a
//! [`Client`] and exercises the full path: handshake, correlation, queueing
//! across outages, endpoint failover.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wavelink_client::{Client, ClientConfig, LinkState};
use wavelink_core::{RateLimitConfig, ReplyOutcome, Value};
use wavelink_server::{ActionOutcome, FnHandler, Router, Server, ServerConfig};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Router echoing payload tags and recording their arrival order
fn echo_router(order: Arc<Mutex<Vec<String>>>) -> Router {
    Router::builder()
        .route(
            "test/echo/send",
            FnHandler(move |_identity, payload: Value| {
                let order = Arc::clone(&order);
                async move {
                    let tag = payload
                        .get("tag")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    order.lock().unwrap().push(tag.clone());
                    Ok(ActionOutcome::reply(Value::from(tag)))
                }
            }),
        )
        .route(
            "test/slow/wait",
            FnHandler(|_identity, _payload| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(ActionOutcome::reply(Value::Null))
            }),
        )
        .build()
}

async fn start_server_at(addr: SocketAddr, order: Arc<Mutex<Vec<String>>>) -> Server {
    let config = ServerConfig {
        bind_addr: addr,
        rate_limit: RateLimitConfig::permissive(),
        ..ServerConfig::default()
    };
    Server::start(config, echo_router(order)).await.unwrap()
}

async fn start_server(order: Arc<Mutex<Vec<String>>>) -> Server {
    start_server_at(([127, 0, 0, 1], 0).into(), order).await
}

/// Reserve a local port that nothing is listening on
fn reserve_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn endpoint(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

fn fast_config(endpoints: Vec<String>) -> ClientConfig {
    ClientConfig {
        backoff: Duration::from_millis(100),
        ..ClientConfig::with_endpoints(endpoints)
    }
}

fn tagged(tag: &str) -> Option<Value> {
    Some(Value::map([("tag", Value::from(tag))]))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_request_reply_roundtrip() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(Arc::clone(&order)).await;
    let (client, _events) =
        Client::connect(fast_config(vec![endpoint(server.local_addr())])).unwrap();

    let outcome = client
        .request("test", "echo/send", tagged("hello"))
        .await
        .unwrap();
    match outcome {
        ReplyOutcome::Reply(frame) => assert_eq!(frame.payload, Some(Value::from("hello"))),
        ReplyOutcome::TimedOut => panic!("expected a reply"),
    }
    assert_eq!(client.state(), LinkState::Ready);
    client.shutdown();
}

#[tokio::test]
async fn test_timeout_is_soft_and_link_survives() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(Arc::clone(&order)).await;
    let config = ClientConfig {
        request_timeout: Duration::from_millis(100),
        ..fast_config(vec![endpoint(server.local_addr())])
    };
    let (client, _events) = Client::connect(config).unwrap();

    let outcome = client.request("test", "slow/wait", None).await.unwrap();
    assert_eq!(outcome, ReplyOutcome::TimedOut);

    // The link is untouched; other requests keep working.
    assert_eq!(client.state(), LinkState::Ready);
    let outcome = client
        .request("test", "echo/send", tagged("after-timeout"))
        .await
        .unwrap();
    assert!(matches!(outcome, ReplyOutcome::Reply(_)));
    client.shutdown();
}

#[tokio::test]
async fn test_requests_queued_during_outage_replay_in_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let addr = reserve_port();
    let (client, _events) = Client::connect(fast_config(vec![endpoint(addr)])).unwrap();

    // Nothing is listening yet; these pile up in the outbound queue.
    client.notify("test", "echo/send", tagged("first")).unwrap();
    client.notify("test", "echo/send", tagged("second")).unwrap();
    client.notify("test", "echo/send", tagged("third")).unwrap();
    assert_ne!(client.state(), LinkState::Ready);

    let _server = start_server_at(addr, Arc::clone(&order)).await;
    client.wait_for_state(LinkState::Ready).await.unwrap();

    // The replayed notifies land strictly oldest-first.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if order.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("queued requests were not replayed");
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    client.shutdown();
}

#[tokio::test]
async fn test_failover_to_next_endpoint() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let dead = reserve_port();
    let live = start_server(Arc::clone(&order)).await;

    let (client, _events) = Client::connect(fast_config(vec![
        endpoint(dead),
        endpoint(live.local_addr()),
    ]))
    .unwrap();

    // The first endpoint refuses; the rotation reaches the live one after a
    // single backoff.
    tokio::time::timeout(
        Duration::from_secs(5),
        client.wait_for_state(LinkState::Ready),
    )
    .await
    .expect("client never became ready")
    .unwrap();

    let outcome = client
        .request("test", "echo/send", tagged("failover"))
        .await
        .unwrap();
    assert!(matches!(outcome, ReplyOutcome::Reply(_)));
    client.shutdown();
}

#[tokio::test]
async fn test_reconnect_after_server_restart() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let addr = reserve_port();
    let server = start_server_at(addr, Arc::clone(&order)).await;

    let (client, _events) = Client::connect(fast_config(vec![endpoint(addr)])).unwrap();
    client.wait_for_state(LinkState::Ready).await.unwrap();
    let outcome = client
        .request("test", "echo/send", tagged("before"))
        .await
        .unwrap();
    assert!(matches!(outcome, ReplyOutcome::Reply(_)));

    drop(server);
    // Queue a request during the outage, then bring the server back.
    client.notify("test", "echo/send", tagged("during")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _server = start_server_at(addr, Arc::clone(&order)).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if order.lock().unwrap().iter().any(|t| t == "during") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("queued request did not survive the restart");
    client.shutdown();
}
