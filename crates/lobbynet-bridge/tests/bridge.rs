//! Bridge calls over real sockets, including the reconnect-and-retry
//! behaviour.

use std::time::Duration;

use lobbynet_bridge::{
    BridgeCall, BridgeClient, BridgeError, BridgeListener, BridgeRequest,
    BridgeResponse,
};
use tokio::sync::mpsc;

/// Starts a listener whose control side answers every call with
/// `answer(request)` and reports the request on the returned channel.
async fn listen(
    addr: &str,
    answer: fn(&BridgeRequest) -> BridgeResponse,
) -> (BridgeListener, mpsc::UnboundedReceiver<BridgeRequest>) {
    let (calls_tx, mut calls_rx) = mpsc::channel::<BridgeCall>(8);
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let listener = BridgeListener::bind(addr, calls_tx)
        .await
        .expect("should bind");
    tokio::spawn(async move {
        while let Some(call) = calls_rx.recv().await {
            let response = answer(&call.request);
            let _ = seen_tx.send(call.request.clone());
            call.respond(response);
        }
    });
    (listener, seen_rx)
}

fn connected(name: &str) -> BridgeRequest {
    BridgeRequest::GameConnected { name: name.into() }
}

fn closed(name: &str) -> BridgeRequest {
    BridgeRequest::GameClosed { name: name.into() }
}

fn always_ok(_: &BridgeRequest) -> BridgeResponse {
    BridgeResponse::Ok
}

/// Reserves a loopback port that nothing is listening on.
fn free_addr() -> String {
    let probe =
        std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    let addr = probe.local_addr().expect("probe addr");
    drop(probe);
    addr.to_string()
}

#[tokio::test]
async fn test_call_delivers_request_and_ok() {
    let (listener, mut seen) = listen("127.0.0.1:0", always_ok).await;
    let client = BridgeClient::new(listener.local_addr().to_string());

    client.new_game("forest", "pw").await.expect("new_game");
    client.call(&connected("forest")).await.expect("connected");

    assert_eq!(
        seen.recv().await,
        Some(BridgeRequest::NewGame {
            name: "forest".into(),
            password: "pw".into(),
        })
    );
    assert_eq!(
        seen.recv().await,
        Some(BridgeRequest::GameConnected {
            name: "forest".into()
        })
    );
}

#[tokio::test]
async fn test_call_failed_response_is_rejected_not_retried() {
    fn refuse(_: &BridgeRequest) -> BridgeResponse {
        BridgeResponse::failed("NAME_IN_USE")
    }
    let (listener, mut seen) = listen("127.0.0.1:0", refuse).await;
    let client = BridgeClient::new(listener.local_addr().to_string());

    let err = client.new_game("forest", "pw").await.unwrap_err();
    assert!(matches!(err, BridgeError::Rejected(ref r) if r == "NAME_IN_USE"));

    assert!(seen.recv().await.is_some());
    let again = tokio::time::timeout(Duration::from_millis(100), seen.recv());
    assert!(again.await.is_err(), "a rejected call must not be retried");
}

#[tokio::test]
async fn test_call_with_nobody_listening_is_unavailable() {
    let client = BridgeClient::new(free_addr());
    let err = client.call(&closed("forest")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Unavailable { .. }));
}

#[tokio::test]
async fn test_link_established_lazily_when_peer_starts_late() {
    let addr = free_addr();
    let client = BridgeClient::new(addr.clone());

    let err = client.call(&closed("forest")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Unavailable { .. }));

    let (_listener, mut seen) = listen(&addr, always_ok).await;
    client.call(&closed("forest")).await.expect("second call");
    assert_eq!(
        seen.recv().await,
        Some(BridgeRequest::GameClosed {
            name: "forest".into()
        })
    );
}

#[tokio::test]
async fn test_broken_link_reconnects_once_and_succeeds() {
    let (first, _seen) = listen("127.0.0.1:0", always_ok).await;
    let addr = first.local_addr().to_string();
    let client = BridgeClient::new(addr.clone());
    client.call(&connected("forest")).await.expect("first call");

    // Tear down the server side of the established link.
    drop(first);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_second, mut seen) = listen(&addr, always_ok).await;

    client.call(&closed("forest")).await.expect("retried call");
    assert_eq!(
        seen.recv().await,
        Some(BridgeRequest::GameClosed {
            name: "forest".into()
        })
    );
}

#[tokio::test]
async fn test_broken_link_with_dead_peer_fails_deterministically() {
    let (first, _seen) = listen("127.0.0.1:0", always_ok).await;
    let client = BridgeClient::new(first.local_addr().to_string());
    client.call(&connected("forest")).await.expect("first call");

    drop(first);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.call(&closed("forest")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Unavailable { .. }));
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let (calls_tx, mut calls_rx) = mpsc::channel::<BridgeCall>(8);
    let listener = BridgeListener::bind("127.0.0.1:0", calls_tx)
        .await
        .expect("should bind");
    // Hold calls without answering them.
    let held = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Some(call) = calls_rx.recv().await {
            held.push(call);
        }
        held
    });

    let client = BridgeClient::new(listener.local_addr().to_string())
        .with_call_timeout(Duration::from_millis(100));
    let err = client.call(&closed("forest")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout));
    held.abort();
}

#[tokio::test]
async fn test_timed_out_call_reaches_peer_once() {
    let (calls_tx, mut calls_rx) = mpsc::channel::<BridgeCall>(8);
    let listener = BridgeListener::bind("127.0.0.1:0", calls_tx)
        .await
        .expect("should bind");
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let held = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Some(call) = calls_rx.recv().await {
            let _ = seen_tx.send(call.request.clone());
            held.push(call);
        }
        held
    });

    let client = BridgeClient::new(listener.local_addr().to_string())
        .with_call_timeout(Duration::from_millis(100));
    let err = client.new_game("forest", "pw").await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout));

    assert_eq!(
        seen.recv().await,
        Some(BridgeRequest::NewGame {
            name: "forest".into(),
            password: "pw".into(),
        })
    );
    let again = tokio::time::timeout(Duration::from_millis(300), seen.recv());
    assert!(again.await.is_err(), "a timed-out call must not be resent");
    held.abort();
}
