//! Integration tests for the matchmaking server: real sockets, and for
//! game tests a real relay on the other end of the bridge.

use std::time::Duration;

use lobbynet_meta::prelude::*;
use lobbynet_protocol::{Packet, recv_packet, send_packet};
use lobbynet_relay::{Hello, RelayHandle, RelayServer};
use lobbynet_session::LoginRequest;
use lobbynet_transport::{Connection, TcpConnection};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

// =========================================================================
// Harness
// =========================================================================

struct Meta {
    addr: String,
    handle: MetaHandle,
    run: JoinHandle<Result<(), MetaError>>,
}

struct Relay {
    addr: String,
    handle: RelayHandle,
}

fn free_addr() -> String {
    let probe =
        std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    let addr = probe.local_addr().expect("probe addr");
    drop(probe);
    addr.to_string()
}

fn users() -> InMemoryUsers {
    InMemoryUsers::new().with_user("root", "toor", Permission::Superuser)
}

/// Starts a matchmaking server whose relay bridge points nowhere.
async fn start(session: SessionConfig) -> Meta {
    start_with(free_addr(), "127.0.0.1:7397".into(), "127.0.0.1:0".into(), session)
        .await
}

async fn start_with(
    relay_bridge: String,
    relay_public: String,
    bridge_bind: String,
    session: SessionConfig,
) -> Meta {
    let server = MetaServer::builder()
        .bind("127.0.0.1:0")
        .bridge_bind(&bridge_bind)
        .relay_bridge_addr(&relay_bridge)
        .relay_public_addr(&relay_public)
        .session_config(session)
        .users(users())
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().to_string();
    let handle = server.handle();
    let run = tokio::spawn(server.run());
    Meta { addr, handle, run }
}

/// Starts a relay and a matchmaking server wired to each other.
async fn start_pair() -> (Meta, Relay) {
    let meta_bridge = free_addr();
    let relay = RelayServer::builder()
        .bind("127.0.0.1:0")
        .bridge_bind("127.0.0.1:0")
        .meta_bridge_addr(&meta_bridge)
        .build()
        .await
        .expect("relay should build");
    let relay_addr = relay.local_addr().to_string();
    let relay_bridge = relay.bridge_addr().to_string();
    let relay_handle = relay.handle();
    tokio::spawn(relay.run());

    let meta = start_with(
        relay_bridge,
        relay_addr.clone(),
        meta_bridge,
        SessionConfig::default(),
    )
    .await;
    let relay = Relay {
        addr: relay_addr,
        handle: relay_handle,
    };
    (meta, relay)
}

async fn connect(addr: &str) -> TcpConnection {
    TcpConnection::connect(addr).await.expect("connect")
}

fn login_packet(name: &str, registered: bool, nonce: &str) -> Packet {
    LoginRequest {
        protocol_version: 1,
        name: name.into(),
        build: "test".into(),
        registered,
        nonce: Some(nonce.into()),
    }
    .to_packet()
}

/// Logs in anonymously and consumes the welcome. Returns the connection
/// and the name the server assigned.
async fn login(meta: &Meta, name: &str) -> (TcpConnection, String) {
    let conn = connect(&meta.addr).await;
    send_packet(&conn, &login_packet(name, false, "")).await.expect("LOGIN");
    let mut reply = next(&conn).await;
    assert_eq!(reply.command(), "LOGIN");
    let assigned = reply.pop_str().expect("name");
    assert_eq!(next(&conn).await.command(), "TIME");
    assert_eq!(next(&conn).await.command(), "GAMES_UPDATE");
    (conn, assigned)
}

async fn next(conn: &TcpConnection) -> Packet {
    tokio::time::timeout(WAIT, recv_packet(conn))
        .await
        .expect("packet in time")
        .expect("recv")
        .expect("connection open")
}

/// Skips packets until one with `command` arrives.
async fn next_of(conn: &TcpConnection, command: &str) -> Packet {
    loop {
        let packet = next(conn).await;
        if packet.command() == command {
            return packet;
        }
    }
}

/// Expects `DISCONNECT <reason>` followed by the connection closing.
async fn expect_disconnect(conn: &TcpConnection, reason: &str) {
    assert_eq!(next_of(conn, "DISCONNECT").await.fields(), ["DISCONNECT", reason]);
    let after = tokio::time::timeout(WAIT, recv_packet(conn))
        .await
        .expect("close in time");
    assert!(matches!(after, Ok(None)) || after.is_err_and(|e| e.is_broken_link()));
}

async fn send(conn: &TcpConnection, fields: &[&str]) {
    let packet = Packet::new(fields[0]).with_all(fields[1..].iter().copied());
    send_packet(conn, &packet).await.expect("send");
}

/// Polls the live session list until `expected` holds.
async fn wait_for_sessions(handle: &MetaHandle, expected: &[&str]) {
    tokio::time::timeout(WAIT, async {
        loop {
            if handle.sessions().await.expect("server alive") == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions settle in time");
}

/// Opens `game` as the logged-in `host` and returns the relay password.
async fn open_game(host: &TcpConnection, game: &str, relay: &Relay) -> String {
    send(host, &["GAME_OPEN", game, "4"]).await;
    let mut opened = next_of(host, "GAME_OPEN").await;
    assert_eq!(opened.pop_str().expect("name"), game);
    assert_eq!(opened.pop_str().expect("relay"), relay.addr);
    opened.pop_str().expect("password")
}

// =========================================================================
// Login
// =========================================================================

#[tokio::test]
async fn test_login_sends_login_time_motd_then_games() {
    let meta = start(SessionConfig {
        motd: "welcome to the forest".into(),
        ..SessionConfig::default()
    })
    .await;
    let conn = connect(&meta.addr).await;
    send_packet(&conn, &login_packet("bob", false, "")).await.expect("LOGIN");

    assert_eq!(next(&conn).await.fields(), ["LOGIN", "bob", "UNREGISTERED"]);
    let mut time = next(&conn).await;
    assert_eq!(time.command(), "TIME");
    assert!(time.pop_int::<u64>().expect("unix seconds") > 1_600_000_000);
    assert_eq!(
        next(&conn).await.fields(),
        ["CHAT", "*", "welcome to the forest"]
    );
    assert_eq!(next(&conn).await.fields(), ["GAMES_UPDATE", "0"]);
    wait_for_sessions(&meta.handle, &["bob"]).await;
}

#[tokio::test]
async fn test_login_name_collisions_get_suffixes() {
    let meta = start(SessionConfig::default()).await;
    let (_a, first) = login(&meta, "bob").await;
    let (_b, second) = login(&meta, "bob").await;
    let (_c, registered_name) = login(&meta, "root").await;
    assert_eq!(first, "bob");
    assert_eq!(second, "bob1");
    assert_eq!(registered_name, "root1");
}

#[tokio::test]
async fn test_login_registered_gets_permission() {
    let meta = start(SessionConfig::default()).await;
    let conn = connect(&meta.addr).await;
    send_packet(&conn, &login_packet("root", true, "toor"))
        .await
        .expect("LOGIN");
    assert_eq!(next(&conn).await.fields(), ["LOGIN", "root", "SUPERUSER"]);
}

#[tokio::test]
async fn test_login_wrong_password_is_rejected() {
    let meta = start(SessionConfig::default()).await;
    let conn = connect(&meta.addr).await;
    send_packet(&conn, &login_packet("root", true, "guess"))
        .await
        .expect("LOGIN");
    expect_disconnect(&conn, "WRONG_PASSWORD").await;
    wait_for_sessions(&meta.handle, &[]).await;
}

#[tokio::test]
async fn test_first_packet_must_be_login() {
    let meta = start(SessionConfig::default()).await;
    let conn = connect(&meta.addr).await;
    send(&conn, &["CHAT", "hello?"]).await;
    expect_disconnect(&conn, "PROTOCOL_VIOLATION").await;
}

#[tokio::test]
async fn test_malformed_login_is_invalid_packet() {
    let meta = start(SessionConfig::default()).await;
    let conn = connect(&meta.addr).await;
    send(&conn, &["LOGIN", "one", "bob", "b", "false"]).await;
    expect_disconnect(&conn, "INVALID_PACKET").await;
}

#[tokio::test]
async fn test_silent_connection_gets_login_timeout() {
    let meta = start(SessionConfig {
        login_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    })
    .await;
    let conn = connect(&meta.addr).await;
    expect_disconnect(&conn, "LOGIN_TIMEOUT").await;
}

// =========================================================================
// Keepalive and commands
// =========================================================================

#[tokio::test]
async fn test_unanswered_ping_disconnects_with_client_timeout() {
    let meta = start(SessionConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    })
    .await;
    let (conn, _) = login(&meta, "bob").await;

    assert_eq!(next(&conn).await.fields(), ["PING"]);
    expect_disconnect(&conn, "CLIENT_TIMEOUT").await;
    wait_for_sessions(&meta.handle, &[]).await;
}

#[tokio::test]
async fn test_answered_ping_keeps_session_alive() {
    let meta = start(SessionConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    })
    .await;
    let (conn, _) = login(&meta, "bob").await;

    for _ in 0..3 {
        assert_eq!(next(&conn).await.fields(), ["PING"]);
        send(&conn, &["PONG"]).await;
    }
    wait_for_sessions(&meta.handle, &["bob"]).await;
}

#[tokio::test]
async fn test_client_ping_is_answered_and_unknown_commands_ignored() {
    let meta = start(SessionConfig::default()).await;
    let (conn, _) = login(&meta, "bob").await;

    send(&conn, &["DANCE", "wildly"]).await;
    send(&conn, &["PONG"]).await;
    send(&conn, &["PING"]).await;
    assert_eq!(next(&conn).await.fields(), ["PONG"]);
}

#[tokio::test]
async fn test_chat_is_broadcast_to_every_session() {
    let meta = start(SessionConfig::default()).await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;

    send(&bob, &["CHAT", "hello all"]).await;
    assert_eq!(next(&alice).await.fields(), ["CHAT", "bob", "hello all"]);
    assert_eq!(next(&bob).await.fields(), ["CHAT", "bob", "hello all"]);
}

#[tokio::test]
async fn test_chat_without_text_is_invalid_packet() {
    let meta = start(SessionConfig::default()).await;
    let (conn, _) = login(&meta, "bob").await;
    send(&conn, &["CHAT"]).await;
    expect_disconnect(&conn, "INVALID_PACKET").await;
    wait_for_sessions(&meta.handle, &[]).await;
}

#[tokio::test]
async fn test_oversized_chat_disconnects_only_the_sender() {
    let meta = start(SessionConfig::default()).await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;

    // Fills a whole frame; echoed with the sender's name it would not.
    let text = "x".repeat(65527);
    send(&alice, &["CHAT", &text]).await;
    expect_disconnect(&alice, "INVALID_PACKET").await;
    wait_for_sessions(&meta.handle, &["bob"]).await;

    send(&bob, &["CHAT", "still here"]).await;
    assert_eq!(next(&bob).await.fields(), ["CHAT", "bob", "still here"]);
}

#[tokio::test]
async fn test_overlong_game_name_is_invalid_packet() {
    let meta = start(SessionConfig::default()).await;
    let (alice, _) = login(&meta, "alice").await;
    let name = "g".repeat(65);
    send(&alice, &["GAME_OPEN", &name, "4"]).await;
    expect_disconnect(&alice, "INVALID_PACKET").await;
    assert!(meta.handle.games().await.expect("meta alive").is_empty());
}

#[tokio::test]
async fn test_overlong_login_name_is_rejected() {
    let meta = start(SessionConfig::default()).await;
    let conn = connect(&meta.addr).await;
    send_packet(&conn, &login_packet(&"b".repeat(65), false, ""))
        .await
        .expect("LOGIN");
    expect_disconnect(&conn, "PROTOCOL_VIOLATION").await;
}

#[tokio::test]
async fn test_disconnect_command_logs_out() {
    let meta = start(SessionConfig::default()).await;
    let (conn, _) = login(&meta, "bob").await;
    send(&conn, &["DISCONNECT", "CLIENT_QUIT"]).await;
    wait_for_sessions(&meta.handle, &[]).await;
    let (_again, name) = login(&meta, "bob").await;
    assert_eq!(name, "bob");
}

// =========================================================================
// Games
// =========================================================================

#[tokio::test]
async fn test_game_lifecycle_through_the_relay() {
    let (meta, relay) = start_pair().await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;

    let password = open_game(&alice, "forest", &relay).await;
    assert_eq!(password.len(), 32);
    assert_eq!(
        next_of(&bob, "GAMES_UPDATE").await.fields(),
        ["GAMES_UPDATE", "1", "forest", "alice", "CONNECTABLE", "1", "4"]
    );
    assert_eq!(relay.handle.games().await.expect("relay alive"), ["forest"]);

    // The host attaches on the relay; the relay tells us over the bridge.
    let host = connect(&relay.addr).await;
    let hello = Hello {
        game: "forest".into(),
        version: 1,
        host: true,
        password: Some(password),
    };
    send_packet(&host, &hello.to_packet()).await.expect("HELLO");
    assert_eq!(next(&host).await.fields(), ["WELCOME", "0"]);
    assert_eq!(
        next_of(&bob, "GAMES_UPDATE").await.fields(),
        ["GAMES_UPDATE", "1", "forest", "alice", "RUNNING", "1", "4"]
    );

    send(&bob, &["GAME_JOIN", "forest"]).await;
    assert_eq!(
        next(&bob).await.fields(),
        ["GAME_JOIN", "forest", relay.addr.as_str()]
    );
    assert_eq!(
        next(&bob).await.fields(),
        ["GAMES_UPDATE", "1", "forest", "alice", "RUNNING", "2", "4"]
    );

    // Host drops off the relay: the game closes everywhere.
    host.close().await.expect("close");
    assert_eq!(next_of(&bob, "GAMES_UPDATE").await.fields(), ["GAMES_UPDATE", "0"]);
    assert!(meta.handle.games().await.expect("meta alive").is_empty());
    send(&bob, &["GAME_LEAVE"]).await;
    send(&bob, &["GAMES_LIST"]).await;
    assert_eq!(next(&bob).await.fields(), ["GAMES_UPDATE", "0"]);
}

#[tokio::test]
async fn test_host_leaving_ends_game() {
    let (meta, relay) = start_pair().await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;
    open_game(&alice, "forest", &relay).await;
    next_of(&bob, "GAMES_UPDATE").await;

    send(&bob, &["GAME_JOIN", "forest"]).await;
    assert_eq!(next(&bob).await.command(), "GAME_JOIN");
    next(&bob).await;

    send(&alice, &["GAME_LEAVE"]).await;
    assert_eq!(
        next_of(&bob, "GAMES_UPDATE").await.fields(),
        ["GAMES_UPDATE", "0"]
    );
    assert!(meta.handle.games().await.expect("meta alive").is_empty());
}

#[tokio::test]
async fn test_abandoned_game_name_is_freed_on_the_relay() {
    let (meta, relay) = start_pair().await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;

    // The host gives up before attaching to the relay, then reopens.
    open_game(&alice, "forest", &relay).await;
    send(&alice, &["GAME_LEAVE"]).await;
    open_game(&alice, "forest", &relay).await;
    assert_eq!(relay.handle.games().await.expect("relay alive"), ["forest"]);

    // The host disconnects before attaching; someone else takes the name.
    alice.close().await.expect("close");
    wait_for_sessions(&meta.handle, &["bob"]).await;
    let password = open_game(&bob, "forest", &relay).await;
    assert_eq!(relay.handle.games().await.expect("relay alive"), ["forest"]);

    // The relay game is bob's: his password attaches the host.
    let host = connect(&relay.addr).await;
    let hello = Hello {
        game: "forest".into(),
        version: 1,
        host: true,
        password: Some(password),
    };
    send_packet(&host, &hello.to_packet()).await.expect("HELLO");
    assert_eq!(next(&host).await.fields(), ["WELCOME", "0"]);
}

#[tokio::test]
async fn test_disconnecting_player_leaves_roster() {
    let (meta, relay) = start_pair().await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;
    open_game(&alice, "forest", &relay).await;

    send(&bob, &["GAME_JOIN", "forest"]).await;
    assert_eq!(next_of(&bob, "GAME_JOIN").await.command(), "GAME_JOIN");
    assert_eq!(
        next_of(&alice, "GAMES_UPDATE").await.fields(),
        ["GAMES_UPDATE", "1", "forest", "alice", "CONNECTABLE", "1", "4"]
    );
    assert_eq!(
        next(&alice).await.fields(),
        ["GAMES_UPDATE", "1", "forest", "alice", "CONNECTABLE", "2", "4"]
    );

    bob.close().await.expect("close");
    assert_eq!(
        next(&alice).await.fields(),
        ["GAMES_UPDATE", "1", "forest", "alice", "CONNECTABLE", "1", "4"]
    );
}

#[tokio::test]
async fn test_game_open_without_relay_fails_relay_unavailable() {
    let meta = start(SessionConfig::default()).await;
    let (alice, _) = login(&meta, "alice").await;

    send(&alice, &["GAME_OPEN", "forest", "4"]).await;
    assert_eq!(
        next(&alice).await.fields(),
        ["GAME_OPEN_FAILED", "forest", "RELAY_UNAVAILABLE"]
    );
    assert!(meta.handle.games().await.expect("meta alive").is_empty());
}

#[tokio::test]
async fn test_game_open_refusals() {
    let (meta, relay) = start_pair().await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;

    send(&alice, &["GAME_OPEN", "forest", "0"]).await;
    assert_eq!(
        next(&alice).await.fields(),
        ["GAME_OPEN_FAILED", "forest", "INVALID_CAPACITY"]
    );

    open_game(&alice, "forest", &relay).await;
    send(&alice, &["GAME_OPEN", "glade", "2"]).await;
    assert_eq!(
        next_of(&alice, "GAME_OPEN_FAILED").await.fields(),
        ["GAME_OPEN_FAILED", "glade", "ALREADY_IN_GAME"]
    );

    send(&bob, &["GAME_OPEN", "forest", "2"]).await;
    assert_eq!(
        next_of(&bob, "GAME_OPEN_FAILED").await.fields(),
        ["GAME_OPEN_FAILED", "forest", "NAME_IN_USE"]
    );
}

#[tokio::test]
async fn test_join_unknown_game_fails() {
    let meta = start(SessionConfig::default()).await;
    let (bob, _) = login(&meta, "bob").await;
    send(&bob, &["GAME_JOIN", "ghost"]).await;
    assert_eq!(
        next(&bob).await.fields(),
        ["GAME_JOIN_FAILED", "ghost", "GAME_UNKNOWN"]
    );
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_disconnects_everyone_and_is_idempotent() {
    let meta = start(SessionConfig::default()).await;
    let (alice, _) = login(&meta, "alice").await;
    let (bob, _) = login(&meta, "bob").await;

    tokio::time::timeout(WAIT, meta.handle.shutdown())
        .await
        .expect("shutdown acknowledged in time");
    expect_disconnect(&alice, "SERVER_SHUTDOWN").await;
    expect_disconnect(&bob, "SERVER_SHUTDOWN").await;

    tokio::time::timeout(WAIT, meta.handle.shutdown())
        .await
        .expect("second shutdown returns");
    let finished = tokio::time::timeout(WAIT, meta.run)
        .await
        .expect("run returns")
        .expect("run task");
    assert!(finished.is_ok());
    assert!(meta.handle.sessions().await.is_err());
}
