//! End-to-end tests over real loopback sockets.
//!
//! Every test starts its own relay on ephemeral ports.

mod common;

use common::*;
use relay_client::TcpChatClient;
use relay_core::ErrorKind;

#[tokio::test]
async fn test_tcp_chat_reaches_tcp_and_udp_but_not_sender() {
    let relay = start_relay().await;

    let mut alice = tcp_join(&relay, "alice").await;
    let mut bob = tcp_join(&relay, "bob").await;
    let carol = udp_join(&relay, "carol").await;

    lines_until(&mut alice, "📢 bob joined via TCP").await;

    alice.say("hi").await.unwrap();
    lines_until(&mut bob, "[TCP] alice: hi").await;
    datagrams_until(&carol, "[TCP] alice: hi").await;

    // Anything alice receives before bob's reply must not be her own line.
    bob.say("yo").await.unwrap();
    let seen = lines_until(&mut alice, "[TCP] bob: yo").await;
    assert!(!seen.iter().any(|l| l == "[TCP] alice: hi"), "{seen:?}");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_udp_chat_crosses_to_tcp() {
    let relay = start_relay().await;

    let mut alice = tcp_join(&relay, "alice").await;
    let carol = udp_join(&relay, "carol").await;
    let dave = udp_join(&relay, "dave").await;
    datagrams_until(&carol, "📢 dave joined via UDP").await;

    carol.say("hey all").await.unwrap();

    assert_eq!(next_line(&mut alice).await, "[UDP] carol: hey all");
    datagrams_until(&dave, "[UDP] carol: hey all").await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_udp_join_notice_stays_on_udp() {
    let relay = start_relay().await;

    let mut alice = tcp_join(&relay, "alice").await;
    let first = udp_join(&relay, "first").await;
    let _second = udp_join(&relay, "second").await;

    assert_eq!(next_datagram(&first).await, "📢 second joined via UDP");

    // alice's next frame is the chat line, not a UDP join notice.
    first.say("ping").await.unwrap();
    assert_eq!(next_line(&mut alice).await, "[UDP] first: ping");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_list_before_any_join() {
    let relay = start_relay().await;

    let lurker = udp_client(&relay).await;
    lurker.list().await.unwrap();

    let roster = next_datagram(&lurker).await;
    assert!(roster.contains("TCP: None"), "{roster}");
    assert!(roster.contains("UDP: None"), "{roster}");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_list_shows_both_protocols() {
    let relay = start_relay().await;

    let _alice = tcp_join(&relay, "alice").await;
    let _bob = tcp_join(&relay, "bob").await;
    let carol = udp_join(&relay, "carol").await;

    carol.list().await.unwrap();
    assert_eq!(
        next_datagram(&carol).await,
        "👥 Online - TCP: alice, bob | UDP: carol"
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_udp_chat_without_join_is_refused() {
    let relay = start_relay().await;

    let mut alice = tcp_join(&relay, "alice").await;
    let stranger = udp_client(&relay).await;

    stranger.say("hello?").await.unwrap();
    assert_eq!(
        next_datagram(&stranger).await,
        "⚠️ Please join first with /join:<nickname>"
    );

    // Nothing was broadcast: alice's next frame is a later, real chat line.
    let carol = udp_join(&relay, "carol").await;
    carol.say("ping").await.unwrap();
    assert_eq!(next_line(&mut alice).await, "[UDP] carol: ping");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_announces_left_once() {
    let relay = start_relay().await;

    let mut alice = tcp_join(&relay, "alice").await;
    let bob = tcp_join(&relay, "bob").await;
    let carol = udp_join(&relay, "carol").await;
    lines_until(&mut alice, "📢 bob joined via TCP").await;

    drop(bob);

    assert_eq!(next_line(&mut alice).await, "📢 bob left via TCP");
    datagrams_until(&carol, "📢 bob left via TCP").await;

    carol.say("still here").await.unwrap();
    assert_eq!(next_line(&mut alice).await, "[UDP] carol: still here");

    carol.list().await.unwrap();
    datagrams_until(&carol, "👥 Online - TCP: alice | UDP: carol").await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_tcp_nickname_validation() {
    let relay = start_relay().await;
    let addr = relay.tcp_addr().unwrap();

    let mut blank = TcpChatClient::connect(addr).await.unwrap();
    let err = blank.join("   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.message(), "❌ Invalid input: Nickname cannot be empty");
    assert!(closed_by_relay(&mut blank).await);

    let mut long = TcpChatClient::connect(addr).await.unwrap();
    let err = long.join(&"x".repeat(51)).await.unwrap_err();
    assert!(err.message().contains("Nickname too long"), "{err}");
    assert!(closed_by_relay(&mut long).await);

    // Exactly fifty characters is fine, and surrounding whitespace is trimmed.
    let fifty = "y".repeat(50);
    let _ok = tcp_join(&relay, &fifty).await;

    let mut padded = TcpChatClient::connect(addr).await.unwrap();
    let welcome = padded.join("  dora  ").await.unwrap();
    assert_eq!(welcome, "✅ Welcome dora! Connected via TCP");

    assert_eq!(relay.relay().tcp().len().await, 2);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_embedded_newlines_cannot_forge_frames() {
    let relay = start_relay().await;
    let addr = relay.tcp_addr().unwrap();

    let mut forger = TcpChatClient::connect(addr).await.unwrap();
    let err = forger.join("eve\n📢 admin joined via TCP").await.unwrap_err();
    assert_eq!(
        err.message(),
        "❌ Invalid input: Nickname cannot contain control characters"
    );
    assert!(closed_by_relay(&mut forger).await);

    let mut alice = tcp_join(&relay, "alice").await;
    let mut bob = tcp_join(&relay, "bob").await;
    let carol = udp_join(&relay, "carol").await;
    lines_until(&mut alice, "📢 bob joined via TCP").await;

    bob.say("hi\n[UDP] carol: I owe bob money").await.unwrap();
    assert_eq!(
        next_line(&mut alice).await,
        "[TCP] bob: hi [UDP] carol: I owe bob money"
    );
    datagrams_until(&carol, "[TCP] bob: hi [UDP] carol: I owe bob money").await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_udp_nickname_validation() {
    let relay = start_relay().await;

    let client = udp_client(&relay).await;
    client.join("").await.unwrap();
    assert_eq!(
        next_datagram(&client).await,
        "❌ Invalid input: Nickname cannot be empty"
    );

    client.join(&"z".repeat(51)).await.unwrap();
    assert!(next_datagram(&client)
        .await
        .starts_with("❌ Invalid input: Nickname too long"));

    assert!(relay.relay().udp().is_empty().await);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_udp_rejoin_renames() {
    let relay = start_relay().await;

    let client = udp_join(&relay, "carol").await;
    client.join("caroline").await.unwrap();
    assert_eq!(
        next_datagram(&client).await,
        "✅ Welcome caroline! Connected via UDP"
    );

    client.list().await.unwrap();
    assert_eq!(
        next_datagram(&client).await,
        "👥 Online - TCP: None | UDP: caroline"
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_udp_exit() {
    let relay = start_relay().await;

    let carol = udp_join(&relay, "carol").await;
    let dave = udp_join(&relay, "dave").await;
    datagrams_until(&carol, "📢 dave joined via UDP").await;

    dave.exit().await.unwrap();
    assert_eq!(next_datagram(&dave).await, "👋 Goodbye!");
    assert_eq!(next_datagram(&carol).await, "📢 dave left via UDP");

    // Exiting again is harmless and announces nothing.
    dave.exit().await.unwrap();
    assert_eq!(next_datagram(&dave).await, "👋 Goodbye!");

    dave.say("ghost").await.unwrap();
    assert_eq!(
        next_datagram(&dave).await,
        "⚠️ Please join first with /join:<nickname>"
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_notifies_everyone() {
    let relay = start_relay().await;

    let mut alice = tcp_join(&relay, "alice").await;
    let carol = udp_join(&relay, "carol").await;

    relay.shutdown().await;

    lines_until(&mut alice, "🛑 Server is shutting down").await;
    assert!(closed_by_relay(&mut alice).await);
    datagrams_until(&carol, "🛑 Server is shutting down").await;
}
