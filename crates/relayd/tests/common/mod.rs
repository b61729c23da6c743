//! Shared helpers for the relay integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::time::Duration;

use relay_client::{TcpChatClient, UdpChatClient};
use relayd::config::RelayConfig;
use relayd::server::{RelayServer, RunningRelay};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn start_relay() -> RunningRelay {
    start_relay_with(RelayConfig::loopback()).await
}

pub async fn start_relay_with(config: RelayConfig) -> RunningRelay {
    RelayServer::new(config, CancellationToken::new())
        .start()
        .await
        .expect("start relay")
}

pub async fn tcp_join(relay: &RunningRelay, nickname: &str) -> TcpChatClient {
    let addr = relay.tcp_addr().expect("TCP side running");
    let mut client = TcpChatClient::connect(addr).await.expect("connect");
    let welcome = timeout(RECV_TIMEOUT, client.join(nickname))
        .await
        .expect("welcome in time")
        .expect("join accepted");
    assert_eq!(welcome, format!("✅ Welcome {nickname}! Connected via TCP"));
    client
}

pub async fn udp_client(relay: &RunningRelay) -> UdpChatClient {
    let addr = relay.udp_addr().expect("UDP side running");
    UdpChatClient::connect(addr).await.expect("udp connect")
}

pub async fn udp_join(relay: &RunningRelay, nickname: &str) -> UdpChatClient {
    let client = udp_client(relay).await;
    client.join(nickname).await.expect("send join");
    assert_eq!(
        next_datagram(&client).await,
        format!("✅ Welcome {nickname}! Connected via UDP")
    );
    client
}

/// Next TCP frame; panics on timeout or close.
pub async fn next_line(client: &mut TcpChatClient) -> String {
    timeout(RECV_TIMEOUT, client.recv_line())
        .await
        .expect("line in time")
        .expect("read ok")
        .expect("connection open")
}

/// Reads TCP frames up to and including `wanted`, returning all of them.
pub async fn lines_until(client: &mut TcpChatClient, wanted: &str) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let line = next_line(client).await;
        let done = line == wanted;
        seen.push(line);
        if done {
            return seen;
        }
    }
}

/// True once the relay has closed the connection.
pub async fn closed_by_relay(client: &mut TcpChatClient) -> bool {
    loop {
        match timeout(RECV_TIMEOUT, client.recv_line()).await {
            Ok(Ok(None)) | Ok(Err(_)) => return true,
            Ok(Ok(Some(_))) => continue,
            Err(_) => return false,
        }
    }
}

pub async fn next_datagram(client: &UdpChatClient) -> String {
    timeout(RECV_TIMEOUT, client.recv())
        .await
        .expect("datagram in time")
        .expect("datagram ok")
}

/// Reads datagrams up to and including `wanted`, returning all of them.
pub async fn datagrams_until(client: &UdpChatClient, wanted: &str) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let line = next_datagram(client).await;
        let done = line == wanted;
        seen.push(line);
        if done {
            return seen;
        }
    }
}
