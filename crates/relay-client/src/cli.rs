//! `relay` command line: an interactive line client.
//!
//! ```text
//! relay tcp --nick alice [--server 127.0.0.1:5555]
//! relay udp --nick carol [--server 127.0.0.1:5556]
//! ```
//!
//! Lines typed on stdin are sent as chat; frames from the relay are printed
//! as they arrive. Over TCP, `quit` leaves. Over UDP, `/list` and `/exit` are
//! passed through as commands.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use relay_protocol::is_quit;
use relay_protocol::UdpCommand;

use crate::client::{TcpChatClient, UdpChatClient};

/// Relay chat client
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat over a TCP stream
    Tcp {
        /// Nickname to join with
        #[arg(long)]
        nick: String,

        /// Relay TCP address
        #[arg(long, default_value = "127.0.0.1:5555")]
        server: SocketAddr,
    },
    /// Chat over UDP datagrams
    Udp {
        /// Nickname to join with
        #[arg(long)]
        nick: String,

        /// Relay UDP address
        #[arg(long, default_value = "127.0.0.1:5556")]
        server: SocketAddr,
    },
}

/// Entry point for the `relay` binary.
pub fn run() -> Result<()> {
    let args = Args::parse();
    run_client(args.command)
}

#[tokio::main]
async fn run_client(command: Command) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("relay_client=warn".parse()?),
        )
        .init();

    let input = spawn_stdin_reader();

    match command {
        Command::Tcp { nick, server } => run_tcp(&nick, server, input).await,
        Command::Udp { nick, server } => run_udp(&nick, server, input).await,
    }
}

/// Forwards stdin lines until EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });
    rx
}

async fn run_tcp(nick: &str, server: SocketAddr, mut input: mpsc::Receiver<String>) -> Result<()> {
    let mut client = TcpChatClient::connect(server)
        .await
        .with_context(|| format!("Failed to connect to {server}"))?;

    let welcome = client.join(nick).await.context("Join failed")?;
    println!("{welcome}");

    let (mut lines, mut writer) = client.into_split();

    loop {
        tokio::select! {
            frame = lines.next() => match frame.context("Connection error")? {
                Some(line) => println!("{line}"),
                None => {
                    println!("Connection closed by relay");
                    return Ok(());
                }
            },

            line = input.recv() => match line {
                Some(line) if is_quit(&line) => {
                    writer.quit().await.context("Failed to send quit")?;
                    return Ok(());
                }
                Some(line) if line.trim().is_empty() => {}
                Some(line) => writer.send_text(&line).await.context("Failed to send")?,
                None => {
                    writer.quit().await.context("Failed to send quit")?;
                    return Ok(());
                }
            },
        }
    }
}

async fn run_udp(nick: &str, server: SocketAddr, mut input: mpsc::Receiver<String>) -> Result<()> {
    let client = UdpChatClient::connect(server)
        .await
        .with_context(|| format!("Failed to reach {server}"))?;

    client.join(nick).await.context("Failed to send join")?;

    loop {
        tokio::select! {
            frame = client.recv() => match frame {
                Ok(line) => println!("{line}"),
                // A lost or malformed datagram is not fatal.
                Err(e) => eprintln!("{}", e.user_message()),
            },

            line = input.recv() => {
                let Some(line) = line else {
                    client.exit().await.context("Failed to send exit")?;
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }

                let command = UdpCommand::parse(&line);
                client.send(&command).await.context("Failed to send")?;
                if command == UdpCommand::Exit {
                    return Ok(());
                }
            },
        }
    }
}
