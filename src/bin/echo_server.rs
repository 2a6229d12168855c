//! Echo server demo: pumps one UDP socket into the engine and bounces every
//! text and binary message back to its sender.
//!
//! Signalling runs over stdin/stdout: paste a browser's offer SDP followed
//! by an empty line, and the answer is printed for pasting back. Usage:
//!
//! ```text
//! echo_server [host] [port]
//! ```

use anyhow::{Context, Result};
use datachan::{Event, Server, ServerConfig};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host: Ipv4Addr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1".to_string())
        .parse()
        .context("bad host")?;
    let port: u16 = args
        .next()
        .unwrap_or_else(|| "9555".to_string())
        .parse()
        .context("bad port")?;

    let socket = Arc::new(UdpSocket::bind((host, port)).await?);
    info!("listening on {}:{}", host, port);

    let config = ServerConfig::builder().host(host).port(port).build();
    let mut server = Server::new(config)?;

    let udp = socket.clone();
    server.set_write_callback(move |datagram, addr, _peer| {
        if let Err(e) = udp.try_send_to(datagram, addr) {
            warn!("udp send to {} failed: {}", addr, e);
        }
    });
    server.set_error_callback(|message| warn!("engine: {}", message));

    info!("paste an offer SDP followed by an empty line");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut offer = String::new();
    let mut stdin_open = true;

    let mut buf = [0u8; 1500];
    let mut tick = tokio::time::interval(Duration::from_millis(10));
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, addr)) => server.handle_udp(addr, &buf[..len]),
                    Err(e) => warn!("udp recv failed: {}", e),
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) if line.trim().is_empty() => {
                        if !offer.is_empty() {
                            match server.exchange_sdp(&offer) {
                                Ok(exchange) => {
                                    info!("peer admitted");
                                    println!("{}", exchange.answer);
                                }
                                Err(e) => warn!("offer rejected: {}", e),
                            }
                            offer.clear();
                        }
                    }
                    Some(line) => {
                        offer.push_str(&line);
                        offer.push('\n');
                    }
                    None => stdin_open = false,
                }
            }
            _ = tick.tick() => {
                while let Some(event) = server.update() {
                    match event {
                        Event::ClientJoin(peer) => info!("join: {:?}", peer),
                        Event::ClientLeave(peer) => info!("leave: {:?}", peer),
                        Event::TextData { peer, data } => {
                            if let Ok(text) = std::str::from_utf8(&data) {
                                let _ = server.send_text(peer, text);
                            }
                        }
                        Event::BinaryData { peer, data } => {
                            let _ = server.send_binary(peer, &data);
                        }
                    }
                }
            }
        }
    }
}
