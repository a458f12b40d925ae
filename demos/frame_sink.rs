//! Frame sink demo
//!
//! A WebSocket server that accepts camcast clients and logs every frame it
//! receives. Run it, then point camcast at it:
//!
//! ```text
//! cargo run -p camcast --example frame_sink -- --port 9000
//! cargo run -p camcast -- --endpoint ws://localhost:9000 --auto
//! ```

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::Parser;
use futures::StreamExt;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, Parser)]
#[command(name = "frame_sink", about = "Log JPEG frames sent by camcast")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9000)]
    port: u16,
}

fn describe(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => {
            let Some(encoded) = text.strip_prefix(DATA_URL_PREFIX) else {
                return Some(format!("text message ({} chars), not a JPEG data URL", text.len()));
            };
            match STANDARD.decode(encoded) {
                Ok(jpeg) => Some(format!(
                    "data URL frame: {} bytes JPEG{}",
                    jpeg.len(),
                    if jpeg.starts_with(&[0xFF, 0xD8]) { "" } else { " (bad SOI marker)" }
                )),
                Err(e) => Some(format!("data URL with invalid base64: {}", e)),
            }
        }
        Message::Binary(data) => Some(format!(
            "binary frame: {} bytes{}",
            data.len(),
            if data.starts_with(&[0xFF, 0xD8]) { "" } else { " (not JPEG)" }
        )),
        _ => None,
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("Client connected: {}", peer);

    let started = Instant::now();
    let mut frames = 0u64;
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(message) => {
                if let Some(description) = describe(&message) {
                    frames += 1;
                    info!("{} #{}: {}", peer, frames, description);
                }
            }
            Err(e) => {
                warn!("Connection with {} failed: {}", peer, e);
                break;
            }
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "Client {} left after {} frames ({:.1} fps)",
        peer,
        frames,
        if elapsed > 0.0 { frames as f64 / elapsed } else { 0.0 }
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    camcast::logging::init("info")?;

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("Frame sink listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle_client(stream, peer));
    }
}
