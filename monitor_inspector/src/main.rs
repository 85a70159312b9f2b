use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use monitor_core::{load_monitor_config, load_monitor_config_from_env, ChannelFeed};
use monitor_proto::{decode_frame, ClientId, WorldId, MAX_FRAME_LEN};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{info, trace, warn};

mod app;
mod ui;

use app::InspectorApp;

#[derive(Clone)]
struct ChannelWriter {
    sender: Sender<String>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(text) = String::from_utf8(buf.to_vec()) {
            let _ = self.sender.send(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Cluster monitor terminal inspector", long_about = None)]
struct Cli {
    /// Address of the feed relay streaming length-prefixed frames.
    #[arg(long, default_value = "127.0.0.1:42000")]
    endpoint: String,
    /// World to attach to on startup.
    #[arg(long, default_value_t = 1)]
    world: u32,
    /// Client identity presented to the feed.
    #[arg(long, default_value = "monitor-inspector")]
    client: String,
    /// Monitor config file; falls back to MONITOR_CONFIG_PATH then the builtin.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let (log_tx, log_rx) = mpsc::channel::<String>();
    let log_writer_tx = log_tx.clone();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_writer(move || ChannelWriter {
            sender: log_writer_tx.clone(),
        })
        .init();

    let cli = Cli::parse();
    let (config, metadata) = match &cli.config {
        Some(path) => load_monitor_config(path),
        None => load_monitor_config_from_env(),
    };
    info!(config = ?metadata.path(), "Connecting to feed relay at {}", cli.endpoint);

    let feed = ChannelFeed::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ui_feed = feed.clone();
    let client = ClientId::new(cli.client.clone());
    let world = WorldId(cli.world);
    let _ui_handle = std::thread::spawn(move || -> color_eyre::Result<()> {
        let app = InspectorApp::new(ui_feed, client, world, &config, shutdown_tx, log_rx)?;
        app.run()
    });

    stream_feed(&cli.endpoint, &feed, shutdown_rx).await;
    Ok(())
}

/// Keep a relay connection feeding `feed`, reconnecting on failure, until
/// `shutdown` flips to true or its sender is dropped.
async fn stream_feed(endpoint: &str, feed: &ChannelFeed, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let outcome = tokio::select! {
            _ = shutdown.changed() => None,
            outcome = connect_and_pump(endpoint, feed) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            break;
        };
        if let Err(err) = outcome {
            warn!("Connection error: {}", err);
            info!("Reconnecting in 2 seconds...");
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }
    }
    info!("Inspector requested shutdown");
}

async fn connect_and_pump(endpoint: &str, feed: &ChannelFeed) -> Result<()> {
    let mut stream = TcpStream::connect(endpoint).await?;
    info!("Connected. Streaming feed frames. Press Ctrl+C or 'q' to exit.");
    pump_frames(&mut stream, feed).await
}

async fn pump_frames(stream: &mut TcpStream, feed: &ChannelFeed) -> Result<()> {
    let mut len_buf = [0u8; 4];
    loop {
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(color_eyre::eyre::eyre!(
                "frame length {len} exceeds limit of {MAX_FRAME_LEN} bytes"
            ));
        }
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        let frame = decode_frame(&payload)?;
        let stream_kind = frame.message.stream();
        let records = frame.message.len();
        let delivered = feed.publish(frame);
        trace!(?stream_kind, records, delivered, "feed.frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_proto::{encode_frame, length_prefixed, FeedFrame, FeedMessage};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn shutdown_interrupts_an_open_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let (held_tx, mut held_rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let frame = FeedFrame::new(WorldId(4), FeedMessage::Frames(Vec::new()));
            let bytes = length_prefixed(&encode_frame(&frame).unwrap()).unwrap();
            socket.write_all(&bytes).await.unwrap();
            held_tx.send(()).await.unwrap();
            // Keep the relay side open until the test ends.
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(socket);
        });

        let feed = ChannelFeed::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let feed = feed.clone();
            tokio::spawn(async move { stream_feed(&endpoint, &feed, shutdown_rx).await })
        };

        held_rx.recv().await.unwrap();
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stream_feed returns after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_stops_reconnect_loop() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let feed = ChannelFeed::new();
        let task = tokio::spawn(async move {
            stream_feed("127.0.0.1:9", &feed, shutdown_rx).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stream_feed returns once the sender is gone")
            .unwrap();
    }
}
