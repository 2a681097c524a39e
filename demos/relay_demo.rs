//! Relay demo with a local FLV sidecar
//!
//! Run with: cargo run --example relay_demo [SECONDS]
//!
//! Starts a TCP listener that plays the role of an FLV ingest sidecar,
//! registers it plus an unreachable destination, then publishes a synthetic
//! 25 fps stream for a few seconds (default 5). Relay events are printed as
//! JSON lines; the unreachable destination shows the reconnect backoff.
//!
//! Set `RUST_LOG=iorelay=trace` to see every dispatched frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use iorelay::{
    FlvTcpConnector, MediaFrame, NewDestination, Protocol, PublishMetadata, RelayConfig,
    ReconnectPolicy, SessionManager,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// Accept FLV connections and count the bytes received
async fn run_sidecar(listener: TcpListener, received: Arc<AtomicU64>) {
    loop {
        let Ok((mut socket, peer)) = listener.accept().await else {
            return;
        };
        tracing::info!(%peer, "Sidecar accepted connection");

        let received = Arc::clone(&received);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        received.fetch_add(n as u64, Ordering::Relaxed);
                    }
                }
            }
            tracing::info!(%peer, "Sidecar connection closed");
        });
    }
}

fn synthetic_frame(index: u32) -> MediaFrame {
    let timestamp = index * 40;
    if index % 50 == 0 {
        // Keyframe every 2 seconds
        MediaFrame::video(timestamp, Bytes::from(vec![0x17, 0x01, 0, 0, 0, 0x65, 0x88]), true, false)
    } else {
        MediaFrame::video(timestamp, Bytes::from(vec![0x27, 0x01, 0, 0, 0, 0x41, 0x9A]), false, false)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let seconds: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 5,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("iorelay=debug".parse()?)
                .add_directive("relay_demo=debug".parse()?),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let sidecar_addr = listener.local_addr()?;
    let received = Arc::new(AtomicU64::new(0));
    tokio::spawn(run_sidecar(listener, Arc::clone(&received)));

    let config = RelayConfig::default()
        .reconnect(ReconnectPolicy::default().max_delay(Duration::from_secs(4)));
    let manager = Arc::new(SessionManager::new(config, Arc::new(FlvTcpConnector::new())));
    let cleanup = manager.spawn_cleanup_task();

    // Print every event as a JSON line
    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.to_json() {
                Ok(json) => println!("event: {json}"),
                Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
            }
        }
    });

    let registry = manager.destinations();
    registry
        .add(NewDestination::new(
            "sidecar",
            Protocol::Rtmp,
            format!("rtmp://{sidecar_addr}/live"),
        ))
        .await?;
    // Nothing listens on port 1; this link keeps retrying
    registry
        .add(NewDestination::new("offline", Protocol::Rtmp, "rtmp://127.0.0.1:1/live"))
        .await?;

    let session = manager
        .on_publish("demo", PublishMetadata::new().app("live").encoder("relay_demo"))
        .await?;

    session.push_frame(MediaFrame::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0, 0x01]), true, true))?;
    let mut ticker = tokio::time::interval(Duration::from_millis(40));
    for index in 0..seconds * 25 {
        ticker.tick().await;
        session.push_frame(synthetic_frame(index))?;
    }

    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    println!("{}", serde_json::to_string_pretty(&manager.stats().await)?);

    manager.on_unpublish(session.stream_key()).await;
    session.closed().await;
    println!(
        "sidecar received {} bytes",
        received.load(Ordering::Relaxed)
    );

    cleanup.abort();
    manager.shutdown().await;
    printer.abort();
    Ok(())
}
