//! SSE Stream Example
//!
//! Connects to an SSE endpoint and prints what arrives until the connection
//! closes or 20 events have been received.
//!
//! Run with: `cargo run -p sse-transport --example sse_stream -- <url>`
//!
//! Set `RUST_LOG=sse_transport=debug` to see the connection's own logging.

use std::time::Duration;

use futures_util::StreamExt;
use sse_transport::sse::{SseClient, SseConfig, SseNotification};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/events".to_string());

    let config = SseConfig::new(url)
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(Some(Duration::from_secs(60)))
        .reconnect_max_attempts(Some(5));

    let client = SseClient::new()?;
    let (handle, mut stream) = client.connect(config)?.split();

    let mut received = 0;
    while let Some(notification) = stream.next().await {
        match notification {
            SseNotification::Open => println!("-- open"),
            SseNotification::Message(event) => {
                received += 1;
                println!(
                    "[{}] id={:?} event={} data={}",
                    event.offset,
                    event.id_str(),
                    &*event.event,
                    &*event.data
                );
                if received >= 20 {
                    handle.close();
                }
            }
            SseNotification::Comment(comment) => println!(": {comment}"),
            SseNotification::RetryTime(delay) => println!("-- retry hint {delay:?}"),
            SseNotification::TransportError { message, response } => {
                println!("-- error: {message}");
                if let Some(response) = response {
                    println!("   status {} body {:?}", response.status, response.body);
                }
            }
            SseNotification::Closed => println!("-- closed ({:?})", handle.state()),
        }
    }

    Ok(())
}
