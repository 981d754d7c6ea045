//! WebSocket plumbing shared by the socket and hybrid transports.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Client-side WebSocket stream (plain or TLS).
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Connect
// ============================================================================

/// Opens a WebSocket connection, bounded by `connect_timeout`.
pub(crate) async fn connect(url: &Url, connect_timeout: Duration) -> Result<WsStream> {
    debug!(url = %url, "Opening WebSocket");

    match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(Error::connection(format!("WebSocket connect failed: {e}"))),
        Err(_) => Err(Error::connection_timeout(
            connect_timeout.as_millis() as u64,
        )),
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Serializes a frame into a text message.
pub(crate) fn text_frame<T: Serialize>(frame: &T) -> Result<Message> {
    let json = serde_json::to_string(frame)?;
    Ok(Message::Text(json.into()))
}

// ============================================================================
// Timers & Signals
// ============================================================================

/// Keepalive ticker whose first tick is one full period after open.
pub(crate) fn keepalive(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves once the shutdown flag is raised or its sender is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|disposed| *disposed).await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::ControlFrame;

    #[test]
    fn test_text_frame() {
        let message = text_frame(&ControlFrame::ping()).expect("serialize");
        assert_eq!(message.to_text().expect("text frame"), r#"{"ping":true}"#);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is essentially never served locally.
        let url = Url::parse("ws://127.0.0.1:9/ws").expect("url");
        let err = connect(&url, Duration::from_secs(2)).await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_shutdown_requested() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        shutdown_requested(&mut rx).await;
    }
}
