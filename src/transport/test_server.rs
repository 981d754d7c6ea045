//! Scripted WebSocket server for transport tests.
//!
//! Binds `127.0.0.1:0`, upgrades accepted sockets with
//! `tokio_tungstenite::accept_async`, and exposes JSON helpers so tests can
//! play the server side of the protocol frame by frame.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// How long a test waits for any single server-side step.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A bound listener that accepts client WebSocket connections.
pub(crate) struct TestServer {
    listener: TcpListener,
    port: u16,
}

impl TestServer {
    /// Binds to a random local port.
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        Self { listener, port }
    }

    /// WebSocket URL clients should dial.
    pub(crate) fn ws_url(&self) -> Url {
        Url::parse(&format!("ws://127.0.0.1:{}/ws", self.port)).expect("valid url")
    }

    /// Accepts the next client and completes the WebSocket upgrade.
    pub(crate) async fn accept(&self) -> TestPeer {
        let (stream, _addr) = timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client connected in time")
            .expect("accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket upgrade");
        TestPeer { ws }
    }

    /// Drops every connection without upgrading it, except the
    /// `upgrade_on`-th (zero-based), which upgrades and closes at once.
    ///
    /// Yields the instant of each accepted connection.
    pub(crate) fn spawn_flaky(self, upgrade_on: usize) -> mpsc::UnboundedReceiver<Instant> {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for attempt in 0.. {
                let Ok((stream, _addr)) = self.listener.accept().await else {
                    break;
                };
                if accepted_tx.send(Instant::now()).is_err() {
                    break;
                }
                if attempt == upgrade_on
                    && let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await
                {
                    let _ = ws.close(None).await;
                }
            }
        });
        accepted_rx
    }
}

/// Collects `count` accept instants and returns the gaps between them in
/// milliseconds.
pub(crate) async fn accept_gaps(
    accepted: &mut mpsc::UnboundedReceiver<Instant>,
    count: usize,
) -> Vec<u128> {
    let mut instants = Vec::with_capacity(count);
    while instants.len() < count {
        let at = timeout(STEP_TIMEOUT, accepted.recv())
            .await
            .expect("client dialed in time")
            .expect("listener running");
        instants.push(at);
    }
    instants
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]).as_millis())
        .collect()
}

/// Server side of one accepted connection.
pub(crate) struct TestPeer {
    ws: WebSocketStream<TcpStream>,
}

impl TestPeer {
    /// Receives the next text frame as JSON.
    pub(crate) async fn recv_json(&mut self) -> Value {
        loop {
            let message = timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("frame arrived in time")
                .expect("stream open")
                .expect("valid frame");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).expect("json frame");
            }
        }
    }

    /// Receives text frames until one satisfies `predicate`.
    pub(crate) async fn recv_until(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        loop {
            let frame = self.recv_json().await;
            if predicate(&frame) {
                return frame;
            }
        }
    }

    /// Sends a JSON text frame.
    pub(crate) async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send frame");
    }

    /// Sends a raw text frame.
    pub(crate) async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send frame");
    }

    /// Closes the connection from the server side.
    pub(crate) async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
