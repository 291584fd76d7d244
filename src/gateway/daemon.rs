//! WebSocket transport to the privileged backend.
//!
//! Requests are JSON text frames `{seq, request}`; the backend answers with
//! `{seq, response}`. A background task owns the socket, reconnects with
//! backoff, and routes responses to the waiting caller by `seq`.
//!
//! A queued request is only written while its caller still waits for it.
//! Requests that timed out or were failed by a disconnect are dropped
//! unsent, so the backend never applies a change the caller reported as
//! failed.

use super::GatewayTransport;
use async_trait::async_trait;
use envswitch_protocol::{
    decode_response_frame, encode_frame, ErrorCode, GatewayRequest, GatewayResponse,
    RequestFrame,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<GatewayResponse<Value>>>>>;

/// An encoded request waiting for the socket writer
struct QueuedFrame {
    seq: u64,
    text: String,
}

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 5000;

/// Gateway transport talking to the backend over a WebSocket
pub struct DaemonGateway {
    /// Outgoing text frames, drained by the socket writer
    outgoing: mpsc::UnboundedSender<QueuedFrame>,
    /// Sequence counter for request-response correlation (skips 0)
    seq: AtomicU64,
    /// Callers waiting for a response, keyed by sequence number
    pending: PendingMap,
    /// Whether the WS connection is alive
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl DaemonGateway {
    /// Start connecting to the backend at `addr` (`host:port`).
    ///
    /// Must be called from within a tokio runtime. Requests issued before
    /// the connection is up are queued and sent once it is.
    pub fn connect(addr: &str, request_timeout: Duration) -> Self {
        let url = format!("ws://{}/ws", addr);

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<QueuedFrame>();
        let connected = Arc::new(AtomicBool::new(false));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(run_ws_loop(
            url,
            outgoing_rx,
            Arc::clone(&connected),
            Arc::clone(&pending),
        ));

        Self {
            outgoing,
            seq: AtomicU64::new(1),
            pending,
            connected,
            request_timeout,
        }
    }

    /// Whether the backend connection is alive.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Allocate the next non-zero sequence number.
    fn next_seq(&self) -> u64 {
        loop {
            let s = self.seq.fetch_add(1, Ordering::Relaxed);
            if s != 0 {
                return s;
            }
        }
    }
}

#[async_trait]
impl GatewayTransport for DaemonGateway {
    async fn call(&self, request: GatewayRequest) -> GatewayResponse<Value> {
        let seq = self.next_seq();
        let method = request.method();

        let text = match encode_frame(&RequestFrame { seq, request }) {
            Ok(text) => text,
            Err(e) => {
                return GatewayResponse::fail_with(
                    ErrorCode::Internal,
                    format!("Failed to encode {} request: {}", method, e),
                )
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        if self.outgoing.send(QueuedFrame { seq, text }).is_err() {
            self.pending.lock().await.remove(&seq);
            return GatewayResponse::fail_with(ErrorCode::Internal, "Backend connection closed");
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                GatewayResponse::fail_with(ErrorCode::Internal, "Backend connection lost")
            }
            Err(_) => {
                self.pending.lock().await.remove(&seq);
                warn!("{} (seq={}) timed out", method, seq);
                GatewayResponse::fail_with(
                    ErrorCode::Internal,
                    format!(
                        "Backend did not answer {} within {}ms",
                        method,
                        self.request_timeout.as_millis()
                    ),
                )
            }
        }
    }
}

// ── Background WebSocket loop ────────────────────────────────────────

async fn run_ws_loop(
    url: String,
    mut outgoing_rx: mpsc::UnboundedReceiver<QueuedFrame>,
    connected: Arc<AtomicBool>,
    pending: PendingMap,
) {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        info!("Connecting to backend at {}...", url);

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                info!("Connected to backend");
                connected.store(true, Ordering::Relaxed);
                backoff_ms = INITIAL_BACKOFF_MS;

                let (mut ws_sink, mut ws_stream_rx) = ws_stream.split();

                // Forward outgoing frames to the WebSocket
                let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
                let writer_pending = Arc::clone(&pending);
                let writer = tokio::spawn(async move {
                    use tokio_tungstenite::tungstenite::Message;
                    loop {
                        tokio::select! {
                            _ = &mut stop_rx => break,
                            frame = outgoing_rx.recv() => match frame {
                                Some(frame) => {
                                    if !is_awaited(&writer_pending, frame.seq).await {
                                        debug!("Dropping abandoned request seq={}", frame.seq);
                                        continue;
                                    }
                                    if ws_sink.send(Message::Text(frame.text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                    // Hand the receiver back so it survives a reconnect
                    outgoing_rx
                });

                loop {
                    use tokio_tungstenite::tungstenite::Message;
                    match ws_stream_rx.next().await {
                        Some(Ok(Message::Text(text))) => {
                            handle_backend_frame(text.as_str(), &pending).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Backend closed WS connection");
                            break;
                        }
                        Some(Ok(_)) => {} // Ignore binary/ping/pong
                        Some(Err(e)) => {
                            warn!("WS read error: {}", e);
                            break;
                        }
                        None => {
                            info!("WS stream ended");
                            break;
                        }
                    }
                }

                connected.store(false, Ordering::Relaxed);
                fail_pending(&pending).await;

                let _ = stop_tx.send(());
                match writer.await {
                    Ok(rx) => outgoing_rx = rx,
                    Err(e) => {
                        error!("WS writer task failed ({}), stopping reconnect", e);
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("Failed to connect to backend: {} (retry in {}ms)", e, backoff_ms);
            }
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 3 / 2).min(MAX_BACKOFF_MS);
    }
}

/// Route a single response frame to its waiting caller.
async fn handle_backend_frame(text: &str, pending: &PendingMap) {
    let frame = match decode_response_frame(text) {
        Some(frame) => frame,
        None => {
            debug!("Ignoring malformed backend frame");
            return;
        }
    };

    let mut map = pending.lock().await;
    if let Some(sender) = map.remove(&frame.seq) {
        let _ = sender.send(frame.response);
    } else {
        debug!("No pending request for seq={}", frame.seq);
    }
}

/// Whether a caller still waits for the response to `seq`.
async fn is_awaited(pending: &PendingMap, seq: u64) -> bool {
    pending.lock().await.contains_key(&seq)
}

/// Answer every in-flight request with a failure after a disconnect.
async fn fail_pending(pending: &PendingMap) {
    let mut map = pending.lock().await;
    for (_, sender) in map.drain() {
        let _ = sender.send(GatewayResponse::fail_with(
            ErrorCode::Internal,
            "Backend connection lost",
        ));
    }
}
