// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection session: socket pumps, heartbeat, and inbound rate limiting.
//!
//! Every connection is bi-directional regardless of role, since pings must go
//! out and pongs must come back. The write pump drains the outbound queue and
//! the ping ticker; the read pump enforces the pong deadline, throttles
//! inbound frames, and forwards them into the dispatcher. The read pump's
//! exit path is the single place that emits Unregister.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{ConnectionRole, DispatcherHandle, Message};

/// Maximum inbound frame size.
pub const MAX_MESSAGE_SIZE: usize = 25 * 1024;

/// Time allowed to complete a single socket write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed between pongs before the peer is considered dead.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Heartbeat period (must be less than `PONG_TIMEOUT`).
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Token-bucket capacity for inbound frames.
pub const MESSAGE_RATE: f64 = 20.0;

/// Refill window: `MESSAGE_RATE` tokens per `MESSAGE_PERIOD` seconds.
pub const MESSAGE_PERIOD: f64 = 5.0;

/// Synthetic payload forwarded once per throttled burst.
pub const THROTTLE_WARNING: &[u8] = b"[WARNING] Logging too frequent";

const OUTBOUND_QUEUE_DEPTH: usize = 32;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Dispatcher-facing identity of one live socket.
///
/// The dispatcher holds a reference for enqueueing outbound payloads; the
/// pumps hold the socket halves. `cancel` tears both sides down and is safe
/// to fire from either.
pub struct SessionHandle {
    pub id: u64,
    pub role: ConnectionRole,
    pub app_id: String,
    pub user_id: String,
    pub remote_addr: SocketAddr,
    pub cancel: CancellationToken,
    outbound: mpsc::Sender<Bytes>,
}

impl SessionHandle {
    pub fn new(
        role: ConnectionRole,
        app_id: String,
        user_id: String,
        remote_addr: SocketAddr,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        Self::with_queue_depth(role, app_id, user_id, remote_addr, OUTBOUND_QUEUE_DEPTH)
    }

    pub(crate) fn with_queue_depth(
        role: ConnectionRole,
        app_id: String,
        user_id: String,
        remote_addr: SocketAddr,
        depth: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(depth);
        let handle = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            role,
            app_id,
            user_id,
            remote_addr,
            cancel: CancellationToken::new(),
            outbound,
        });
        (handle, rx)
    }

    /// Non-blocking enqueue of an outbound payload.
    ///
    /// A full queue drops this subscriber's copy; a closed queue means the
    /// write pump is gone, so the session is cancelled.
    pub fn enqueue(&self, payload: Bytes) {
        match self.outbound.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(session = self.id, app_id = %self.app_id, "outbound queue full, dropping payload");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.cancel.cancel(),
        }
    }
}

/// Drive a registered session until it terminates.
///
/// The write pump runs on its own task; the read pump runs here, and its
/// return emits the session's single Unregister.
pub async fn run(
    socket: WebSocket,
    session: Arc<SessionHandle>,
    outbound: mpsc::Receiver<Bytes>,
    dispatcher: DispatcherHandle,
) {
    let (ws_tx, ws_rx) = socket.split();
    tokio::spawn(write_pump(ws_tx, outbound, session.cancel.clone()));
    read_pump(ws_rx, &session, &dispatcher).await;
    dispatcher.unregister(session).await;
}

/// Pump payloads from the outbound queue to the socket, interleaved with
/// heartbeat pings. Exits on cancel, queue close, or any write failure, and
/// always cancels the session so the read side unblocks promptly.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = send_with_deadline(&mut ws_tx, WsMessage::Close(None)).await;
                break;
            }
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if send_with_deadline(&mut ws_tx, delivery_frame(payload)).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = send_with_deadline(&mut ws_tx, WsMessage::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if send_with_deadline(&mut ws_tx, WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    cancel.cancel();
}

/// Deliver a payload as a text frame, falling back to binary if the bytes are
/// not valid UTF-8.
fn delivery_frame(payload: Bytes) -> WsMessage {
    match Utf8Bytes::try_from(payload.clone()) {
        Ok(text) => WsMessage::Text(text),
        Err(_) => WsMessage::Binary(payload),
    }
}

async fn send_with_deadline(
    ws_tx: &mut SplitSink<WebSocket, WsMessage>,
    frame: WsMessage,
) -> anyhow::Result<()> {
    tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(frame))
        .await
        .map_err(|_| anyhow::anyhow!("write deadline exceeded"))??;
    Ok(())
}

/// Pump frames from the socket into the dispatcher.
///
/// The read deadline is refreshed only by pong receipt; exceeding it, a read
/// error, a peer close, or a cancel all terminate the session.
async fn read_pump(
    mut ws_rx: SplitStream<WebSocket>,
    session: &Arc<SessionHandle>,
    dispatcher: &DispatcherHandle,
) {
    let mut throttle = Throttle::new(MESSAGE_RATE, MESSAGE_PERIOD);
    let mut deadline = Instant::now() + PONG_TIMEOUT;

    loop {
        let frame = tokio::select! {
            _ = session.cancel.cancelled() => break,
            frame = tokio::time::timeout_at(deadline, ws_rx.next()) => frame,
        };

        match frame {
            Err(_) => {
                tracing::debug!(session = session.id, remote_addr = %session.remote_addr, "pong deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(session = session.id, remote_addr = %session.remote_addr, err = %e, "read error");
                break;
            }
            Ok(Some(Ok(msg))) => match msg {
                WsMessage::Pong(_) => deadline = Instant::now() + PONG_TIMEOUT,
                WsMessage::Close(_) => {
                    tracing::debug!(session = session.id, remote_addr = %session.remote_addr, "connection closed by peer");
                    break;
                }
                WsMessage::Text(text) => {
                    forward_inbound(session, dispatcher, &mut throttle, Bytes::from(text)).await;
                }
                WsMessage::Binary(data) => {
                    forward_inbound(session, dispatcher, &mut throttle, data).await;
                }
                WsMessage::Ping(_) => {} // answered automatically
            },
        }
    }
}

/// Throttle one inbound frame and route it by role. Readers are sinks; their
/// frames go nowhere. Empty payloads are ignored entirely.
async fn forward_inbound(
    session: &SessionHandle,
    dispatcher: &DispatcherHandle,
    throttle: &mut Throttle,
    payload: Bytes,
) {
    if payload.is_empty() {
        return;
    }

    let payload = match throttle.admit(Instant::now()) {
        Admit::Forward => payload,
        Admit::Warn => Bytes::from_static(THROTTLE_WARNING),
        Admit::Drop => return,
    };

    let msg = Message {
        app_id: session.app_id.clone(),
        user_id: session.user_id.clone(),
        payload,
    };
    match session.role {
        ConnectionRole::Notifications => dispatcher.publish_notification(msg).await,
        ConnectionRole::LogWriter => dispatcher.publish_log(msg).await,
        ConnectionRole::LogReader => {}
    }
}

/// Outcome of submitting one frame to the token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admit {
    Forward,
    /// First rejection of a burst: forward the synthetic warning instead.
    Warn,
    Drop,
}

/// Token bucket: `rate` tokens refilled over `period` seconds, one consumed
/// per admitted frame.
struct Throttle {
    rate: f64,
    refill_per_sec: f64,
    allowance: f64,
    last_check: Instant,
    warned: bool,
}

impl Throttle {
    fn new(rate: f64, period_secs: f64) -> Self {
        Self {
            rate,
            refill_per_sec: rate / period_secs,
            allowance: rate,
            last_check: Instant::now(),
            warned: false,
        }
    }

    fn admit(&mut self, now: Instant) -> Admit {
        let elapsed = now.saturating_duration_since(self.last_check).as_secs_f64();
        self.last_check = now;
        self.allowance = (self.allowance + elapsed * self.refill_per_sec).min(self.rate);

        if self.allowance < 1.0 {
            if self.warned {
                Admit::Drop
            } else {
                self.warned = true;
                Admit::Warn
            }
        } else {
            self.warned = false;
            self.allowance -= 1.0;
            Admit::Forward
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
