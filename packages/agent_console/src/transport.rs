//! The single connection to the agent service.
//!
//! [`TransportManager`] owns one WebSocket at a time and fans every decoded
//! inbound frame out to its subscribers. It knows nothing about chat or
//! terminals; see [`crate::router`] for the per-consumer filtering.
//!
//! Delivery is serialized: no two callbacks run at the same time, frames
//! arrive in wire order, and a subscriber added while the connection is open
//! gets its synthetic `Open` before any frame. Most events are delivered from
//! the connection's reader task; the `Close` that follows a caller
//! [`close`](TransportManager::close) is delivered on the caller's thread.
//! Callbacks run synchronously and must not block.

use crate::error::TransportError;
use crate::stats::{TransportStats, TransportStatsSnapshot};
use crate::subscribers::{Callback, SubscriberRegistry, Subscription, notify};
use agent_stream::{Envelope, FrameDecoder, OutboundEnvelope};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What subscribers are told.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Frame(Envelope),
    /// The connection failed; always followed by `Close`.
    Error(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    Connecting,
    Open,
    Closed,
}

struct Inner {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    cancel: Option<CancellationToken>,
    /// Bumped on every `connect()` and caller `close()`; a connection task
    /// only touches state and delivers events while its generation is
    /// current.
    generation: u64,
    closed_by_caller: bool,
}

pub struct TransportManager {
    endpoint: String,
    inner: Mutex<Inner>,
    /// Held for the whole of every notification round. Reentrant so a
    /// callback may itself call `close` or `subscribe`.
    delivery: ReentrantMutex<()>,
    subscribers: Arc<SubscriberRegistry>,
    decoder: FrameDecoder,
    stats: TransportStats,
}

impl TransportManager {
    pub fn new(endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                outbound: None,
                cancel: None,
                generation: 0,
                closed_by_caller: false,
            }),
            delivery: ReentrantMutex::new(()),
            subscribers: SubscriberRegistry::new(),
            decoder: FrameDecoder::new(),
            stats: TransportStats::default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Start connecting in the background. No-op while a connection is open
    /// or being established. Must be called from within a tokio runtime.
    pub fn connect(self: &Arc<Self>) {
        let (generation, cancel) = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                debug!(state = ?inner.state, "connect ignored");
                return;
            }
            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.closed_by_caller = false;
            let cancel = CancellationToken::new();
            inner.cancel = Some(cancel.clone());
            (inner.generation, cancel)
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_connection(generation, cancel).await });
    }

    async fn run_connection(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        info!(endpoint = %self.endpoint, "connecting to agent service");

        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                self.finish(generation, None);
                return;
            }
            res = tokio_tungstenite::connect_async(self.endpoint.as_str()) => res,
        };
        let ws_stream = match connected {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                let err = TransportError::from_tungstenite(e);
                warn!(endpoint = %self.endpoint, error = %err, "connection failed");
                self.finish(generation, Some(err.to_string()));
                return;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        if !self.opened(generation, &cancel, tx) {
            self.finish(generation, None);
            return;
        }

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_write.send(msg).await {
                    debug!(error = %e, "writer stopped");
                    return;
                }
                if closing {
                    return;
                }
            }
            let _ = ws_write.close().await;
        });

        let failure = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                msg = ws_read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_payload(generation, self.decoder.decode(text.as_str()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.handle_payload(generation, self.decoder.decode_bytes(&bytes));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "server closed connection");
                        break None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                },
            }
        };

        self.finish(generation, failure);
    }

    /// Publish the writer and announce `Open`. False if this connection was
    /// superseded or closed while the handshake ran.
    fn opened(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        tx: mpsc::UnboundedSender<Message>,
    ) -> bool {
        let _delivery = self.delivery.lock();
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || cancel.is_cancelled() {
                return false;
            }
            inner.state = ConnectionState::Open;
            inner.outbound = Some(tx);
            self.subscribers.snapshot()
        };
        self.stats.connection_opened();
        info!(endpoint = %self.endpoint, "connected");
        notify(&listeners, &TransportEvent::Open);
        true
    }

    fn handle_payload(&self, generation: u64, decoded: Option<Envelope>) {
        self.stats.frame_received();
        let Some(envelope) = decoded else {
            return;
        };
        let _delivery = self.delivery.lock();
        if self.inner.lock().generation != generation {
            debug!("frame from a closed connection ignored");
            return;
        }
        let listeners = self.subscribers.snapshot();
        notify(&listeners, &TransportEvent::Frame(envelope));
    }

    fn finish(&self, generation: u64, failure: Option<String>) {
        let _delivery = self.delivery.lock();
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.state = ConnectionState::Closed;
            inner.outbound = None;
            inner.cancel = None;
            self.subscribers.snapshot()
        };
        if let Some(reason) = failure {
            warn!(endpoint = %self.endpoint, error = %reason, "connection error");
            notify(&listeners, &TransportEvent::Error(reason));
        }
        info!(endpoint = %self.endpoint, "connection closed");
        notify(&listeners, &TransportEvent::Close);
    }

    /// Serialize `payload` to a JSON text frame and queue it.
    ///
    /// Returns `false` without touching the socket when the connection is
    /// not open. Never blocks and never queues for later.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                let err = TransportError::from(e);
                warn!(error = %err, "dropping outbound frame");
                self.stats.send_rejected();
                return false;
            }
        };

        let inner = self.inner.lock();
        let Some(tx) = inner
            .outbound
            .as_ref()
            .filter(|_| inner.state == ConnectionState::Open)
        else {
            debug!(state = ?inner.state, "send while not connected");
            self.stats.send_rejected();
            return false;
        };
        if tx.send(Message::Text(json.into())).is_err() {
            self.stats.send_rejected();
            return false;
        }
        self.stats.frame_sent();
        true
    }

    /// Caller-initiated shutdown.
    ///
    /// Takes effect immediately: the state is `Closed` on return, subscribers
    /// have been told `Close`, and a following `connect()` starts a fresh
    /// connection. A close frame is sent if the socket was open. Reconnect
    /// policies see [`closed_by_caller`](Self::closed_by_caller) and stand
    /// down until the next `connect()`.
    pub fn close(&self) {
        let _delivery = self.delivery.lock();
        let listeners = {
            let mut inner = self.inner.lock();
            inner.closed_by_caller = true;
            if !matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                return;
            }
            if let Some(tx) = inner.outbound.take() {
                let _ = tx.send(Message::Close(None));
            }
            if let Some(cancel) = inner.cancel.take() {
                cancel.cancel();
            }
            // Detach the running task; its own teardown becomes a no-op.
            inner.generation += 1;
            inner.state = ConnectionState::Closed;
            self.subscribers.snapshot()
        };
        info!(endpoint = %self.endpoint, "connection closed by caller");
        notify(&listeners, &TransportEvent::Close);
    }

    /// Register for every event. A subscriber added while the connection is
    /// already open immediately receives one synthetic `Open`.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let _delivery = self.delivery.lock();
        let (subscription, already_open) = {
            let inner = self.inner.lock();
            let subscription = self.subscribers.register(callback.clone());
            (subscription, inner.state == ConnectionState::Open)
        };
        if already_open {
            callback(&TransportEvent::Open);
        }
        subscription
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().state == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn closed_by_caller(&self) -> bool {
        self.inner.lock().closed_by_caller
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot(self.decoder.stats())
    }
}

/// Outbound side of the transport as the consumers see it.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &OutboundEnvelope) -> bool;
    fn is_connected(&self) -> bool;
}

impl FrameSink for TransportManager {
    fn send_frame(&self, frame: &OutboundEnvelope) -> bool {
        self.send(frame)
    }

    fn is_connected(&self) -> bool {
        TransportManager::is_connected(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_stream::{OutboundComposer, ReplyKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_manager_is_idle() {
        let tm = TransportManager::new("ws://127.0.0.1:1/ws");
        assert_eq!(tm.state(), ConnectionState::Idle);
        assert!(!tm.is_connected());
        assert!(!tm.closed_by_caller());
        assert_eq!(tm.endpoint(), "ws://127.0.0.1:1/ws");
    }

    #[test]
    fn test_send_before_connect_is_rejected() {
        let tm = TransportManager::new("ws://127.0.0.1:1/ws");
        let frame = OutboundComposer::new("basic-chat").compose_text("hi", ReplyKind::Message);
        assert!(!tm.send(&frame));
        assert!(!tm.send_frame(&frame));
        let stats = tm.stats();
        assert_eq!(stats.sends_rejected, 2);
        assert_eq!(stats.frames_sent, 0);
    }

    #[test]
    fn test_subscribe_while_idle_gets_no_open() {
        let tm = TransportManager::new("ws://127.0.0.1:1/ws");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = tm.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(tm.subscriber_count(), 1);
        tm.unsubscribe(sub);
        assert_eq!(tm.subscriber_count(), 0);
    }

    #[test]
    fn test_close_while_idle_marks_caller_close() {
        let tm = TransportManager::new("ws://127.0.0.1:1/ws");
        tm.close();
        assert!(tm.closed_by_caller());
        assert_eq!(tm.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_close() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let tm = TransportManager::new(format!("ws://127.0.0.1:{port}/ws"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = tm.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });

        tm.connect();
        assert_eq!(tm.state(), ConnectionState::Connecting);
        // A second connect while connecting is ignored.
        tm.connect();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::Error(_)), "{first:?}");
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Close);
        assert_eq!(tm.state(), ConnectionState::Closed);
        assert!(!tm.closed_by_caller());
    }

    #[tokio::test]
    async fn test_close_while_connecting_is_immediate() {
        // Accepts TCP but never answers the WebSocket handshake.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let tm = TransportManager::new(format!("ws://127.0.0.1:{port}/ws"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = tm.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });

        tm.connect();
        tokio::task::yield_now().await;
        tm.close();
        assert_eq!(tm.state(), ConnectionState::Closed);
        assert!(tm.closed_by_caller());
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Close);

        // The abandoned connection task reports nothing further.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        tm.connect();
        assert_eq!(tm.state(), ConnectionState::Connecting);
        assert!(!tm.closed_by_caller());
        tm.close();
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Close);
    }

    #[test]
    fn test_close_from_inside_a_callback() {
        let tm = TransportManager::new("ws://127.0.0.1:1/ws");
        let weak = Arc::downgrade(&tm);
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        let _sub = tm.subscribe(move |event| {
            if *event == TransportEvent::Close {
                c.fetch_add(1, Ordering::SeqCst);
            }
            if let Some(tm) = weak.upgrade() {
                // Idle, so this only records the intent; it must not deadlock.
                tm.close();
            }
        });
        {
            let _delivery = tm.delivery.lock();
            notify(&tm.subscribers.snapshot(), &TransportEvent::Open);
        }
        assert!(tm.closed_by_caller());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
