//! Message bridge between the Godot WebSocket server and external callers
//!
//! The bridge owns one upstream connection and relays in both directions:
//! caller requests go up as `{"actions": [...]}`, game messages come down
//! and either resolve the armed pending-request slot or fan out to every
//! subscriber as an unsolicited event.
//!
//! Request correlation is single-slot: at most one pending request per
//! bridge at any instant. Issuing a new request while a prior one is
//! unresolved may misattribute the next reply - callers are expected to
//! wait for each answer before sending the next request.

use crate::session_log::SessionLog;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gateway_core::{CrashDetail, GatewayError, Result, crash_event, error_event, event_name};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Bridge tuning knobs
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Upper bound on the round trip inside `handle_request`
    pub request_timeout: Duration,
    /// Upper bound on the upstream connection handshake
    pub connect_timeout: Duration,
    /// On request timeout, return the last observed state instead of a
    /// timeout error when a snapshot exists. Wave transitions can delay
    /// replies past any fixed timeout, so this is configurable rather
    /// than hardcoded.
    pub stale_fallback: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stale_fallback: true,
        }
    }
}

struct BridgeInner {
    config: BridgeConfig,
    /// Writer half of the upstream connection; replaced on reconnect
    writer: tokio::sync::Mutex<Option<WsSink>>,
    connected: AtomicBool,
    /// Single-slot request correlation: the next inbound message resolves
    /// whatever sender is armed here
    pending: Mutex<Option<oneshot::Sender<Value>>>,
    /// Most recent fully-parsed inbound message, used as the stale fallback
    last_state: Mutex<Option<Value>>,
    /// Fan-out to subscriber callers
    event_tx: broadcast::Sender<Value>,
    /// Insertion-ordered queue for polling callers, drained atomically
    observations: Mutex<Vec<Value>>,
    crash: Mutex<Option<CrashDetail>>,
    session_log: Arc<SessionLog>,
    shutdown_tx: watch::Sender<bool>,
}

/// Bridge between the Godot AI WebSocket server and downstream callers
///
/// Cloneable; all clones share one upstream connection and one set of
/// correlation/subscriber state.
#[derive(Clone)]
pub struct GodotBridge {
    inner: Arc<BridgeInner>,
}

impl GodotBridge {
    pub fn new(config: BridgeConfig, session_log: SessionLog) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(BridgeInner {
                config,
                writer: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                pending: Mutex::new(None),
                last_state: Mutex::new(None),
                event_tx,
                observations: Mutex::new(Vec::new()),
                crash: Mutex::new(None),
                session_log: Arc::new(session_log),
                shutdown_tx,
            }),
        }
    }

    /// Open the upstream connection and start the inbound receive loop.
    ///
    /// Refusal and handshake timeout are reported synchronously. The bridge
    /// never reconnects on its own; on connection loss the whole gateway
    /// shuts down.
    pub async fn connect(&self, url: &str) -> Result<()> {
        info!("Connecting to Godot at {}", url);

        let (stream, _response) = timeout(self.inner.config.connect_timeout, connect_async(url))
            .await
            .map_err(|_| GatewayError::Transport(format!("connection timeout to {url}")))?
            .map_err(|e| GatewayError::Transport(format!("failed to connect to {url}: {e}")))?;

        let (sink, source) = stream.split();
        {
            let mut guard = self.inner.writer.lock().await;
            *guard = Some(sink);
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("Upstream WebSocket connected");

        tokio::spawn(receive_loop(self.inner.clone(), source));
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn has_crashed(&self) -> bool {
        self.inner.crash.lock().expect("crash lock poisoned").is_some()
    }

    pub fn crash_detail(&self) -> Option<CrashDetail> {
        self.inner.crash.lock().expect("crash lock poisoned").clone()
    }

    /// Register a subscriber caller. Every relayed event is delivered in
    /// upstream order; the adapter task drops the caller when its socket
    /// send fails.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.inner.event_tx.subscribe()
    }

    /// Drain the observation queue for polling callers, oldest first
    pub fn drain_observations(&self) -> Vec<Value> {
        let mut queue = self
            .inner
            .observations
            .lock()
            .expect("observations lock poisoned");
        std::mem::take(&mut *queue)
    }

    /// Watch channel that flips to `true` when the gateway must exit
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Synchronous request/response entry point with the configured
    /// default timeout.
    pub async fn handle_request(&self, actions: Vec<Value>) -> Value {
        self.handle_request_with_timeout(actions, self.inner.config.request_timeout)
            .await
    }

    /// Synchronous request/response entry point.
    ///
    /// The timeout covers the in-flight round trip only. Always returns a
    /// structured result body; per-request failures come back as
    /// `Error`/`SystemCrash` events, never as transport errors.
    pub async fn handle_request_with_timeout(
        &self,
        actions: Vec<Value>,
        request_timeout: Duration,
    ) -> Value {
        // A crashed game answers every later request with the same record,
        // without touching the transport
        if let Some(detail) = self.crash_detail() {
            return crash_event(&detail);
        }
        if !self.is_connected() {
            return error_event("WebSocket not connected");
        }

        // Arm the slot before sending so a reply cannot arrive first
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut slot = self.inner.pending.lock().expect("pending lock poisoned");
            if slot.is_some() {
                warn!("request issued while a prior one is unresolved; superseding it");
            }
            *slot = Some(reply_tx);
        }

        let count = actions.len();
        let payload = json!({ "actions": actions }).to_string();
        if let Err(e) = self.send_upstream(&payload).await {
            self.disarm();
            return error_event(format!("failed to send actions: {e}"));
        }
        debug!("Sent {} action(s) upstream", count);

        match timeout(request_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            // Slot was superseded by a newer request
            Ok(Err(_)) => error_event("request superseded before a reply arrived"),
            Err(_) => {
                self.disarm();
                if self.inner.config.stale_fallback {
                    let stale = self
                        .inner
                        .last_state
                        .lock()
                        .expect("last_state lock poisoned")
                        .clone();
                    if let Some(state) = stale {
                        warn!(
                            "Request timed out, returning last observed state: {}",
                            event_name(&state).unwrap_or("unknown")
                        );
                        return state;
                    }
                }
                error_event("Timeout waiting for game state")
            }
        }
    }

    /// Fire-and-forget pass-through used by subscriber callers. Failures
    /// are logged, not surfaced to the sender.
    pub async fn handle_forward(&self, payload: &str) {
        if let Err(e) = self.send_upstream(payload).await {
            warn!("Forward to Godot failed: {}", e);
        }
    }

    /// Consume the supervisor's crash channel and propagate the crash:
    /// resolve an armed request, notify subscribers and polling callers,
    /// then signal shutdown.
    pub fn watch_crashes(&self, mut crash_rx: mpsc::Receiver<CrashDetail>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let Some(detail) = crash_rx.recv().await else {
                return;
            };
            error!("Godot crashed: {}", detail.classification);

            let event = crash_event(&detail);
            *inner.crash.lock().expect("crash lock poisoned") = Some(detail);

            let armed = inner.pending.lock().expect("pending lock poisoned").take();
            if let Some(reply_tx) = armed {
                let _ = reply_tx.send(event.clone());
            }

            inner
                .observations
                .lock()
                .expect("observations lock poisoned")
                .push(event.clone());
            let _ = inner.event_tx.send(event);
            // send_replace stores the value even with zero receivers, so a
            // crash before anyone subscribed is still observed later
            inner.shutdown_tx.send_replace(true);
        });
    }

    fn disarm(&self) {
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .take();
    }

    async fn send_upstream(&self, payload: &str) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let sink = guard.as_mut().ok_or(GatewayError::NotConnected)?;
        sink.send(Message::text(payload.to_owned()))
            .await
            .map_err(|e| GatewayError::Transport(format!("WebSocket send failed: {e}")))
    }
}

/// Inbound receive loop, one per upstream connection
async fn receive_loop(inner: Arc<BridgeInner>, mut source: WsSource) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_inbound(&inner, text.as_str()).await,
            Ok(Message::Close(_)) => {
                info!("Upstream WebSocket closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Upstream WebSocket receive error: {}", e);
                break;
            }
        }
    }
    inner.connected.store(false, Ordering::SeqCst);
    info!("Upstream receive loop exited");
}

async fn handle_inbound(inner: &Arc<BridgeInner>, raw: &str) {
    // The session log records every inbound message regardless of what
    // happens to it downstream; the write runs beside relaying so a slow
    // disk never delays a relayed message
    let log = inner.session_log.clone();
    let line = raw.to_owned();
    tokio::spawn(async move {
        log.append(&line).await;
    });

    let msg: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring malformed upstream message: {}", e);
            return;
        }
    };

    *inner
        .last_state
        .lock()
        .expect("last_state lock poisoned") = Some(msg.clone());

    // A reply for an armed request wins over fan-out, first come first
    // served, one resolution per inbound message
    let armed = inner.pending.lock().expect("pending lock poisoned").take();
    if let Some(reply_tx) = armed {
        if reply_tx.send(msg).is_err() {
            debug!("Pending requester went away before the reply landed");
        }
        return;
    }

    // Unsolicited event: queue for polling callers and fan out
    let event = event_name(&msg).unwrap_or("unknown");
    if event != "AI_Wakeup" {
        debug!("Unsolicited event: {}", event);
    }
    inner
        .observations
        .lock()
        .expect("observations lock poisoned")
        .push(msg.clone());
    let _ = inner.event_tx.send(msg);
}
