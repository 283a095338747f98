//! Transport: the correlated request channel
//!
//! Owns the single WebSocket connection to the channel relay, the pending
//! request table and channel membership. One `Transport` is built per
//! process and shared by cloning the handle.
//!
//! # Lifecycle
//!
//! ```text
//! connect() --> Connecting --open--> Open --close frame / error--> Closed --backoff--> Connecting ...
//!                   |                  |
//!                   +--connect timeout-+--> Closed (treated exactly like a close)
//! close()   --> Closing --> Closed (terminal, no reconnect)
//! ```
//!
//! Every close rejects all pending requests before a reconnect is scheduled.

use super::backoff::next_reconnect_delay;
use super::envelope::{OutboundEnvelope, ProgressData, JOIN_COMMAND};
use super::error::{Result, TransportError};
use super::matcher::{classify, Classification};
use super::pending::{PendingRequest, PendingTable};
use super::timeout::{ProgressiveTimeout, TimeoutStep};
use crate::config::TransportConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Close code reported when the socket vanished without a close frame
const ABNORMAL_CLOSE: u16 = 1006;

/// Close code used for client-initiated shutdown
const NORMAL_CLOSE: u16 = 1000;

/// Socket lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Parameters remembered for reconnects and lazy connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub base_backoff: Duration,
}

impl ConnectParams {
    pub fn new(host: impl Into<String>, port: u16, base_backoff: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            base_backoff,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// State shared between callers, the socket task and reply handling
struct Shared {
    connection: ConnectionState,
    writer: Option<mpsc::UnboundedSender<Message>>,
    channel: Option<String>,
    params: Option<ConnectParams>,
    pending: PendingTable,
    last_sweep: Instant,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

struct Inner {
    config: TransportConfig,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Handle to the correlated request channel
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("channel", &self.current_channel())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Transport {
    /// Create a disconnected transport
    pub fn new(config: TransportConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let shared = Shared {
            connection: ConnectionState::Closed,
            writer: None,
            channel: None,
            params: None,
            pending: PendingTable::new(config.settled_history),
            last_sweep: Instant::now(),
            task: None,
            generation: 0,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                shared: Mutex::new(shared),
                state_tx,
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Current socket lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    /// True when the socket is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Channel joined on the current socket, if any
    pub fn current_channel(&self) -> Option<String> {
        self.inner.lock().channel.clone()
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Subscribe to lifecycle state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Connect to the relay at `ws://host:port`
    ///
    /// No-op when already open; joins the running attempt when connecting.
    /// Resolves once the socket is open, or fails with `ConnectTimeout` if it
    /// does not open within the connect timeout (retries continue in the
    /// background).
    pub async fn connect(&self, host: &str, port: u16, base_backoff: Duration) -> Result<()> {
        self.connect_with(ConnectParams::new(host, port, base_backoff))
            .await
    }

    /// Connect with previously built parameters
    #[instrument(skip(self), fields(url = %params.url()))]
    pub async fn connect_with(&self, params: ConnectParams) -> Result<()> {
        let url = params.url();
        {
            let mut shared = self.inner.lock();
            match shared.connection {
                ConnectionState::Open => {
                    debug!("Already connected, ignoring connect request");
                    return Ok(());
                }
                ConnectionState::Connecting => {
                    debug!("Connection attempt already in progress, waiting for it");
                }
                ConnectionState::Closing | ConnectionState::Closed => {
                    if let Some(previous) = shared.task.take() {
                        previous.abort();
                    }
                    shared.writer = None;
                    shared.generation += 1;
                    shared.params = Some(params.clone());
                    self.inner
                        .set_state(&mut shared, ConnectionState::Connecting);

                    let generation = shared.generation;
                    let inner = Arc::clone(&self.inner);
                    shared.task = Some(tokio::spawn(connection_loop(inner, params, generation)));
                    info!("🔌 Connecting to design plugin relay at {}", url);
                }
            }
        }

        self.wait_until_open(&url).await
    }

    /// Join `channel`; required before any other command
    #[instrument(skip(self))]
    pub async fn join_channel(&self, channel: &str) -> Result<()> {
        if channel.trim().is_empty() {
            return Err(TransportError::InvalidChannel(channel.to_string()));
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.send(JOIN_COMMAND, json!({ "channel": channel }), None)
            .await?;

        self.inner.lock().channel = Some(channel.to_string());
        info!("✅ Joined channel {}", channel);
        Ok(())
    }

    /// Send `command` and wait for its correlated reply
    ///
    /// `timeout` is one window of the progressive timeout; `None` uses the
    /// configured default.
    #[instrument(skip(self, params, timeout))]
    pub async fn send(
        &self,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let is_join = command == JOIN_COMMAND;
        let window = timeout.unwrap_or(self.inner.config.request_timeout);

        let lazy_params = {
            let shared = self.inner.lock();
            if !is_join && shared.channel.is_none() {
                return Err(TransportError::channel_required(command));
            }
            if shared.connection == ConnectionState::Open {
                None
            } else {
                Some(shared.params.clone().ok_or(TransportError::NotConnected)?)
            }
        };

        if let Some(params) = lazy_params {
            info!("🔄 Socket not open, connecting before '{}'", command);
            self.connect_with(params).await?;
        }

        let id = Uuid::new_v4().to_string();
        let (responder, receiver) = oneshot::channel();
        let now = Instant::now();

        let deadline = {
            let mut shared = self.inner.lock();

            // A fresh socket carries no membership
            if !is_join && shared.channel.is_none() {
                return Err(TransportError::channel_required(command));
            }
            let writer = match (&shared.connection, &shared.writer) {
                (ConnectionState::Open, Some(writer)) => writer.clone(),
                _ => return Err(TransportError::NotConnected),
            };

            let envelope = OutboundEnvelope::new(&id, command, params, shared.channel.as_deref());
            let text = serde_json::to_string(&envelope)?;

            let timer = ProgressiveTimeout::new(window, self.inner.config.timeout_extensions, now);
            let deadline = timer.deadline();
            shared
                .pending
                .insert(id.clone(), PendingRequest::new(command, responder, timer, now));

            if writer.send(Message::Text(text)).is_err() {
                shared.pending.remove(&id);
                return Err(TransportError::Send("socket writer is gone".to_string()));
            }
            deadline
        };

        debug!("📤 Sent '{}' (id={})", command, id);
        self.await_reply(&id, command, receiver, deadline).await
    }

    /// Stop reconnecting, close the socket and reject everything in flight
    pub async fn close(&self) {
        let (task, generation) = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            let generation = shared.generation;
            shared.params = None;
            shared.channel = None;

            let rejected = shared.pending.reject_all(|_| {
                TransportError::connection_closed(NORMAL_CLOSE, "closed by client")
            });
            if rejected > 0 {
                warn!("Rejected {} pending request(s) on close", rejected);
            }

            let was_open = shared.writer.take().is_some();
            let next = if was_open {
                ConnectionState::Closing
            } else {
                ConnectionState::Closed
            };
            self.inner.set_state(&mut shared, next);

            let task = match (was_open, shared.task.take()) {
                // Dropping the writer lets the socket task send a close frame
                (true, task) => task,
                (false, Some(task)) => {
                    task.abort();
                    None
                }
                (false, None) => None,
            };
            (task, generation)
        };

        if let Some(task) = task {
            let _ = tokio::time::timeout(self.inner.config.connect_timeout, task).await;
        }

        let mut shared = self.inner.lock();
        if shared.generation != generation {
            debug!("Connect issued while closing, leaving its state alone");
            return;
        }
        self.inner.set_state(&mut shared, ConnectionState::Closed);
        info!("🔌 Transport closed");
    }

    async fn wait_until_open(&self, url: &str) -> Result<()> {
        let started = Instant::now();
        let mut state_rx = self.inner.state_tx.subscribe();
        let opened = tokio::time::timeout(
            self.inner.config.connect_timeout,
            state_rx.wait_for(|state| *state == ConnectionState::Open),
        )
        .await;

        match opened {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => Err(TransportError::ConnectTimeout {
                url: url.to_string(),
                elapsed: started.elapsed(),
            }),
        }
    }

    /// Drive the progressive timeout until the request settles
    async fn await_reply(
        &self,
        id: &str,
        command: &str,
        mut receiver: oneshot::Receiver<Result<Value>>,
        mut deadline: Instant,
    ) -> Result<Value> {
        loop {
            tokio::select! {
                outcome = &mut receiver => return flatten(outcome),
                _ = tokio::time::sleep_until(deadline) => {
                    match self.inner.check_timeout(id, command) {
                        Some(next) => deadline = next,
                        None => break,
                    }
                }
            }
        }

        flatten(receiver.await)
    }
}

fn flatten(outcome: std::result::Result<Result<Value>, oneshot::error::RecvError>) -> Result<Value> {
    outcome.unwrap_or_else(|_| {
        Err(TransportError::connection_closed(
            ABNORMAL_CLOSE,
            "request dropped without a reply",
        ))
    })
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        shared.connection = state;
        self.state_tx.send_replace(state);
    }

    fn on_open(&self, generation: u64, writer: mpsc::UnboundedSender<Message>) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        shared.writer = Some(writer);
        shared.channel = None;
        self.set_state(&mut shared, ConnectionState::Open);
        true
    }

    /// Tear down after a close; returns the reconnect delay, or `None` to stop
    fn on_close(&self, generation: u64, code: u16, reason: &str) -> Option<Duration> {
        let mut shared = self.lock();
        if shared.generation != generation {
            return None;
        }

        shared.writer = None;
        shared.channel = None;
        self.set_state(&mut shared, ConnectionState::Closed);

        let rejected = shared
            .pending
            .reject_all(|_| TransportError::connection_closed(code, reason));
        if rejected > 0 {
            warn!(
                "Rejected {} pending request(s): connection closed (code {}: {})",
                rejected, code, reason
            );
        }

        let params = shared.params.as_ref()?;
        let delay = next_reconnect_delay(
            params.base_backoff,
            self.config.max_backoff,
            &mut rand::thread_rng(),
        );
        Some(delay)
    }

    /// Mark a scheduled reconnect as started, unless superseded
    fn begin_reconnect(&self, generation: u64) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation || shared.params.is_none() {
            return false;
        }
        self.set_state(&mut shared, ConnectionState::Connecting);
        true
    }

    /// Advance the timeout of `id` after its deadline passed
    ///
    /// Returns the next deadline to wait for, or `None` once the request has
    /// settled (possibly by expiring here).
    fn check_timeout(&self, id: &str, command: &str) -> Option<Instant> {
        let mut shared = self.lock();
        match shared.pending.poll_timeout(id, Instant::now())? {
            TimeoutStep::Pending { deadline } => Some(deadline),
            TimeoutStep::Extended {
                deadline,
                remaining,
            } => {
                debug!(
                    "⏳ '{}' (id={}) still running, extending timeout ({} extension(s) left)",
                    command, id, remaining
                );
                Some(deadline)
            }
            TimeoutStep::Expired { elapsed } => {
                warn!("⏰ '{}' (id={}) timed out after {:?}", command, id, elapsed);
                shared
                    .pending
                    .settle(id, Err(TransportError::timeout(command, elapsed)));
                None
            }
        }
    }

    /// Classify and dispatch one inbound text frame
    fn handle_text(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("❌ Dropping malformed frame: {}", e);
                return;
            }
        };

        let now = Instant::now();
        let mut shared = self.lock();
        self.sweep_if_due(&mut shared, now);

        let classification = {
            let pending = &shared.pending;
            let views = pending.views();
            classify(&frame, &views, |id| pending.is_settled(id))
        };

        match classification {
            Classification::Progress { id: Some(id) } => {
                let progress = ProgressData::from_frame(&frame);
                if shared.pending.touch(&id, now) {
                    debug!(
                        "📊 Progress for {} ({}): {}% {}",
                        id,
                        progress.command_type.as_deref().unwrap_or("unknown"),
                        progress.progress.unwrap_or_default(),
                        progress.message.as_deref().unwrap_or("")
                    );
                } else {
                    debug!("Progress for unknown request {}", id);
                }
            }
            Classification::Progress { id: None } => {
                debug!("Progress update without request id");
            }
            Classification::Echo => {
                debug!("Ignoring relay echo of our own request");
            }
            Classification::Duplicate { id } => {
                debug!("Ignoring duplicate reply for settled request {}", id);
            }
            Classification::Reply(reply) => {
                if reply.strategy.is_heuristic() {
                    warn!(
                        "🔍 Correlated reply to {} via {:?} fallback",
                        reply.id, reply.strategy
                    );
                }
                debug!("📥 Reply for {} ({:?})", reply.id, reply.strategy);
                shared.pending.settle(&reply.id, reply.outcome);
            }
            Classification::Unmatched => {
                debug!("Unassociated broadcast: {}", text);
            }
        }
    }

    fn sweep_if_due(&self, shared: &mut Shared, now: Instant) {
        if now.saturating_duration_since(shared.last_sweep) < self.config.sweep_interval {
            return;
        }
        shared.last_sweep = now;

        for (id, command) in shared.pending.sweep_stale(now, self.config.stale_after) {
            warn!("🧹 Evicted stale request '{}' (id={})", command, id);
        }
    }
}

/// Connect, serve and reconnect until superseded or closed
async fn connection_loop(inner: Arc<Inner>, params: ConnectParams, generation: u64) {
    let url = params.url();

    loop {
        let attempt = tokio::time::timeout(inner.config.connect_timeout, connect_async(url.as_str())).await;

        let (code, reason) = match attempt {
            Ok(Ok((socket, _response))) => {
                let (sink, source) = socket.split();
                let (writer, outbound) = mpsc::unbounded_channel();
                if !inner.on_open(generation, writer) {
                    return;
                }
                info!("✅ Connected to design plugin relay at {}", url);
                run_socket(&inner, sink, source, outbound).await
            }
            Ok(Err(e)) => {
                warn!("❌ Failed to connect to {}: {}", url, e);
                (ABNORMAL_CLOSE, e.to_string())
            }
            Err(_) => {
                warn!(
                    "⏰ Connection to {} not established within {:?}, aborting attempt",
                    url, inner.config.connect_timeout
                );
                (ABNORMAL_CLOSE, "connection timed out".to_string())
            }
        };

        info!("🔌 Disconnected from {} (code {}: {})", url, code, reason);
        let Some(delay) = inner.on_close(generation, code, &reason) else {
            return;
        };

        info!("🔄 Reconnecting to {} in {:?}", url, delay);
        tokio::time::sleep(delay).await;
        if !inner.begin_reconnect(generation) {
            return;
        }
    }
}

/// Pump frames both ways until the socket closes; returns the close code and reason
async fn run_socket(
    inner: &Inner,
    mut sink: WsSink,
    mut source: WsSource,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> (u16, String) {
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        error!("❌ Failed to write to socket: {}", e);
                        return (ABNORMAL_CLOSE, e.to_string());
                    }
                }
                None => {
                    // Writer dropped by close()
                    let _ = sink.close().await;
                    return (NORMAL_CLOSE, "closed by client".to_string());
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => inner.handle_text(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => inner.handle_text(&text),
                    Err(_) => warn!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (u16::from(CloseCode::Status), "no status".to_string()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    // The close path below is authoritative for cleanup
                    error!("❌ Socket error: {}", e);
                    return (ABNORMAL_CLOSE, e.to_string());
                }
                None => return (ABNORMAL_CLOSE, "connection reset".to_string()),
            },
        }
    }
}
