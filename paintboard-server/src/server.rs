//! Lifecycle supervisor: listeners, background tasks, shutdown.
//!
//! Architecture:
//! ```text
//!             ┌────────── ws listener ──────────┐
//! Client A ──►│ reader ─► PaintEngine ─► ACK ─┐ │
//!             │                   │           ▼ │
//!             │                   │   ConnectionEntry.tx ─► writer ─► socket
//!             │                   ▼           ▲ │
//!             │            BroadcastQueue ────┘ │
//!             └──────────────────▲──────────────┘
//!                  heartbeat ────┘
//!
//!             ┌────────── http listener (warp) ─┐
//! curl ──────►│ Router ─► getboard / paint      │
//!             └─────────────────────────────────┘
//! ```
//!
//! Startup: load board → bind listeners → spawn consumer, heartbeat,
//! telemetry. Shutdown: stop accepting and timers, give open connections
//! `shutdown_grace_ms` to finish and abort the rest, persist the board,
//! disconnect the database.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use warp::Filter;

use crate::auth::TokenAuthority;
use crate::broadcast::{BroadcastJob, BroadcastQueue, BroadcastStats};
use crate::config::{ConfigError, PaintboardConfig};
use crate::engine::{PaintEngine, PaintSource};
use crate::gate::MutationGate;
use crate::http::{self, Router};
use crate::permission::PermissionStore;
use crate::persistence::{PersistenceBridge, PersistenceError};
use crate::protocol::{ClientFrame, ProtocolError, ServerFrame};
use crate::registry::{ConnectionEntry, ConnectionRegistry, Outbound};
use crate::storage::Database;
use crate::telemetry::Telemetry;

/// Extra time `stop` allows beyond the grace before aborting a task.
const STOP_MARGIN: Duration = Duration::from_secs(1);

// ─── Errors ──────────────────────────────────────────────────

/// Fatal server errors.
#[derive(Debug)]
pub enum ServerError {
    Config(ConfigError),
    Persistence(PersistenceError),
    Bind { addr: String, source: std::io::Error },
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Persistence(e) => write!(f, "{e}"),
            Self::Bind { addr, source } => write!(f, "Cannot bind {addr}: {source}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<PersistenceError> for ServerError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Why one connection ended abnormally. Never escapes its task.
#[derive(Debug)]
pub enum ConnectionError {
    Handshake(tokio_tungstenite::tungstenite::Error),
    WebSocket(tokio_tungstenite::tungstenite::Error),
    Protocol(ProtocolError),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(e) => write!(f, "Handshake failed: {e}"),
            Self::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol violation: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

// ─── Stats ───────────────────────────────────────────────────

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub protocol_violations: u64,
    pub http_requests: u64,
}

#[derive(Debug, Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    protocol_violations: AtomicU64,
    http_requests: AtomicU64,
}

// ─── Signals ─────────────────────────────────────────────────

/// Resolves on ctrl-c or SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a signal sent
/// right afterwards is not missed.
#[cfg(unix)]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = ctrl_c() => log::info!("Received ctrl-c"),
            _ = terminate.recv() => log::info!("Received SIGTERM"),
        }
    })
}

/// Resolves on ctrl-c.
#[cfg(not(unix))]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    Ok(async {
        ctrl_c().await;
        log::info!("Received ctrl-c");
    })
}

/// Never resolves if ctrl-c cannot be watched.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

// ─── Server ──────────────────────────────────────────────────

/// Shared by every WebSocket connection task.
struct WsContext {
    engine: Arc<PaintEngine>,
    registry: Arc<ConnectionRegistry>,
    ws_path: String,
    stats: Arc<AtomicServerStats>,
    grace: Duration,
}

/// The running paintboard.
pub struct PaintboardServer {
    config: PaintboardConfig,
    engine: Arc<PaintEngine>,
    registry: Arc<ConnectionRegistry>,
    persistence: PersistenceBridge,
    ws_addr: SocketAddr,
    http_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    broadcast_consumer: Option<JoinHandle<()>>,
    stats: Arc<AtomicServerStats>,
    stopped: bool,
}

impl PaintboardServer {
    /// Load the board, bind both listeners and start serving.
    ///
    /// A corrupt stored board or an unbindable address is fatal.
    pub async fn start(
        config: PaintboardConfig,
        db: Arc<dyn Database>,
        auth: Arc<dyn TokenAuthority>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let persistence = PersistenceBridge::new(db);
        let board = persistence.load_board(
            config.width,
            config.height,
            config.reset_board,
            config.default_color,
        )?;

        let ws_listener = bind(&config.ws_bind_addr).await?;
        let ws_addr = ws_listener.local_addr()?;
        let http_bind = resolve(&config.http_bind_addr).await?;

        let registry = Arc::new(ConnectionRegistry::new());
        let (queue, broadcast_consumer) = BroadcastQueue::spawn(registry.clone());
        let telemetry = Arc::new(Telemetry::new());
        let gate = MutationGate::new(config.gate_config(), auth, permissions);
        let engine = Arc::new(PaintEngine::new(board, gate, queue.clone(), telemetry.clone()));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(AtomicServerStats::default());
        let grace = config.shutdown_grace();

        let mut router = Router::new();
        router.register_route(config.route("getboard"), http::getboard_route(engine.clone()));
        router.register_route(config.route("paint"), http::paint_route(engine.clone()));
        let http_stats = stats.clone();
        let routes = router.into_filter().with(warp::log::custom(move |info| {
            http_stats.http_requests.fetch_add(1, Ordering::Relaxed);
            log::debug!("HTTP {} {} → {}", info.method(), info.path(), info.status());
        }));

        let mut http_shutdown = shutdown_rx.clone();
        let (http_addr, http_server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(http_bind, async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .map_err(|e| ServerError::Bind {
                addr: config.http_bind_addr.clone(),
                source: std::io::Error::other(e),
            })?;

        let mut tasks = Vec::new();
        let heartbeat = Duration::from_secs(config.heartbeat_interval_secs);
        tasks.push(tokio::spawn(run_heartbeat(queue, heartbeat, shutdown_rx.clone())));
        let (fast, slow) = telemetry.spawn_samplers(shutdown_rx.clone());
        tasks.push(fast);
        tasks.push(slow);

        let ctx = Arc::new(WsContext {
            engine: engine.clone(),
            registry: registry.clone(),
            ws_path: config.ws_path.clone(),
            stats: stats.clone(),
            grace,
        });
        tasks.push(tokio::spawn(accept_ws(ws_listener, ctx, shutdown_rx.clone())));
        tasks.push(tokio::spawn(serve_http(http_server, shutdown_rx, grace)));

        log::info!(
            "Paintboard {}x{} serving WebSocket on ws://{ws_addr}{} and HTTP on http://{http_addr}{}",
            config.width,
            config.height,
            config.ws_path,
            config.api_root
        );

        Ok(Self {
            config,
            engine,
            registry,
            persistence,
            ws_addr,
            http_addr,
            shutdown,
            tasks,
            broadcast_consumer: Some(broadcast_consumer),
            stats,
            stopped: false,
        })
    }

    /// Serve until ctrl-c or SIGTERM, then shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        let signal = match shutdown_signal() {
            Ok(signal) => signal.boxed(),
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM ({e}); only ctrl-c stops the server");
                ctrl_c().boxed()
            }
        };
        self.run_until(signal).await
    }

    /// Serve until `signal` completes, then stop and persist.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        signal.await;
        log::info!("Shutdown requested");
        self.stop().await;
        self.stop_storage().await
    }

    /// Stop accepting, stop timers and close every connection.
    ///
    /// Returns once every connection task has finished or been aborted, so
    /// no paint can land after this.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace() + STOP_MARGIN;
        for mut task in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Background task ended abnormally: {e}"),
                Err(_) => {
                    log::warn!("Background task outlived the shutdown grace; aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        }
        self.registry.close_all().await;
        if let Some(consumer) = self.broadcast_consumer.take() {
            consumer.abort();
        }
        log::info!("Listeners and timers stopped");
    }

    /// Persist the board and disconnect the database.
    pub async fn stop_storage(&self) -> Result<(), ServerError> {
        let hex = self.engine.serialize().await;
        self.persistence.save_board(hex)?;
        self.persistence.close()?;
        Ok(())
    }

    pub fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn config(&self) -> &PaintboardConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<PaintEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.engine.queue().stats()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            protocol_violations: self.stats.protocol_violations.load(Ordering::Relaxed),
            http_requests: self.stats.http_requests.load(Ordering::Relaxed),
        }
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

async fn resolve(addr: &str) -> Result<SocketAddr, ServerError> {
    let bind_error = |source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    };
    tokio::net::lookup_host(addr)
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address resolved to nothing",
            ))
        })
}

async fn run_heartbeat(
    queue: BroadcastQueue,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                queue.enqueue(BroadcastJob::Heartbeat);
            }
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }
    log::debug!("Heartbeat stopped");
}

// ─── HTTP listener ───────────────────────────────────────────

/// Drive warp until shutdown, then allow `grace` for open requests.
async fn serve_http<S>(server: S, mut shutdown: watch::Receiver<bool>, grace: Duration)
where
    S: Future<Output = ()>,
{
    tokio::pin!(server);
    tokio::select! {
        _ = &mut server => return,
        _ = shutdown.wait_for(|stop| *stop) => {}
    }
    if tokio::time::timeout(grace, server).await.is_err() {
        log::warn!("HTTP connections still open after {grace:?}; dropping them");
    }
    log::debug!("HTTP listener stopped");
}

// ─── WebSocket listener ──────────────────────────────────────

async fn accept_ws(
    listener: TcpListener,
    ctx: Arc<WsContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let conn_shutdown = shutdown.clone();
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    log::debug!("New TCP connection from {addr}");
                    let ctx = ctx.clone();
                    let shutdown = conn_shutdown.clone();
                    conns.spawn(async move {
                        match handle_connection(stream, addr, &ctx, shutdown).await {
                            Ok(()) => {}
                            Err(e @ ConnectionError::Protocol(_)) => log::warn!("Closed {addr}: {e}"),
                            Err(e) => log::debug!("Connection from {addr} ended: {e}"),
                        }
                    });
                }
                Err(e) => log::warn!("WebSocket accept failed: {e}"),
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }
    drop(listener);

    let drain = async {
        while conns.join_next().await.is_some() {}
    };
    let drained = tokio::time::timeout(ctx.grace, drain).await.is_ok();
    if !drained {
        log::warn!(
            "{} WebSocket connections still open after {:?}; aborting",
            conns.len(),
            ctx.grace
        );
        conns.shutdown().await;
    }
    log::debug!("WebSocket listener stopped");
}

/// Upgrade, register, then read until close, violation or shutdown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: &WsContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let ws_path = ctx.ws_path.clone();
    let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == ws_path {
            Ok(resp)
        } else {
            let mut err = ErrorResponse::new(Some("Not Found".to_string()));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };
    let ws_stream = tokio::select! {
        handshake = tokio_tungstenite::accept_hdr_async(stream, check_path) => {
            handshake.map_err(ConnectionError::Handshake)?
        }
        _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
    };

    let (entry, outbound) = ConnectionEntry::new(addr);
    ctx.registry.add(entry.clone()).await;
    ctx.stats.total_connections.fetch_add(1, Ordering::Relaxed);
    ctx.stats.active_connections.fetch_add(1, Ordering::Relaxed);
    log::info!("WebSocket connection {} established from {addr}", entry.id());

    let (sink, source) = ws_stream.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound));

    let result = read_loop(source, &entry, &ctx.engine, shutdown).await;
    if let Err(ConnectionError::Protocol(_)) = result {
        ctx.stats.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    ctx.registry.remove(&entry.id()).await;
    drop(entry);
    // A peer that stopped reading can park the writer on a full socket
    match tokio::time::timeout(ctx.grace, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Writer task for {addr} ended abnormally: {e}"),
        Err(_) => {
            log::debug!("Writer for {addr} stalled; aborting");
            writer.abort();
        }
    }
    ctx.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    log::info!("Connection closed from {addr}");
    result
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = futures_util::stream::SplitStream<WebSocketStream<TcpStream>>;

/// Sole owner of the sink: drains the outbound channel in order.
async fn write_loop(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::Binary(frame)).await {
                    log::debug!("Write failed: {e}");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut source: WsSource,
    entry: &ConnectionEntry,
    engine: &PaintEngine,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    loop {
        let msg = tokio::select! {
            msg = source.next() => msg,
            _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
        };
        match msg {
            Some(Ok(Message::Binary(data))) => {
                engine.telemetry().record_bandwidth(data.len() as u64);
                // Decode everything first; a bad frame voids the whole message
                let frames = ClientFrame::decode_all(&data).map_err(ConnectionError::Protocol)?;
                for frame in frames {
                    match frame {
                        ClientFrame::Paint(paint) => {
                            let verdict = engine.paint(paint.into(), PaintSource::WebSocket).await;
                            let ack = ServerFrame::Ack {
                                request_id: paint.request_id,
                                status: verdict.ack_status(),
                            };
                            if !entry.send(Bytes::from(ack.encode())) {
                                return Ok(());
                            }
                        }
                        ClientFrame::Pong => log::trace!("Heartbeat reply from {}", entry.addr()),
                    }
                }
            }
            Some(Ok(Message::Text(_))) => {
                return Err(ConnectionError::Protocol(ProtocolError::UnexpectedText));
            }
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectionError::WebSocket(e)),
        }
    }
}
