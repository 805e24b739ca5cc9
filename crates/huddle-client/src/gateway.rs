//! WebSocket connection to the realtime gateway.
//!
//! One background task owns the socket. It authenticates the upgrade with
//! the session's bearer token, identifies with `user_login`, forwards
//! inbound events to the controller and writes outbound commands. When the
//! link drops it reconnects with a fixed delay up to a capped number of
//! attempts; commands that were still queued are discarded.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use huddle_sync::{ConnectionState, SessionContext, StreamTransport, SyncError, TransportEvent};
use huddle_types::events::{StreamCommand, StreamEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ping every 15 seconds. Two consecutive missed pongs (~30s) drop the link.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Bound on TCP connect plus the WebSocket upgrade.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub context: SessionContext,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: Duration,
    /// A handshake that has not completed by then counts as a failed attempt.
    pub connect_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>, context: SessionContext) -> Self {
        Self {
            url: url.into(),
            context,
            reconnect: ReconnectPolicy::default(),
            heartbeat: HEARTBEAT_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Handle to the gateway task. Implements `StreamTransport`.
pub struct GatewayConnection {
    commands: mpsc::UnboundedSender<StreamCommand>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl GatewayConnection {
    /// Start the connection task. Events arrive on the returned receiver,
    /// which closes once the task has stopped for good.
    pub fn spawn(config: GatewayConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let shutdown = CancellationToken::new();

        tokio::spawn(run(config, command_rx, event_tx, state_tx, shutdown.clone()));

        let connection = Self {
            commands: command_tx,
            state: state_rx,
            shutdown,
        };
        (connection, event_rx)
    }

    /// Watch link state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl StreamTransport for GatewayConnection {
    fn emit(&self, command: StreamCommand) -> huddle_sync::Result<()> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(SyncError::TransportUnavailable);
        }
        trace!("queue {}", command.topic());
        self.commands
            .send(command)
            .map_err(|_| SyncError::TransportUnavailable)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

async fn run(
    config: GatewayConfig,
    mut commands: mpsc::UnboundedReceiver<StreamCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
) {
    let mut connected_before = false;
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = tokio::time::timeout(config.connect_timeout, connect(&config)) => {
                result.unwrap_or_else(|_| {
                    Err(anyhow::anyhow!("handshake timed out after {:?}", config.connect_timeout))
                })
            }
        };

        let mut lost = false;
        match connected {
            Ok(socket) => {
                discard_queued(&mut commands);
                attempt = 0;
                state.send_replace(ConnectionState::Connected);
                info!("gateway connected to {}", config.url);
                let _ = events.send(TransportEvent::Connected {
                    resumed: connected_before,
                });
                connected_before = true;

                match run_session(socket, &config, &mut commands, &events, &shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => {
                        warn!("gateway connection lost: {}", reason);
                        discard_queued(&mut commands);
                        lost = true;
                    }
                }
            }
            Err(e) => warn!("gateway connect to {} failed: {:#}", config.url, e),
        }

        attempt += 1;
        if attempt > config.reconnect.max_attempts {
            let attempts = attempt - 1;
            warn!("gateway giving up after {} reconnect attempts", attempts);
            state.send_replace(ConnectionState::Disconnected);
            if lost {
                let _ = events.send(TransportEvent::Disconnected);
            }
            let _ = events.send(TransportEvent::ReconnectFailed { attempts });
            return;
        }

        state.send_replace(ConnectionState::Reconnecting { attempt });
        if lost {
            let _ = events.send(TransportEvent::Disconnected);
        }
        debug!("gateway reconnecting in {:?} (attempt {})", config.reconnect.delay, attempt);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect.delay) => {}
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    info!("gateway closed");
}

async fn connect(config: &GatewayConfig) -> anyhow::Result<Socket> {
    let mut request = config.url.as_str().into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.context.token))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    let (socket, _response) = connect_async(request).await?;
    Ok(socket)
}

/// One connected session: identify, then pump commands, frames and the
/// heartbeat until the link drops or shutdown is requested.
async fn run_session(
    socket: Socket,
    config: &GatewayConfig,
    commands: &mut mpsc::UnboundedReceiver<StreamCommand>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    shutdown: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    let login = StreamCommand::UserLogin {
        user_id: config.context.user_id.clone(),
        username: config.context.username.clone(),
    };
    if let Err(e) = send_command(&mut sink, &login).await {
        return SessionEnd::Lost(e);
    }

    let mut heartbeat = tokio::time::interval(config.heartbeat);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    // Every handle is gone.
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                };
                if let Err(e) = send_command(&mut sink, &command).await {
                    return SessionEnd::Lost(e);
                }
            }
            frame = stream.next() => {
                if let Some(end) = handle_frame(frame, &mut pong_received, events) {
                    return end;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MAX_MISSED_PONGS {
                        return SessionEnd::Lost(format!(
                            "heartbeat timeout (missed {} pongs)",
                            missed_heartbeats
                        ));
                    }
                }
                pong_received = false;
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }
        }
    }
}

fn handle_frame(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    pong_received: &mut bool,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<SessionEnd> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            match serde_json::from_str::<StreamEvent>(text.as_str()) {
                Ok(event) => {
                    trace!("gateway event for {:?}", event.channel_id());
                    let _ = events.send(TransportEvent::Event(event));
                }
                Err(e) => warn!("skipping malformed gateway frame: {}", e),
            }
            None
        }
        Some(Ok(Message::Pong(_))) => {
            *pong_received = true;
            None
        }
        Some(Ok(Message::Close(frame))) => {
            Some(SessionEnd::Lost(format!("closed by server: {:?}", frame)))
        }
        Some(Ok(_)) => None,
        Some(Err(e)) => Some(SessionEnd::Lost(e.to_string())),
        None => Some(SessionEnd::Lost("stream ended".into())),
    }
}

async fn send_command(
    sink: &mut SplitSink<Socket, Message>,
    command: &StreamCommand,
) -> Result<(), String> {
    let json = serde_json::to_string(command).map_err(|e| e.to_string())?;
    trace!("-> {}", command.topic());
    sink.send(Message::Text(json.into())).await.map_err(|e| e.to_string())
}

fn discard_queued(commands: &mut mpsc::UnboundedReceiver<StreamCommand>) {
    let mut dropped = 0usize;
    while commands.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("discarded {} commands queued before the link dropped", dropped);
    }
}
