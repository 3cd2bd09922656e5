//! The persistent duplex channel to the canvas authority.
//!
//! A single Tokio task owns the websocket: inbound frames are parsed and
//! forwarded as [`CanvasEvent`]s, outbound requests arrive over a command
//! channel. Unclean closes are retried with exponential backoff up to a
//! hard ceiling; after that the channel reports a terminal failure
//! instead of reconnecting forever.

use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use pixelfield_engine::{CanvasId, ColorIndex};

use crate::protocol::{self, BAD_CONNECTION_REASON, ServerMessage, parse_server_message};

/// Lifecycle of the channel. Paint intents may only be sent while
/// `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    /// Socket opening or waiting for the init frame.
    Connecting,
    /// Init frame received; fully usable.
    Initialized,
    /// Gone for good (explicit disconnect or retry ceiling).
    Closed,
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base endpoint, e.g. `wss://example.org/pix/connect`.
    pub endpoint: String,
    /// Short-lived access token appended to the URL.
    pub access_token: String,
    /// Reconnect ceiling before the channel gives up.
    pub max_reconnect_attempts: u32,
    /// Delay before a connectivity problem is surfaced; debounces blips.
    pub problem_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_token: String::new(),
            max_reconnect_attempts: 5,
            problem_delay: Duration::from_secs(3),
        }
    }
}

impl ChannelConfig {
    pub fn url(&self) -> String {
        if self.access_token.is_empty() {
            self.endpoint.clone()
        } else {
            format!("{}?hash={}", self.endpoint, self.access_token)
        }
    }
}

/// Outbound requests accepted by the channel task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    PlacePixel { canvas: CanvasId, x: i32, y: i32, color: ColorIndex },
    Chat { message: String },
    Disconnect,
}

/// Events delivered to the controller.
#[derive(Debug, Clone)]
pub enum CanvasEvent {
    Initialized(Box<protocol::InitPayload>),
    PixelPlaced(protocol::PixelEcho),
    PlayerCount(u32),
    PixelConfirmed(protocol::ConfirmPayload),
    PixelRefused(protocol::RefusePayload),
    CaptchaRequired(protocol::CaptchaPayload),
    RefreshChunks(Vec<protocol::ChunkRef>),
    Chat(protocol::ChatEntry),
    ChatCleared,
    Notification(protocol::NotificationPayload),
    /// Debounced connectivity-problem indicator.
    ConnectionProblem,
    /// The authority told us to go away, or a send hit a dead channel;
    /// the host should restart the session.
    ReloadRequired,
    /// Retry ceiling reached; terminal.
    ConnectionFailed { attempts: u32 },
    Disconnected { reason: String },
}

/// What happened to an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    Sent,
    /// Still connecting; the request was dropped, not queued.
    DroppedConnecting,
    /// The channel is closed; the session must be restarted.
    DeadChannel,
}

/// Cloneable handle for talking to the channel task.
#[derive(Clone)]
pub struct ChannelHandle {
    command_tx: mpsc::Sender<ChannelCommand>,
    state: Arc<RwLock<ConnectionState>>,
}

impl ChannelHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ConnectionState::Initialized
    }

    /// Applies the send gating rules: requests are only forwarded while
    /// the channel is initialized, dropped while connecting, and a dead
    /// channel is reported so the host can restart the session.
    pub fn try_send(&self, command: ChannelCommand) -> SendDisposition {
        match self.state() {
            ConnectionState::Initialized => {
                if self.command_tx.try_send(command).is_err() {
                    log::error!("channel task unreachable, treating as dead channel");
                    return SendDisposition::DeadChannel;
                }
                SendDisposition::Sent
            }
            ConnectionState::Connecting => SendDisposition::DroppedConnecting,
            ConnectionState::NotConnected | ConnectionState::Closed => SendDisposition::DeadChannel,
        }
    }

    /// Asks the task to close cleanly.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(ChannelCommand::Disconnect).await;
    }

    /// Handle without a running task, for exercising the send gating in
    /// tests.
    #[cfg(test)]
    pub(crate) fn detached(state: ConnectionState) -> (Self, mpsc::Receiver<ChannelCommand>) {
        let (command_tx, command_rx) = mpsc::channel(16);
        (
            ChannelHandle {
                command_tx,
                state: Arc::new(RwLock::new(state)),
            },
            command_rx,
        )
    }
}

/// Backoff before reconnect attempt `attempt` (0-based): 1s, 2s, 4s, …
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(6))
}

/// Spawns the channel task. Returns the command handle and the event
/// stream the controller drains.
pub fn connect(config: ChannelConfig) -> (ChannelHandle, mpsc::Receiver<CanvasEvent>) {
    let (command_tx, command_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(256);
    let state = Arc::new(RwLock::new(ConnectionState::Connecting));

    let handle = ChannelHandle {
        command_tx,
        state: state.clone(),
    };

    tokio::spawn(run_channel(config, command_rx, event_tx, state));

    (handle, event_rx)
}

/// Result of one socket session, steering the outer reconnect loop.
enum SessionEnd {
    CleanShutdown,
    Unrecoverable,
    Lost,
}

async fn run_channel(
    config: ChannelConfig,
    mut command_rx: mpsc::Receiver<ChannelCommand>,
    event_tx: mpsc::Sender<CanvasEvent>,
    state: Arc<RwLock<ConnectionState>>,
) {
    let url = config.url();
    let mut attempt: u32 = 0;

    loop {
        *state.write() = ConnectionState::Connecting;
        log::info!("connecting to canvas authority: {}", config.endpoint);

        let ws_stream = match connect_async(&url).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                log::warn!("connect failed: {err}");
                attempt += 1;
                if attempt > config.max_reconnect_attempts {
                    break;
                }
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
                continue;
            }
        };

        match run_session(ws_stream, &mut command_rx, &event_tx, &state).await {
            SessionEnd::CleanShutdown => {
                *state.write() = ConnectionState::Closed;
                return;
            }
            SessionEnd::Unrecoverable => {
                *state.write() = ConnectionState::Closed;
                let _ = event_tx.send(CanvasEvent::ReloadRequired).await;
                return;
            }
            SessionEnd::Lost => {
                *state.write() = ConnectionState::NotConnected;
                // Debounce: a quick reconnect should not flash the
                // problem indicator.
                tokio::time::sleep(config.problem_delay).await;
                let _ = event_tx.send(CanvasEvent::ConnectionProblem).await;
                attempt += 1;
                if attempt > config.max_reconnect_attempts {
                    break;
                }
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }
        }
    }

    *state.write() = ConnectionState::Closed;
    log::error!("giving up after {attempt} reconnect attempts");
    let _ = event_tx.send(CanvasEvent::ConnectionFailed { attempts: attempt }).await;
}

async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    command_rx: &mut mpsc::Receiver<ChannelCommand>,
    event_tx: &mpsc::Sender<CanvasEvent>,
    state: &Arc<RwLock<ConnectionState>>,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_server_message(&text) {
                            Ok(parsed) => {
                                if let Some(end) = dispatch(parsed, event_tx, state).await {
                                    return end;
                                }
                            }
                            Err(err) => log::warn!("unparseable frame: {err}"),
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        log::warn!("channel closed by peer");
                        return SessionEnd::Lost;
                    }
                    Some(Err(err)) => {
                        log::warn!("channel error: {err}");
                        return SessionEnd::Lost;
                    }
                }
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Disconnect) | None => {
                        let _ = write.close().await;
                        return SessionEnd::CleanShutdown;
                    }
                    Some(cmd) => {
                        let frame = command_to_frame(&cmd);
                        if let Err(err) = write.send(Message::Text(frame.into())).await {
                            log::error!("send failed: {err}");
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }
}

/// Forwards one parsed message as an event. Returns a session end when
/// the message terminates the connection.
async fn dispatch(msg: ServerMessage, event_tx: &mpsc::Sender<CanvasEvent>, state: &Arc<RwLock<ConnectionState>>) -> Option<SessionEnd> {
    let event = match msg {
        ServerMessage::Init(payload) => {
            *state.write() = ConnectionState::Initialized;
            CanvasEvent::Initialized(payload)
        }
        ServerMessage::PlacePixel(echo) => CanvasEvent::PixelPlaced(echo),
        ServerMessage::PlayerCount(count) => CanvasEvent::PlayerCount(count),
        ServerMessage::ConfirmPixel(payload) => CanvasEvent::PixelConfirmed(payload),
        ServerMessage::RefusePixel(payload) => CanvasEvent::PixelRefused(payload),
        ServerMessage::CaptchaNeeded(payload) => CanvasEvent::CaptchaRequired(payload),
        ServerMessage::RefreshChunks(list) => CanvasEvent::RefreshChunks(list),
        ServerMessage::Chat(entry) => CanvasEvent::Chat(entry),
        ServerMessage::ClearChatMessages => CanvasEvent::ChatCleared,
        ServerMessage::NewNotification(payload) => CanvasEvent::Notification(payload),
        ServerMessage::Disconnect { reason } => {
            let _ = event_tx.send(CanvasEvent::Disconnected { reason: reason.clone() }).await;
            if reason == BAD_CONNECTION_REASON {
                return Some(SessionEnd::Unrecoverable);
            }
            return Some(SessionEnd::Lost);
        }
        ServerMessage::Unknown(tag) => {
            log::debug!("ignoring unknown message tag '{tag}'");
            return None;
        }
    };
    let _ = event_tx.send(event).await;
    None
}

fn command_to_frame(cmd: &ChannelCommand) -> String {
    match cmd {
        ChannelCommand::PlacePixel { canvas, x, y, color } => protocol::place_pixel_request(*canvas, *x, *y, *color),
        ChannelCommand::Chat { message } => protocol::chat_request(message),
        ChannelCommand::Disconnect => String::new(),
    }
}
