use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, error, warn};

use crate::codec::{MpdCodec, ResponseFrame};
use crate::commands::{escape_argument, idle_command, option_command, Subsystem};
use crate::error::MpdError;
use crate::response::{Response, Value};
use crate::settings::SETTINGS;

const HANDSHAKE_PREFIX: &str = "OK ";
const BUFFER_CAPACITY: usize = 4 * 1024; // Initial read buffer capacity

/// Observable lifecycle state of the daemon connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type ReplySender = oneshot::Sender<Result<Response, MpdError>>;

struct QueuedCommand {
    text: String,
    reply: ReplySender,
}

/// Client for a line-oriented playback-control daemon.
///
/// One background dispatch loop owns the TCP connection exclusively and
/// processes commands in FIFO order; all callers serialize through
/// [`execute`](MpdClient::execute). Transport faults (connect failures,
/// socket errors, read timeouts) are retried internally with backoff and
/// never surface to callers — a submitted command resolves only with a
/// terminal daemon response or a client shutdown.
///
/// # Logging
///
/// This library uses the `tracing` crate for logging. To see wire traffic
/// (`> command` / `< response` lines at DEBUG), initialize a tracing
/// subscriber in your application, e.g. with `tracing_subscriber`.
pub struct MpdClient {
    host: String,
    port: u16,
    command_timeout: Duration,
    max_backoff: Duration,
    cmd_tx: mpsc::UnboundedSender<QueuedCommand>,
    // Taken by `start` when the dispatch loop is spawned
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedCommand>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MpdClient {
    /// Create a client for the daemon at `host:port` with timeouts from the
    /// global settings. The dispatch loop is not running until
    /// [`start`](MpdClient::start) is called.
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_timeouts(host, port, SETTINGS.command_timeout, SETTINGS.max_backoff)
    }

    pub fn with_timeouts(
        host: &str,
        port: u16,
        command_timeout: Duration,
        max_backoff: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        Self {
            host: host.to_string(),
            port,
            command_timeout,
            max_backoff,
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            state_tx: Arc::new(state_tx),
            state_rx,
            task: Mutex::new(None),
        }
    }

    /// Spawn the dispatch loop. Commands submitted before `start` sit in the
    /// queue and are dispatched once the loop owns a connection.
    pub fn start(&self) {
        let Some(cmd_rx) = self.cmd_rx.lock().expect("client lock poisoned").take() else {
            warn!("MpdClient::start called more than once, ignoring");
            return;
        };

        let ctx = DispatchContext {
            host: self.host.clone(),
            port: self.port,
            command_timeout: self.command_timeout,
            max_backoff: self.max_backoff,
            state_tx: self.state_tx.clone(),
        };
        let handle = tokio::spawn(dispatch_loop(ctx, cmd_rx));
        *self.task.lock().expect("client lock poisoned") = Some(handle);
    }

    /// Submit one command and wait for its terminal outcome.
    pub async fn execute(&self, command: impl Into<String>) -> Result<Response, MpdError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(QueuedCommand {
                text: command.into(),
                reply: reply_tx,
            })
            .map_err(|_| MpdError::ClientStopped)?;
        reply_rx.await.map_err(|_| MpdError::ClientStopped)?
    }

    /// Current state of the daemon connection.
    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel for observing connection state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Abort the dispatch loop without waiting for an in-flight command.
    /// Callers awaiting a command observe [`MpdError::ClientStopped`].
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().expect("client lock poisoned").take() {
            debug!("Aborting dispatch loop");
            handle.abort();
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    // --- Command wrappers ---

    pub async fn status(&self) -> Result<Response, MpdError> {
        self.execute("status").await
    }

    /// Ensure playback is active.
    pub async fn play(&self) -> Result<Response, MpdError> {
        self.execute("play").await
    }

    /// Append a track to the server-side playlist by locator.
    pub async fn add_id(&self, locator: &str) -> Result<Response, MpdError> {
        self.execute(format!("addid {}", escape_argument(locator)))
            .await
    }

    /// Fetch the playlist entry with the given daemon-side id.
    pub async fn playlist_id(&self, id: u32) -> Result<Response, MpdError> {
        self.execute(format!("playlistid {}", id)).await
    }

    /// Block until one of the given subsystems changes. The wait is
    /// transparently suspended whenever another command is queued and
    /// resumed by the caller reissuing it.
    pub async fn idle(&self, subsystems: &[Subsystem]) -> Result<Response, MpdError> {
        self.execute(idle_command(subsystems)).await
    }

    pub async fn random(&self, enabled: bool) -> Result<Response, MpdError> {
        self.execute(option_command("random", enabled)).await
    }

    pub async fn repeat(&self, enabled: bool) -> Result<Response, MpdError> {
        self.execute(option_command("repeat", enabled)).await
    }

    pub async fn single(&self, enabled: bool) -> Result<Response, MpdError> {
        self.execute(option_command("single", enabled)).await
    }

    /// Auto-advance-and-drop-played mode.
    pub async fn consume(&self, enabled: bool) -> Result<Response, MpdError> {
        self.execute(option_command("consume", enabled)).await
    }
}

impl std::fmt::Debug for MpdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpdClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.current_state())
            .finish()
    }
}

// Ensure the client cleans up the background task on drop
impl Drop for MpdClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct DispatchContext {
    host: String,
    port: u16,
    command_timeout: Duration,
    max_backoff: Duration,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

enum CommandOutcome {
    /// The daemon produced a terminal line for this command.
    Terminal(Result<Response, MpdError>),
    /// Transport fault; reconnect and resend the same command.
    ConnectionLost,
    /// The command channel closed mid-wait.
    Shutdown,
}

/// Owns the connection exclusively and processes one logical command at a
/// time, pulled in FIFO order. A command is resent across reconnects until a
/// terminal response is obtained — commands are never silently dropped.
async fn dispatch_loop(ctx: DispatchContext, mut cmd_rx: mpsc::UnboundedReceiver<QueuedCommand>) {
    let mut conn: Option<Framed<TcpStream, MpdCodec>> = None;
    // A command received while an idle wait was in flight; dispatched next.
    let mut held: Option<QueuedCommand> = None;

    'commands: loop {
        let command = match held.take() {
            Some(command) => command,
            None => match cmd_rx.recv().await {
                Some(command) => command,
                None => break,
            },
        };

        let is_idle = command.text == "idle" || command.text.starts_with("idle ");

        let outcome = loop {
            if conn.is_none() {
                conn = Some(establish_connection(&ctx).await);
            }
            let Some(framed) = conn.as_mut() else {
                continue;
            };

            debug!("> {}", command.text);
            if let Err(e) = framed.send(command.text.as_str()).await {
                warn!(error = %e, "Lost connection to mpd, reconnecting.");
                let _ = ctx.state_tx.send(ConnectionState::Disconnected);
                conn = None;
                continue;
            }

            match read_response(framed, is_idle, &mut cmd_rx, &mut held, ctx.command_timeout)
                .await
            {
                CommandOutcome::Terminal(result) => break result,
                CommandOutcome::ConnectionLost => {
                    let _ = ctx.state_tx.send(ConnectionState::Disconnected);
                    conn = None;
                    continue;
                }
                CommandOutcome::Shutdown => break 'commands,
            }
        };

        // The caller may have gone away; a dropped handle is not an error.
        let _ = command.reply.send(outcome);
    }

    debug!("Dispatch loop finished.");
    let _ = ctx.state_tx.send(ConnectionState::Disconnected);
}

/// Accumulate response frames until a terminal line.
async fn read_response(
    framed: &mut Framed<TcpStream, MpdCodec>,
    is_idle: bool,
    cmd_rx: &mut mpsc::UnboundedReceiver<QueuedCommand>,
    held: &mut Option<QueuedCommand>,
    command_timeout: Duration,
) -> CommandOutcome {
    let mut response = Response::new();
    let mut interrupted = false;

    loop {
        let frame = if is_idle && !interrupted {
            if held.is_some() {
                // A command queued during a previous attempt of this wait is
                // still pending; interrupt the fresh wait immediately.
                interrupted = true;
                debug!("> noidle");
                if framed.send("noidle").await.is_err() {
                    return CommandOutcome::ConnectionLost;
                }
                continue;
            }

            // Race the socket against new work so foreground commands can
            // interrupt the wait. Both futures are cancel-safe: the loser of
            // the race is fully retired when the select returns.
            tokio::select! {
                frame = framed.next() => frame,
                queued = cmd_rx.recv() => {
                    match queued {
                        Some(command) => {
                            *held = Some(command);
                            interrupted = true;
                            debug!("> noidle");
                            if framed.send("noidle").await.is_err() {
                                return CommandOutcome::ConnectionLost;
                            }
                            // Cancellation always yields a response, read it
                            // without racing from here on.
                            continue;
                        }
                        None => return CommandOutcome::Shutdown,
                    }
                }
            }
        } else if is_idle {
            // The daemon owes us a terminal line after `noidle`.
            framed.next().await
        } else {
            match timeout(command_timeout, framed.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    warn!("mpd did not respond in time, reconnecting.");
                    return CommandOutcome::ConnectionLost;
                }
            }
        };

        match frame {
            Some(Ok(ResponseFrame::Field { key, value })) => {
                debug!("< {}: {}", key, value);
                response.push(key, Value::Text(value));
            }
            Some(Ok(ResponseFrame::Binary(payload))) => {
                debug!("< {} bytes of binary payload", payload.len());
                response.push("binary".to_string(), Value::Binary(payload));
            }
            Some(Ok(ResponseFrame::Ok)) => {
                debug!("< OK");
                return CommandOutcome::Terminal(Ok(response));
            }
            Some(Ok(ResponseFrame::Ack {
                code,
                command_index,
                command,
                message,
            })) => {
                debug!("< ACK [{}@{}] {{{}}} {}", code, command_index, command, message);
                return CommandOutcome::Terminal(Err(MpdError::CommandFailed {
                    code,
                    command_index,
                    command,
                    message,
                }));
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to decode response, reconnecting.");
                return CommandOutcome::ConnectionLost;
            }
            None => {
                warn!("Lost connection to mpd, reconnecting.");
                return CommandOutcome::ConnectionLost;
            }
        }
    }
}

/// Open a socket and validate the handshake, retrying forever. The waits
/// between attempts are 0s, 1s, 2s, 4s, ... capped at `max_backoff`. All
/// faults in this phase are logged and swallowed — connection establishment
/// is an internal concern.
async fn establish_connection(ctx: &DispatchContext) -> Framed<TcpStream, MpdCodec> {
    let mut delay = Duration::ZERO;

    loop {
        if !delay.is_zero() {
            let _ = ctx.state_tx.send(ConnectionState::Disconnected);
            sleep(delay).await;
        }
        delay = (delay * 2).clamp(Duration::from_secs(1), ctx.max_backoff);

        let _ = ctx.state_tx.send(ConnectionState::Connecting);
        debug!("Connecting to {}:{}", ctx.host, ctx.port);

        let mut stream = match TcpStream::connect((ctx.host.as_str(), ctx.port)).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(
                    error = %e,
                    "Connection to {}:{} failed. Retrying in {:?}.",
                    ctx.host, ctx.port, delay
                );
                continue;
            }
        };

        let mut read_buf = BytesMut::with_capacity(BUFFER_CAPACITY);
        let hello = match timeout(
            ctx.command_timeout,
            read_handshake(&mut stream, &mut read_buf),
        )
        .await
        {
            Ok(Ok(hello)) => hello,
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    "Handshake with {}:{} failed. Retrying in {:?}.",
                    ctx.host, ctx.port, delay
                );
                continue;
            }
            Err(_) => {
                warn!(
                    "Handshake with {}:{} timed out. Retrying in {:?}.",
                    ctx.host, ctx.port, delay
                );
                continue;
            }
        };

        if !hello.starts_with(HANDSHAKE_PREFIX) {
            warn!(
                hello = %hello,
                "Received invalid server hello from {}:{}. Retrying in {:?}.",
                ctx.host, ctx.port, delay
            );
            continue;
        }

        debug!(hello = %hello, "Connected to {}:{}", ctx.host, ctx.port);
        let _ = ctx.state_tx.send(ConnectionState::Connected);

        // Bytes already buffered past the handshake belong to the codec.
        let mut parts = FramedParts::new::<&str>(stream, MpdCodec::new());
        parts.read_buf = read_buf;
        return Framed::from_parts(parts);
    }
}

/// Read the one-line handshake, leaving any extra buffered bytes in `buf`.
async fn read_handshake(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<String> {
    loop {
        if let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(newline_pos + 1);
            return Ok(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Connection closed during handshake",
            ));
        }
    }
}
