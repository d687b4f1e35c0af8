//! WebSocket bridge between client terminals, the shell PTY, and the
//! assistant.
//!
//! The bridge binds one localhost listener and routes each connection by
//! request path:
//!
//! - `/terminal` (and any unrecognized path, for plain clients): a duplex
//!   byte pipe to a freshly spawned shell. Binary frames are raw terminal
//!   bytes; text frames are JSON control envelopes (see
//!   [`frame`]). Exactly one shell session exists per connection; either
//!   side closing tears down the other.
//! - `/assistant`: a JSON message channel to the shared completion
//!   session and timeline (see [`assistant`]).
//!
//! # Lifecycle
//!
//! Channel close (either direction) terminates the PTY session; process
//! exit closes the channel from this side exactly once. A spawn failure is
//! rendered into the terminal byte stream as an error banner before the
//! channel closes, so the user sees why.
//!
//! # Resize coalescing
//!
//! Geometry events can arrive at window-drag frequency. They land in a
//! `watch` channel (latest-wins) and a debounce task applies the newest
//! geometry at most once per [`RESIZE_DEBOUNCE`]; intermediate geometries
//! may be skipped, the final one never is.

// Rust guideline compliant 2026-02

pub mod assistant;
pub mod frame;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::assistant::{extract_command, CompletionSession, OllamaClient};
use crate::config::Config;
use crate::constants::{PROMPT_KICK_DELAY, RESIZE_DEBOUNCE};
use crate::pty::{PtyCommand, PtyEvent, PtySession, PtySpawnConfig};
use crate::surface::TerminalSurface;
use crate::timeline::Timeline;
use self::frame::{ControlFrame, Dims, InboundText};

/// Request path served as the assistant channel.
const ASSISTANT_PATH: &str = "/assistant";

/// A WebSocket over a plain local TCP stream.
type Ws = WebSocketStream<TcpStream>;

/// The most recently connected terminal session, used by the assistant
/// for screen snapshots and command write-back.
struct ActiveTerminal {
    connection_id: Uuid,
    surface: Arc<Mutex<TerminalSurface>>,
    input_tx: mpsc::Sender<PtyCommand>,
}

impl std::fmt::Debug for ActiveTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveTerminal")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

/// State shared by all bridge connections.
#[derive(Debug)]
pub struct BridgeContext {
    config: Config,
    timeline: Arc<Timeline>,
    session: CompletionSession,
    active: Mutex<Option<ActiveTerminal>>,
}

impl BridgeContext {
    /// The bridge configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared conversation timeline.
    #[must_use]
    pub fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }

    /// The shared completion session.
    #[must_use]
    pub fn session(&self) -> &CompletionSession {
        &self.session
    }

    /// Point-in-time text of the active terminal's buffer, if a terminal
    /// is attached.
    #[must_use]
    pub fn screen_text(&self) -> Option<String> {
        let active = self.active.lock().expect("active lock poisoned");
        let terminal = active.as_ref()?;
        let mut surface = terminal
            .surface
            .lock()
            .expect("surface lock poisoned");
        Some(surface.full_text())
    }

    /// Extract the command from an exchange and write it into the active
    /// terminal as ordinary input. Returns the command written.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange does not exist, contains no
    /// runnable command, or no terminal is attached.
    pub async fn run_exchange_command(&self, exchange_id: u64) -> Result<String> {
        let exchange = self
            .timeline
            .get(exchange_id)
            .with_context(|| format!("no exchange with id {exchange_id}"))?;
        let command =
            extract_command(&exchange.text).context("no runnable command in that answer")?;

        let input_tx = {
            let active = self.active.lock().expect("active lock poisoned");
            active
                .as_ref()
                .map(|t| t.input_tx.clone())
                .context("no terminal session attached")?
        };
        input_tx
            .send(PtyCommand::Input(format!("{command}\n").into_bytes()))
            .await
            .context("terminal input channel closed")?;
        Ok(command)
    }

    fn register_terminal(
        &self,
        connection_id: Uuid,
        surface: Arc<Mutex<TerminalSurface>>,
        input_tx: mpsc::Sender<PtyCommand>,
    ) {
        let mut active = self.active.lock().expect("active lock poisoned");
        *active = Some(ActiveTerminal {
            connection_id,
            surface,
            input_tx,
        });
    }

    fn unregister_terminal(&self, connection_id: Uuid) {
        let mut active = self.active.lock().expect("active lock poisoned");
        if active
            .as_ref()
            .is_some_and(|t| t.connection_id == connection_id)
        {
            *active = None;
        }
    }
}

/// The WebSocket bridge server.
#[derive(Debug)]
pub struct Bridge {
    listener: TcpListener,
    ctx: Arc<BridgeContext>,
}

impl Bridge {
    /// Bind the bridge on `127.0.0.1` at the configured port.
    ///
    /// Localhost-only is the trust boundary: the listener is never bound
    /// on other interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound or the inference
    /// client cannot be created.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        let client = OllamaClient::new(&config.ollama_url)?;
        let timeline = Arc::new(Timeline::new());
        let session =
            CompletionSession::new(Arc::clone(&timeline), client, config.model.clone());

        Ok(Self {
            listener,
            ctx: Arc::new(BridgeContext {
                config,
                timeline,
                session,
                active: Mutex::new(None),
            }),
        })
    }

    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read local address")
    }

    /// Shared connection state, for embedding and tests.
    #[must_use]
    pub fn context(&self) -> Arc<BridgeContext> {
        Arc::clone(&self.ctx)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails fatally.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        log::info!("bridge listening on {}", self.local_addr()?);
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => {
                    log::info!("bridge shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = accepted.context("accept failed")?;
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, ctx).await {
                    log::warn!("connection from {peer} ended with error: {e:#}");
                }
            });
        }
    }
}

/// Perform the WebSocket handshake and route by request path.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<BridgeContext>,
) -> Result<()> {
    let mut path = String::from("/");
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    })
    .await
    .context("WebSocket handshake failed")?;

    log::info!("connection from {peer} on {path}");
    if path == ASSISTANT_PATH {
        assistant::serve_assistant(ws, ctx).await
    } else {
        serve_terminal(ws, ctx).await
    }
}

/// Serve one terminal connection: spawn a shell, pump bytes both ways,
/// and tear both sides down together.
async fn serve_terminal(ws: Ws, ctx: Arc<BridgeContext>) -> Result<()> {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = ws.split();

    let mut pty = PtySession::with_scrollback(
        ctx.config.rows,
        ctx.config.cols,
        ctx.config.scrollback_lines,
    );
    // Subscribe before spawn so no early output or exit is missed.
    let mut events = pty.subscribe();

    let (shell, args) = ctx.config.resolved_shell();
    log::info!("terminal {connection_id}: spawning {shell}");
    let spawn_config = PtySpawnConfig {
        shell,
        args,
        cwd: ctx.config.resolved_cwd(),
        env: ctx.config.terminal_env.clone(),
        extra_env: HashMap::new(),
    };

    if let Err(e) = pty.spawn(spawn_config) {
        // Surface the spawn failure in the terminal itself, then close.
        let banner = format!("\x1b[1;31mError: {e:#}\x1b[0m\r\n");
        let _ = sink.send(Message::Binary(banner.into_bytes())).await;
        let _ = sink.send(Message::Close(None)).await;
        return Err(e);
    }
    let pty = Arc::new(pty);

    let _ = sink
        .send(Message::Binary(
            b"\x1b[1;32mConnected to terminal.\x1b[0m\r\n".to_vec(),
        ))
        .await;

    ctx.register_terminal(connection_id, pty.surface(), pty.input_sender());
    let cleanup = {
        let ctx = Arc::clone(&ctx);
        let pty = Arc::clone(&pty);
        scopeguard::guard((), move |()| {
            pty.terminate();
            ctx.unregister_terminal(connection_id);
        })
    };

    // Resize coalescing: latest geometry wins, applied after a short
    // debounce so window drags don't queue up.
    let (resize_tx, mut resize_rx) = watch::channel(Dims {
        cols: ctx.config.cols,
        rows: ctx.config.rows,
    });
    let resize_pty = Arc::clone(&pty);
    let resize_task = tokio::spawn(async move {
        while resize_rx.changed().await.is_ok() {
            tokio::time::sleep(RESIZE_DEBOUNCE).await;
            let dims = *resize_rx.borrow_and_update();
            resize_pty.resize(dims.rows, dims.cols);
        }
    });

    // Kick the shell into printing its first prompt.
    let kick_pty = Arc::clone(&pty);
    let kick_task = tokio::spawn(async move {
        tokio::time::sleep(PROMPT_KICK_DELAY).await;
        if let Err(e) = kick_pty.write_input(b"\n") {
            log::debug!("prompt kick failed: {e}");
        }
    });

    let input_tx = pty.input_sender();
    let mut close_sent = false;
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let _ = input_tx.send(PtyCommand::Input(data)).await;
                }
                Some(Ok(Message::Text(text))) => match frame::parse_text_frame(&text) {
                    InboundText::Control(ControlFrame::Resize { dims }) => {
                        log::debug!("terminal {connection_id}: resize to {dims:?}");
                        let _ = resize_tx.send(dims);
                    }
                    InboundText::Input(raw) => {
                        let data = frame::normalize_input(&raw);
                        let _ = input_tx.send(PtyCommand::Input(data.into_bytes())).await;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("terminal {connection_id}: closed by client");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("terminal {connection_id}: read error: {e}");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(PtyEvent::Output(data)) => {
                    if sink.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Ok(PtyEvent::Exited { exit_code }) => {
                    log::info!("terminal {connection_id}: shell exited with {exit_code:?}");
                    if !close_sent {
                        close_sent = true;
                        let _ = sink.send(Message::Close(None)).await;
                    }
                    break;
                }
                Ok(PtyEvent::Failed { message }) => {
                    let banner = format!("\x1b[1;31mError: {message}\x1b[0m\r\n");
                    let _ = sink.send(Message::Binary(banner.into_bytes())).await;
                    if !close_sent {
                        close_sent = true;
                        let _ = sink.send(Message::Close(None)).await;
                    }
                    break;
                }
                Ok(PtyEvent::Resized { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("terminal {connection_id}: dropped {n} events for slow client");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    resize_task.abort();
    kick_task.abort();
    drop(cleanup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            port: 0,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_bind_on_ephemeral_port() {
        let bridge = Bridge::bind(test_config()).await.unwrap();
        let addr = bridge.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_context_has_empty_timeline_and_no_terminal() {
        let bridge = Bridge::bind(test_config()).await.unwrap();
        let ctx = bridge.context();
        assert!(ctx.timeline().is_empty());
        assert!(ctx.screen_text().is_none());
    }

    #[tokio::test]
    async fn test_run_command_without_terminal_fails() {
        let bridge = Bridge::bind(test_config()).await.unwrap();
        let ctx = bridge.context();
        assert!(ctx.run_exchange_command(1).await.is_err());
    }

    #[tokio::test]
    async fn test_register_makes_screen_text_available() {
        let bridge = Bridge::bind(test_config()).await.unwrap();
        let ctx = bridge.context();

        let surface = Arc::new(Mutex::new(TerminalSurface::new(24, 80)));
        surface.lock().unwrap().feed(b"on the screen\r\n");
        let (tx, _rx) = mpsc::channel(8);
        let id = Uuid::new_v4();
        ctx.register_terminal(id, Arc::clone(&surface), tx);

        let text = ctx.screen_text().unwrap();
        assert!(text.contains("on the screen"));

        ctx.unregister_terminal(id);
        assert!(ctx.screen_text().is_none());
    }

    #[tokio::test]
    async fn test_unregister_ignores_stale_connection() {
        let bridge = Bridge::bind(test_config()).await.unwrap();
        let ctx = bridge.context();

        let surface = Arc::new(Mutex::new(TerminalSurface::new(24, 80)));
        let (tx, _rx) = mpsc::channel(8);
        let current = Uuid::new_v4();
        ctx.register_terminal(current, surface, tx);

        // A previous connection going away must not detach the current one.
        ctx.unregister_terminal(Uuid::new_v4());
        assert!(ctx.screen_text().is_some());
    }

    #[tokio::test]
    async fn test_run_command_writes_to_input_channel() {
        let bridge = Bridge::bind(test_config()).await.unwrap();
        let ctx = bridge.context();

        let id = ctx.timeline().append(
            crate::timeline::Role::Assistant,
            "Run:\n```sh\necho hi\n```",
            crate::timeline::ExchangeKind::Normal,
        );

        let surface = Arc::new(Mutex::new(TerminalSurface::new(24, 80)));
        let (tx, mut rx) = mpsc::channel(8);
        ctx.register_terminal(Uuid::new_v4(), surface, tx);

        let command = ctx.run_exchange_command(id).await.unwrap();
        assert_eq!(command, "echo hi");
        match rx.recv().await.unwrap() {
            PtyCommand::Input(bytes) => assert_eq!(bytes, b"echo hi\n"),
        }
    }
}
