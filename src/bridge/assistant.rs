//! Assistant WebSocket channel.
//!
//! JSON message channel between a client UI and the shared completion
//! session. On connect the client receives the full timeline as `appended`
//! messages, then live updates as the conversation evolves. Requests:
//!
//! - `ask` — issue a completion for a prompt
//! - `stop` — cancel the in-flight completion
//! - `explain_screen` — ask about the active terminal's current contents
//! - `run_command` — write the command from an answer into the terminal
//! - `models` — list the models the inference server has available
//!
//! A request arriving while a completion is in flight is answered with
//! `busy`; the in-flight exchange is left untouched.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::BridgeContext;
use crate::assistant::ModelInfo;
use crate::timeline::{Exchange, ExchangeKind, TimelineUpdate};

type Ws = WebSocketStream<TcpStream>;
type WsSink = SplitSink<Ws, Message>;

/// Requests a client can send on the assistant channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantRequest {
    /// Issue a completion for a prompt.
    Ask {
        /// The user's prompt.
        prompt: String,
        /// Model override; the configured default when absent.
        #[serde(default)]
        model: Option<String>,
    },
    /// Cancel the in-flight completion.
    Stop,
    /// Ask about the active terminal's current contents.
    ExplainScreen {
        /// Model override; the configured default when absent.
        #[serde(default)]
        model: Option<String>,
    },
    /// Write the command from the given exchange into the terminal.
    RunCommand {
        /// Exchange id of the answer to act on.
        id: u64,
    },
    /// List available models.
    Models,
}

/// Messages the daemon sends on the assistant channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantMessage {
    /// A new exchange was appended to the timeline.
    Appended {
        /// The appended exchange.
        exchange: Exchange,
    },
    /// The tail exchange's text changed (streaming update).
    Tail {
        /// Identifier of the mutated exchange.
        id: u64,
        /// Full replacement text.
        text: String,
        /// Presentation kind after the mutation.
        kind: ExchangeKind,
    },
    /// A request was rejected because a completion is in flight.
    Busy,
    /// Model listing response.
    Models {
        /// Models the inference server reports.
        models: Vec<ModelInfo>,
    },
    /// A request failed.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

/// Serve one assistant connection: replay the timeline, then relay
/// requests and live updates until either side closes.
pub async fn serve_assistant(ws: Ws, ctx: Arc<BridgeContext>) -> Result<()> {
    let (mut sink, mut stream) = ws.split();

    let timeline = ctx.timeline();
    // Subscribe before snapshotting so nothing falls between the two;
    // replayed ids are skipped when they arrive again as live updates.
    let mut updates = timeline.subscribe();

    let mut replayed_max = 0;
    for exchange in timeline.snapshot() {
        replayed_max = exchange.id;
        send_message(&mut sink, &AssistantMessage::Appended { exchange }).await?;
    }

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<AssistantRequest>(&text) {
                    Ok(request) => handle_request(request, &mut sink, &ctx).await?,
                    Err(e) => {
                        send_message(&mut sink, &AssistantMessage::Error {
                            message: format!("unrecognized request: {e}"),
                        })
                        .await?;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("assistant channel read error: {e}");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(TimelineUpdate::Appended(exchange)) => {
                    if exchange.id > replayed_max {
                        send_message(&mut sink, &AssistantMessage::Appended { exchange }).await?;
                    }
                }
                Ok(TimelineUpdate::TailUpdated { id, text, kind }) => {
                    send_message(&mut sink, &AssistantMessage::Tail { id, text, kind }).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("assistant channel dropped {n} timeline updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}

async fn handle_request(
    request: AssistantRequest,
    sink: &mut WsSink,
    ctx: &Arc<BridgeContext>,
) -> Result<()> {
    match request {
        AssistantRequest::Ask { prompt, model } => {
            if ctx.session().ask(&prompt, model.as_deref()).is_err() {
                send_message(sink, &AssistantMessage::Busy).await?;
            }
        }
        AssistantRequest::Stop => ctx.session().stop(),
        AssistantRequest::ExplainScreen { model } => match ctx.screen_text() {
            Some(screen_text) => {
                if ctx
                    .session()
                    .ask_about_screen(&screen_text, model.as_deref())
                    .is_err()
                {
                    send_message(sink, &AssistantMessage::Busy).await?;
                }
            }
            None => {
                send_message(sink, &AssistantMessage::Error {
                    message: "no terminal session attached".to_string(),
                })
                .await?;
            }
        },
        AssistantRequest::RunCommand { id } => {
            if let Err(e) = ctx.run_exchange_command(id).await {
                send_message(sink, &AssistantMessage::Error {
                    message: format!("{e:#}"),
                })
                .await?;
            }
        }
        AssistantRequest::Models => match ctx.session().client().list_models().await {
            Ok(models) => send_message(sink, &AssistantMessage::Models { models }).await?,
            Err(e) => {
                send_message(sink, &AssistantMessage::Error {
                    message: format!("{e:#}"),
                })
                .await?;
            }
        },
    }
    Ok(())
}

async fn send_message(sink: &mut WsSink, message: &AssistantMessage) -> Result<()> {
    let json = serde_json::to_string(message).context("serializing assistant message")?;
    sink.send(Message::Text(json))
        .await
        .context("assistant channel send failed")
}
