//! HTTP client for the local Ollama inference server.
//!
//! Two operations: model listing (`GET /api/tags`) and streaming
//! completion (`POST /api/generate` with `stream: true`). The completion
//! response is a sequence of newline-delimited JSON objects; fragments can
//! be split across network chunk boundaries, so [`GenerateStream`] buffers
//! bytes and only parses complete lines.
//!
//! A malformed line is logged and skipped rather than aborting the stream:
//! one garbled fragment should not cost the user the rest of the answer.

// Rust guideline compliant 2026-02

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::constants::{HTTP_CONNECT_TIMEOUT, HTTP_REQUEST_TIMEOUT};

/// A model known to the inference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name (e.g. `llama3.2:latest`).
    pub name: String,
    /// Model identifier used in generate requests.
    pub model: String,
    /// Size in bytes, when reported.
    #[serde(default)]
    pub size: Option<u64>,
    /// Last modification timestamp, when reported.
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One parsed fragment of a streaming completion.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GenerateChunk {
    /// Text fragment, absent on bookkeeping-only lines.
    #[serde(default)]
    pub response: Option<String>,
    /// Set on the final line of the stream.
    #[serde(default)]
    pub done: bool,
}

/// Client for the local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Creates a client for the given base URL.
    ///
    /// Only connection establishment is bounded by a timeout; streaming
    /// completions can legitimately run for minutes, so there is no
    /// overall request deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List the models the inference server has available.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable, responds with a
    /// non-success status, or the body cannot be parsed.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("inference server unreachable at {url}"))?;

        if !response.status().is_success() {
            bail!("model listing failed: {}", response.status());
        }

        let tags: TagsResponse = response
            .json()
            .await
            .context("parsing model list response")?;
        Ok(tags.models)
    }

    /// Start a streaming completion for `prompt` against `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or responds with a
    /// non-success status. Errors *during* the stream are reported by
    /// [`GenerateStream::next_chunk`].
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<GenerateStream> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: true,
            })
            .send()
            .await
            .with_context(|| format!("inference server unreachable at {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("completion request failed: {status}");
        }

        Ok(GenerateStream::new(
            response.bytes_stream().map_err(anyhow::Error::from).boxed(),
        ))
    }
}

/// Incremental reader for a newline-delimited JSON completion stream.
///
/// Bytes are buffered until a full line is available; a partial line at a
/// chunk boundary is completed by the next chunk, never parsed early.
pub struct GenerateStream {
    inner: BoxStream<'static, Result<Bytes>>,
    buf: Vec<u8>,
    finished: bool,
}

impl std::fmt::Debug for GenerateStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateStream")
            .field("buffered_bytes", &self.buf.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl GenerateStream {
    pub(crate) fn new(inner: BoxStream<'static, Result<Bytes>>) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            finished: false,
        }
    }

    /// Next parsed fragment, in arrival order.
    ///
    /// Returns `None` when the stream is exhausted. Malformed lines are
    /// logged and skipped. A transport error ends the stream after being
    /// reported once.
    pub async fn next_chunk(&mut self) -> Option<Result<GenerateChunk>> {
        loop {
            if let Some(line) = self.take_line() {
                match parse_line(&line) {
                    Some(chunk) => return Some(Ok(chunk)),
                    None => continue,
                }
            }

            if self.finished {
                // Flush a trailing unterminated line, if the server sent one.
                let rest = std::mem::take(&mut self.buf);
                let line = String::from_utf8_lossy(&rest).into_owned();
                return parse_line(&line).map(Ok);
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => self.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    self.finished = true;
                    self.buf.clear();
                    return Some(Err(e.context("reading completion stream")));
                }
                None => self.finished = true,
            }
        }
    }

    /// Pop the next complete line from the buffer, if any.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim_end().to_string())
    }
}

/// Parse one NDJSON line, skipping blanks and logging malformed input.
fn parse_line(line: &str) -> Option<GenerateChunk> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(trimmed) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            log::warn!("skipping malformed completion fragment: {e}");
            None
        }
    }
}
