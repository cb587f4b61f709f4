/*!
 * OpenAI-compatible streaming client.
 *
 * Talks to any server exposing `/chat/completions` with server-sent events
 * (vLLM, LM Studio, llama.cpp server, the OpenAI API itself). Retries are
 * not done here; the batch orchestrator owns retry policy.
 */

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use log::{debug, error, warn};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{ChatRequest, CompletionStream, Provider, StreamChunk};

/// Client for an OpenAI-compatible endpoint
#[derive(Debug)]
pub struct OpenAI {
    /// Base URL, e.g. `http://localhost:8000/v1`
    endpoint: String,
    /// Bearer token, empty for local servers
    api_key: String,
    /// HTTP client for making requests
    client: Client,
}

impl OpenAI {
    /// Create a client with a whole-request timeout
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client ({}), falling back to defaults", e);
                Client::new()
            });
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

fn map_send_error(error: reqwest::Error) -> ProviderError {
    if error.is_connect() {
        ProviderError::ConnectionError(error.to_string())
    } else {
        ProviderError::RequestFailed(error.to_string())
    }
}

#[async_trait]
impl Provider for OpenAI {
    async fn stream_chat(&self, request: ChatRequest) -> Result<CompletionStream, ProviderError> {
        let url = self.url("chat/completions");
        debug!("POST {} (model={}, messages={})", url, request.model, request.messages.len());

        let response = self
            .authorize(self.client.post(&url).json(&request))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Chat completion failed ({}): {}", status, body);
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let events = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, item: Result<Bytes, reqwest::Error>| {
                let batch = match item {
                    Ok(bytes) => decoder.feed(&bytes),
                    Err(e) => vec![Err(ProviderError::StreamInterrupted(e.to_string()))],
                };
                if batch.is_empty() && decoder.is_done() {
                    future::ready(None)
                } else {
                    future::ready(Some(stream::iter(batch)))
                }
            })
            .flatten();

        Ok(Box::pin(events))
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let response = self
            .authorize(self.client.get(self.url("models")))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::from_status(status.as_u16(), &body))
        }
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental server-sent-events decoder.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// `[DONE]` has been received
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning every chunk completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut chunks = Vec::new();
        if self.done {
            return chunks;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                self.buffer.clear();
                break;
            }
            match parse_event(data) {
                Ok(Some(chunk)) => chunks.push(Ok(chunk)),
                Ok(None) => {}
                // one unreadable event does not end the stream
                Err(ProviderError::ParseError(e)) => warn!("Skipping unreadable stream event: {}", e),
                Err(e) => chunks.push(Err(e)),
            }
        }
        chunks
    }
}

fn parse_event(data: &str) -> Result<Option<StreamChunk>, ProviderError> {
    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| ProviderError::ParseError(format!("{}: {}", e, data)))?;

    if let Some(err) = event.error {
        return Err(ProviderError::StreamInterrupted(err.to_string()));
    }

    let Some(choice) = event.choices.into_iter().next() else {
        return Ok(None);
    };
    let delta = choice.delta.and_then(|d| d.content).unwrap_or_default();
    if delta.is_empty() && choice.finish_reason.is_none() {
        return Ok(None);
    }
    Ok(Some(StreamChunk {
        delta,
        finish_reason: choice.finish_reason,
    }))
}
