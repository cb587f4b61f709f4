/*!
 * Completion service clients.
 *
 * The engine only needs one capability from a service: stream a chat
 * completion back as text fragments. This module defines that seam and the
 * wire types shared by every implementation:
 * - `openai`: any OpenAI-compatible `/chat/completions` endpoint (vLLM, LM Studio, ...)
 * - `mock`: scripted in-process service for tests
 */

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::pin::Pin;

use crate::errors::ProviderError;
use crate::translation::profiles::GenerationProfile;

/// Chat message object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user or assistant)
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Streaming chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model name to use for generation
    pub model: String,
    /// Messages of the conversation
    pub messages: Vec<ChatMessage>,
    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling mass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// vLLM extension, ignored by services that do not know it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    /// Always true for this engine
    pub stream: bool,
}

impl ChatRequest {
    /// Create a new streaming chat request
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: Vec::new(),
            frequency_penalty: None,
            presence_penalty: None,
            repetition_penalty: None,
            stream: true,
        }
    }

    /// Copy every sampling parameter from a generation profile
    pub fn with_profile(mut self, profile: &GenerationProfile) -> Self {
        self.temperature = Some(profile.temperature);
        self.top_p = Some(profile.top_p);
        self.max_tokens = Some(profile.max_tokens);
        self.stop = profile.stop.clone();
        self.frequency_penalty = profile.frequency_penalty;
        self.presence_penalty = profile.presence_penalty;
        self.repetition_penalty = profile.repetition_penalty;
        self
    }

    /// Set the output token budget
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Concatenated content of every user message, handy for logging and mocks
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Content of the last message, which carries the live batch
    pub fn last_content(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or("")
    }
}

/// One incremental piece of a streamed reply
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// Text fragment, possibly empty on the final chunk
    pub delta: String,
    /// Finish reason reported by the service (`stop`, `length`, ...)
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self { delta: delta.into(), finish_reason: None }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self { delta: String::new(), finish_reason: Some(reason.into()) }
    }
}

/// Fragment stream returned by a provider
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Common trait for completion services
///
/// Errors returned from `stream_chat` happen before the first fragment
/// (HTTP status, connection); errors inside the stream are mid-response.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Start a streamed chat completion
    async fn stream_chat(&self, request: ChatRequest) -> Result<CompletionStream, ProviderError>;

    /// Test the connection to the provider
    async fn test_connection(&self) -> Result<(), ProviderError>;

    /// Short name used in logs and usage summaries
    fn name(&self) -> &str;
}

pub mod mock;
pub mod openai;
