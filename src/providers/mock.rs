/*!
 * Mock provider implementations for testing.
 *
 * `MockProvider` speaks the same streaming protocol as a real service and
 * simulates different behaviors:
 * - `MockProvider::working()` - echoes every numbered line as a translation
 * - `MockProvider::intermittent(n)` - fails every nth request
 * - `MockProvider::failing()` / `unreachable()` - always errors
 * - `MockProvider::repeating(..)` - emits the same fragment over and over
 * - `MockProvider::scripted(..)` - replays canned replies in order
 *
 * Every request is counted and recorded so tests can inspect prompts.
 */

use async_trait::async_trait;
use futures::stream;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::ProviderError;
use crate::providers::{ChatRequest, CompletionStream, Provider, StreamChunk};
use crate::translation::prompts::templates::{JUDGE_HEADER, REVISION_HEADER, SOURCE_LABEL, TARGET_LABEL};
use crate::translation::quality::rules::contains_kana;

static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.\s(.*)$").expect("valid numbered line regex"));

/// Characters per streamed fragment
const FRAGMENT_CHARS: usize = 3;

/// Reply generator for custom behavior
pub type Responder = dyn Fn(&ChatRequest) -> String + Send + Sync;

/// Behavior mode for the mock provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a well-formed reply
    Working,
    /// Fails intermittently (every Nth request) with a 503
    Intermittent { fail_every: usize },
    /// Always fails with a 500
    Failing,
    /// Connection refused
    Unreachable,
    /// Stream ends without any text
    Empty,
    /// Only the first half of the lines, cut off by the length limit
    Truncated,
    /// Simulates slow response (for timeout testing)
    Slow { delay_ms: u64 },
    /// Emits `fragment` `times` times, as a looping model does
    Repeating { fragment: &'static str, times: usize },
    /// Rejects every prompt as too long
    ContextOverflow,
}

/// Mock provider for testing translation behavior
pub struct MockProvider {
    behavior: MockBehavior,
    /// Request counter, shared between clones
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    responder: Option<Arc<Responder>>,
    end_marker: String,
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            responder: None,
            end_marker: "[翻译完成]".to_string(),
        }
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every: fail_every.max(1) })
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn unreachable() -> Self {
        Self::new(MockBehavior::Unreachable)
    }

    pub fn empty() -> Self {
        Self::new(MockBehavior::Empty)
    }

    pub fn truncated() -> Self {
        Self::new(MockBehavior::Truncated)
    }

    pub fn repeating(fragment: &'static str, times: usize) -> Self {
        Self::new(MockBehavior::Repeating { fragment, times })
    }

    pub fn context_overflow() -> Self {
        Self::new(MockBehavior::ContextOverflow)
    }

    /// Replay `replies` in order, then behave like `working()`
    pub fn scripted(replies: Vec<String>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::working().with_responder(Arc::new(move |request: &ChatRequest| {
            queue.lock().pop_front().unwrap_or_else(|| working_reply(request, "[翻译完成]"))
        }))
    }

    /// Replace the working reply with a custom generator
    pub fn with_responder(mut self, responder: Arc<Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Marker appended to translation replies
    pub fn with_end_marker(mut self, end_marker: impl Into<String>) -> Self {
        self.end_marker = end_marker.into();
        self
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    fn reply(&self, request: &ChatRequest) -> String {
        match &self.responder {
            Some(responder) => responder(request),
            None => working_reply(request, &self.end_marker),
        }
    }
}

impl Clone for MockProvider {
    fn clone(&self) -> Self {
        Self {
            behavior: self.behavior,
            request_count: Arc::clone(&self.request_count),
            requests: Arc::clone(&self.requests),
            responder: self.responder.clone(),
            end_marker: self.end_marker.clone(),
        }
    }
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("behavior", &self.behavior)
            .field("request_count", &self.request_count())
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

/// Replace source-script kana so revised lines read as translated
fn sinicize(text: &str) -> String {
    text.chars()
        .map(|c| if contains_kana(c.encode_utf8(&mut [0; 4])) { '文' } else { c })
        .collect()
}

/// The reply a cooperative model would give to this request
pub fn working_reply(request: &ChatRequest, end_marker: &str) -> String {
    let live = request.last_content();
    let numbered = live
        .lines()
        .filter_map(|line| NUMBERED.captures(line))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()));

    if live.starts_with(JUDGE_HEADER) {
        let target_prefix = format!("{}: ", TARGET_LABEL);
        let mut reply: Vec<String> = numbered
            .filter(|(_, text)| text.starts_with(&target_prefix))
            .map(|(n, _)| format!("{}. GOOD", n))
            .collect();
        reply.push("GOOD".to_string());
        reply.push("[检查完成]".to_string());
        return reply.join("\n");
    }

    let mut reply: Vec<String> = if live.starts_with(REVISION_HEADER) {
        let source_prefix = format!("{}: ", SOURCE_LABEL);
        numbered
            .filter_map(|(n, text)| {
                text.strip_prefix(&source_prefix)
                    .map(|source| format!("{}. 润色{}", n, sinicize(source)))
            })
            .collect()
    } else {
        numbered.map(|(n, text)| format!("{}. 译{}", n, text)).collect()
    };
    reply.push(end_marker.to_string());
    reply.join("\n")
}

fn fragments(text: &str, finish_reason: &str) -> Vec<Result<StreamChunk, ProviderError>> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks: Vec<Result<StreamChunk, ProviderError>> = chars
        .chunks(FRAGMENT_CHARS)
        .map(|piece| Ok(StreamChunk::text(piece.iter().collect::<String>())))
        .collect();
    chunks.push(Ok(StreamChunk::finish(finish_reason)));
    chunks
}

fn into_stream(chunks: Vec<Result<StreamChunk, ProviderError>>) -> CompletionStream {
    Box::pin(stream::iter(chunks))
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream_chat(&self, request: ChatRequest) -> Result<CompletionStream, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        match self.behavior {
            MockBehavior::Working => Ok(into_stream(fragments(&self.reply(&request), "stop"))),

            MockBehavior::Intermittent { fail_every } => {
                if count % fail_every == fail_every - 1 {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated intermittent failure (request #{})", count + 1),
                        status_code: 503,
                    })
                } else {
                    Ok(into_stream(fragments(&self.reply(&request), "stop")))
                }
            }

            MockBehavior::Failing => Err(ProviderError::ApiError {
                message: "Simulated provider failure".to_string(),
                status_code: 500,
            }),

            MockBehavior::Unreachable => Err(ProviderError::ConnectionError(
                "Simulated connection refused".to_string(),
            )),

            MockBehavior::Empty => Ok(into_stream(vec![Ok(StreamChunk::finish("stop"))])),

            MockBehavior::Truncated => {
                let reply = self.reply(&request);
                let lines: Vec<&str> = reply.lines().collect();
                let kept = lines[..lines.len() / 2].join("\n");
                Ok(into_stream(fragments(&kept, "length")))
            }

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                Ok(into_stream(fragments(&self.reply(&request), "stop")))
            }

            MockBehavior::Repeating { fragment, times } => {
                let mut chunks: Vec<Result<StreamChunk, ProviderError>> =
                    (0..times).map(|_| Ok(StreamChunk::text(fragment))).collect();
                chunks.push(Ok(StreamChunk::finish("length")));
                Ok(into_stream(chunks))
            }

            MockBehavior::ContextOverflow => Err(ProviderError::ContextOverflow(
                "This model's maximum context length is 32768 tokens".to_string(),
            )),
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        match self.behavior {
            MockBehavior::Unreachable => Err(ProviderError::ConnectionError(
                "Simulated connection refused".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
