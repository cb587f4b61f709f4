/*!
 * Streaming client.
 *
 * Consumes a completion fragment by fragment and stops early when the reply
 * degenerates or stalls:
 * - short repetition: the same one-character fragment emitted too many times in a row
 * - long repetition: the last `window` characters equal the two windows before them
 * - watchdog: no end of stream within the profile's time bound
 * - sentinel: the profile's end-of-batch marker showed up
 *
 * None of these are errors. Whatever text arrived before the cutoff is handed
 * on together with the `TerminationReason`; retries belong to the caller.
 */

use futures::StreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::ProviderError;
use crate::providers::{ChatRequest, CompletionStream, Provider};
use crate::translation::core::estimate_tokens;
use crate::translation::profiles::GenerationProfile;

/// Thresholds for the stream guards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamGuardConfig {
    /// Consecutive identical one-character fragments tolerated
    #[serde(default = "default_short_repeat_limit")]
    pub short_repeat_limit: usize,

    /// Window length in characters for the long repetition check, 0 disables it
    #[serde(default = "default_long_repeat_window")]
    pub long_repeat_window: usize,

    /// Log a partial line once it grows past this many characters
    #[serde(default = "default_line_flush_chars")]
    pub line_flush_chars: usize,
}

impl Default for StreamGuardConfig {
    fn default() -> Self {
        Self {
            short_repeat_limit: default_short_repeat_limit(),
            long_repeat_window: default_long_repeat_window(),
            line_flush_chars: default_line_flush_chars(),
        }
    }
}

fn default_short_repeat_limit() -> usize {
    40
}

fn default_long_repeat_window() -> usize {
    120
}

fn default_line_flush_chars() -> usize {
    60
}

/// Why a stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    NaturalStop,
    LengthCutoff,
    Timeout,
    RepetitionGuard,
    SentinelMatch,
    Error,
}

impl TerminationReason {
    /// The reply ended the way the model intended
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::NaturalStop | Self::SentinelMatch)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NaturalStop => "natural-stop",
            Self::LengthCutoff => "length-cutoff",
            Self::Timeout => "timeout",
            Self::RepetitionGuard => "repetition-guard",
            Self::SentinelMatch => "sentinel-match",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Text accumulated from one stream and how it ended
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub text: String,
    pub reason: TerminationReason,
    /// Mid-stream error message when `reason` is `Error`
    pub error: Option<String>,
    /// Number of non-empty fragments kept
    pub fragments: usize,
    pub elapsed: Duration,
}

impl StreamOutcome {
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Short repetition guard: counts consecutive identical tiny fragments.
#[derive(Debug)]
pub struct RepetitionGuard {
    limit: usize,
    last_fragment: String,
    repeat_count: usize,
}

impl RepetitionGuard {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            last_fragment: String::new(),
            repeat_count: 0,
        }
    }

    /// Returns false when `fragment` would push a run past the limit.
    /// A rejected fragment must not be appended.
    pub fn admit(&mut self, fragment: &str) -> bool {
        if fragment == self.last_fragment && fragment.trim().chars().count() <= 1 {
            self.repeat_count += 1;
        } else {
            self.last_fragment.clear();
            self.last_fragment.push_str(fragment);
            self.repeat_count = 1;
        }
        self.repeat_count <= self.limit
    }
}

/// Long repetition check: the last `window` characters equal both preceding windows.
pub fn has_tail_loop(text: &str, window: usize) -> bool {
    if window == 0 {
        return false;
    }
    let tail: Vec<char> = text.chars().rev().take(window * 3).collect();
    if tail.len() < window * 3 {
        return false;
    }
    let (last, rest) = tail.split_at(window);
    let (middle, first) = rest.split_at(window);
    last == middle && middle == first
}

fn tail_contains(text: &str, fresh_bytes: usize, needle: &str) -> bool {
    let mut start = text.len().saturating_sub(fresh_bytes + needle.len());
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    text[start..].contains(needle)
}

/// Accumulates fragments into lines for the log sink
struct LineBuffer<'a> {
    prefix: &'a str,
    flush_chars: usize,
    line: String,
    chars: usize,
}

impl<'a> LineBuffer<'a> {
    fn new(prefix: &'a str, flush_chars: usize) -> Self {
        Self {
            prefix,
            flush_chars: flush_chars.max(1),
            line: String::new(),
            chars: 0,
        }
    }

    fn push(&mut self, fragment: &str) {
        for ch in fragment.chars() {
            if ch == '\n' {
                self.flush();
                continue;
            }
            self.line.push(ch);
            self.chars += 1;
            if self.chars >= self.flush_chars {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        if !self.line.is_empty() {
            debug!("{} {}", self.prefix, self.line);
        }
        self.line.clear();
        self.chars = 0;
    }
}

/// Streams completions from a provider under the configured guards
#[derive(Debug, Clone)]
pub struct StreamingClient {
    provider: Arc<dyn Provider>,
    guards: StreamGuardConfig,
}

impl StreamingClient {
    pub fn new(provider: Arc<dyn Provider>, guards: StreamGuardConfig) -> Self {
        Self { provider, guards }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Send `request` and consume the reply.
    ///
    /// Errors are only returned when the service fails before streaming
    /// starts; anything later is folded into the outcome.
    pub async fn complete(
        &self,
        request: ChatRequest,
        profile: &GenerationProfile,
        log_prefix: &str,
    ) -> Result<StreamOutcome, ProviderError> {
        debug!(
            "{} sending {} messages to {} (max_tokens={:?}, profile={})",
            log_prefix,
            request.messages.len(),
            self.provider.name(),
            request.max_tokens,
            profile.kind
        );
        let started = Instant::now();
        let stream = self.provider.stream_chat(request).await?;
        Ok(consume_stream(stream, profile, &self.guards, log_prefix, started).await)
    }
}

/// Drain `stream` until it ends or a guard fires.
pub async fn consume_stream(
    mut stream: CompletionStream,
    profile: &GenerationProfile,
    guards: &StreamGuardConfig,
    log_prefix: &str,
    started: Instant,
) -> StreamOutcome {
    let watchdog = (profile.watchdog_secs > 0).then(|| Duration::from_secs(profile.watchdog_secs));
    let mut deadline = watchdog.map(|w| started + w);
    let mut guard = RepetitionGuard::new(guards.short_repeat_limit);
    let mut lines = LineBuffer::new(log_prefix, guards.line_flush_chars);

    let mut text = String::new();
    let mut fragments = 0usize;
    let mut error = None;
    let mut seen_first = false;

    let reason = loop {
        let next = match deadline {
            Some(at) => match tokio::time::timeout_at(at, stream.next()).await {
                Ok(next) => next,
                Err(_) => break TerminationReason::Timeout,
            },
            None => stream.next().await,
        };

        let chunk = match next {
            None => break TerminationReason::NaturalStop,
            Some(Err(e)) => {
                error = Some(e.to_string());
                break TerminationReason::Error;
            }
            Some(Ok(chunk)) => chunk,
        };

        if !chunk.delta.is_empty() {
            if !seen_first {
                seen_first = true;
                deadline = watchdog.map(|w| Instant::now() + w);
            }
            if profile.repeat_guard && !guard.admit(&chunk.delta) {
                break TerminationReason::RepetitionGuard;
            }

            text.push_str(&chunk.delta);
            fragments += 1;
            lines.push(&chunk.delta);

            if let Some(sentinel) = &profile.sentinel {
                if tail_contains(&text, chunk.delta.len(), sentinel) {
                    break TerminationReason::SentinelMatch;
                }
            }
            if profile.repeat_guard && has_tail_loop(&text, guards.long_repeat_window) {
                break TerminationReason::RepetitionGuard;
            }
        }

        if let Some(finish) = chunk.finish_reason.as_deref() {
            break if finish == "length" {
                TerminationReason::LengthCutoff
            } else {
                TerminationReason::NaturalStop
            };
        }
    };
    lines.flush();

    match reason {
        TerminationReason::NaturalStop | TerminationReason::SentinelMatch => {
            debug!("{} stream ended: {} ({} fragments)", log_prefix, reason, fragments)
        }
        _ => warn!(
            "{} stream cut off: {} after {} fragments{}",
            log_prefix,
            reason,
            fragments,
            error.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default()
        ),
    }

    StreamOutcome {
        text,
        reason,
        error,
        fragments,
        elapsed: started.elapsed(),
    }
}
