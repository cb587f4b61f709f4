/*!
 * Core translation engine.
 *
 * `ServiceSession` owns everything needed to put one request on the wire:
 * the streaming client, the model name, the resolved profiles, the token
 * budget, usage accounting and the audit log. `TranslationEngine` runs one
 * attempt for a batch on top of it:
 *
 * prompt → token budget → stream → clean → align → map → quality gate
 *
 * An attempt either yields exactly one output line per source line or a
 * `TranslationError` the batch orchestrator knows how to react to.
 */

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app_config::Config;
use crate::errors::TranslationError;
use crate::providers::{ChatMessage, ChatRequest, Provider};
use crate::translation::align::{
    align, extract_clean_translation, map_to_batch_indices, AlignStrategy, BatchMapping,
    DEFAULT_REPLY_MARKERS,
};
use crate::translation::audit::{AuditEntry, AuditLog};
use crate::translation::batch::{BatchRequest, BatchResult, BatchTranslator};
use crate::translation::profiles::{ProfileKind, ProfileSet};
use crate::translation::prompts::{PromptAssets, PromptBuilder, RevisionItem};
use crate::translation::quality::judge::{JudgeBackend, ModelJudge};
use crate::translation::quality::{JudgeMode, QualityGate};
use crate::translation::stream::{StreamOutcome, StreamingClient, TerminationReason};

/// Tokens kept free between the prompt and the output budget
pub const CONTEXT_SAFETY_MARGIN: usize = 512;

/// Output budgets below this (or the profile cap, if smaller) are not worth sending
pub const MIN_OUTPUT_TOKENS: usize = 1024;

fn is_dense_char(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'   // CJK punctuation
        | '\u{3040}'..='\u{30FF}' // kana
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF00}'..='\u{FFEF}' // full-width forms
        | '\u{AC00}'..='\u{D7AF}'
    )
}

/// Rough token count: one per CJK or kana character, one per four others.
pub fn estimate_tokens(text: &str) -> usize {
    let (dense, other) = text.chars().fold((0usize, 0usize), |(dense, other), c| {
        if is_dense_char(c) { (dense + 1, other) } else { (dense, other + 1) }
    });
    dense + other.div_ceil(4)
}

/// Estimated prompt size of a conversation, with a small per-message overhead
pub fn estimate_messages(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content) + 4)
        .sum()
}

/// Context window assumed for a model when none is configured
pub fn context_length_for_model(model: &str) -> usize {
    if model.contains("32B") && !model.contains("AWQ") {
        32768
    } else {
        40960
    }
}

/// Output budget for a request, or `ContextOverflow` when the prompt leaves too little room.
pub fn budget_max_tokens(
    cap: u32,
    context_length: usize,
    prompt_tokens: usize,
) -> Result<u32, TranslationError> {
    let cap = cap as usize;
    let available = context_length.saturating_sub(prompt_tokens + CONTEXT_SAFETY_MARGIN);
    let budget = cap.min(available);
    let floor = MIN_OUTPUT_TOKENS.min(cap);

    if budget < floor {
        return Err(TranslationError::ContextOverflow(format!(
            "prompt of ~{} tokens leaves {} of {} context tokens for output",
            prompt_tokens, available, context_length
        )));
    }
    Ok(budget as u32)
}

/// Token usage statistics for tracking API consumption
///
/// Streaming endpoints rarely report usage, so every figure here is an estimate.
#[derive(Clone, Debug)]
pub struct TokenUsageStats {
    /// Estimated prompt tokens
    pub prompt_tokens: u64,

    /// Estimated completion tokens
    pub completion_tokens: u64,

    /// Sum of both
    pub total_tokens: u64,

    /// Requests that reached the service
    pub requests: u64,

    /// Start time of token tracking
    pub start_time: Instant,

    /// Total time spent streaming
    pub api_duration: Duration,

    /// Provider name
    pub provider: String,

    /// Model name
    pub model: String,
}

impl Default for TokenUsageStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenUsageStats {
    /// Create a new empty token usage stats instance
    pub fn new() -> Self {
        Self::with_provider_info(String::new(), String::new())
    }

    /// Create new token usage stats with provider info
    pub fn with_provider_info(provider: String, model: String) -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            requests: 0,
            start_time: Instant::now(),
            api_duration: Duration::from_secs(0),
            provider,
            model,
        }
    }

    /// Account for one completed request
    pub fn record(&mut self, prompt_tokens: usize, completion_tokens: usize, duration: Duration) {
        self.prompt_tokens += prompt_tokens as u64;
        self.completion_tokens += completion_tokens as u64;
        self.total_tokens += (prompt_tokens + completion_tokens) as u64;
        self.requests += 1;
        self.api_duration += duration;
    }

    /// Usage accumulated after `earlier` was taken
    pub fn since(&self, earlier: &TokenUsageStats) -> TokenUsageStats {
        Self {
            prompt_tokens: self.prompt_tokens.saturating_sub(earlier.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_sub(earlier.completion_tokens),
            total_tokens: self.total_tokens.saturating_sub(earlier.total_tokens),
            requests: self.requests.saturating_sub(earlier.requests),
            start_time: self.start_time,
            api_duration: self.api_duration.saturating_sub(earlier.api_duration),
            provider: self.provider.clone(),
            model: self.model.clone(),
        }
    }

    /// Calculate tokens per minute rate
    pub fn tokens_per_minute(&self) -> f64 {
        // API time when we have it, wall time otherwise
        let duration_minutes = if self.api_duration.as_secs_f64() > 0.0 {
            self.api_duration.as_secs_f64() / 60.0
        } else {
            self.start_time.elapsed().as_secs_f64() / 60.0
        };

        if duration_minutes > 0.0 {
            self.total_tokens as f64 / duration_minutes
        } else {
            0.0
        }
    }

    /// Generate a summary of token usage
    pub fn summary(&self) -> String {
        let elapsed_minutes = self.start_time.elapsed().as_secs_f64() / 60.0;
        let api_minutes = self.api_duration.as_secs_f64() / 60.0;

        format!(
            "Token Usage Summary (estimated):\n\
             Provider: {}\n\
             Model: {}\n\
             Requests: {}\n\
             Prompt tokens: {}\n\
             Completion tokens: {}\n\
             Total tokens: {}\n\
             Elapsed time: {:.2} minutes\n\
             API request time: {:.2} minutes\n\
             Tokens per minute: {:.2}",
            self.provider,
            self.model,
            self.requests,
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens,
            elapsed_minutes,
            api_minutes,
            self.tokens_per_minute()
        )
    }
}

/// Where a request comes from, for logs and the audit trail
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    /// Document stem
    pub document: &'a str,
    /// Human-readable batch label, also the stream log prefix
    pub label: &'a str,
}

impl<'a> CallSite<'a> {
    pub fn new(document: &'a str, label: &'a str) -> Self {
        Self { document, label }
    }
}

/// One service connection with its profiles, budget and accounting
#[derive(Debug)]
pub struct ServiceSession {
    client: StreamingClient,
    model: String,
    context_length: usize,
    profiles: ProfileSet,
    audit: Option<AuditLog>,
    usage: Mutex<TokenUsageStats>,
}

impl ServiceSession {
    pub fn new(
        client: StreamingClient,
        model: impl Into<String>,
        context_length: usize,
        profiles: ProfileSet,
        audit: Option<AuditLog>,
    ) -> Self {
        let model = model.into();
        let usage = TokenUsageStats::with_provider_info(
            client.provider_name().to_string(),
            model.clone(),
        );
        Self {
            client,
            model,
            context_length,
            profiles,
            audit,
            usage: Mutex::new(usage),
        }
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn usage(&self) -> TokenUsageStats {
        self.usage.lock().clone()
    }

    /// Send one conversation with the given profile and stream the reply.
    ///
    /// Guard cutoffs come back as an `Ok` outcome; only a request that
    /// produced nothing usable is an error.
    pub async fn run(
        &self,
        kind: ProfileKind,
        messages: Vec<ChatMessage>,
        site: CallSite<'_>,
        start_line: usize,
    ) -> Result<StreamOutcome, TranslationError> {
        let profile = self.profiles.get(kind);
        let prompt_tokens = estimate_messages(&messages);
        let max_tokens = budget_max_tokens(profile.max_tokens, self.context_length, prompt_tokens)?;

        let request = ChatRequest::new(&self.model, messages)
            .with_profile(profile)
            .max_tokens(max_tokens);
        let recorded = self.audit.as_ref().map(|_| request.messages.clone());

        let outcome = match self.client.complete(request, profile, site.label).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let (Some(audit), Some(messages)) = (&self.audit, &recorded) {
                    audit.record(&AuditEntry {
                        document: site.document,
                        label: site.label,
                        profile: kind.as_str(),
                        start_line,
                        messages,
                        reply: "",
                        termination: None,
                        error: Some(&e.to_string()),
                        prompt_tokens,
                        completion_tokens: 0,
                        elapsed_ms: 0,
                    });
                }
                return Err(e.into());
            }
        };

        let completion_tokens = outcome.estimated_tokens();
        self.usage
            .lock()
            .record(prompt_tokens, completion_tokens, outcome.elapsed);

        if let (Some(audit), Some(messages)) = (&self.audit, &recorded) {
            audit.record(&AuditEntry {
                document: site.document,
                label: site.label,
                profile: kind.as_str(),
                start_line,
                messages,
                reply: &outcome.text,
                termination: Some(outcome.reason),
                error: outcome.error.as_deref(),
                prompt_tokens,
                completion_tokens,
                elapsed_ms: outcome.elapsed.as_millis() as u64,
            });
        }

        debug!(
            "{} {} reply: ~{} tokens in {:.1}s ({})",
            site.label,
            kind.as_str(),
            completion_tokens,
            outcome.elapsed.as_secs_f64(),
            outcome.reason
        );

        if outcome.reason == TerminationReason::Error && outcome.text.trim().is_empty() {
            return Err(TranslationError::TransientService(
                outcome.error.clone().unwrap_or_else(|| "empty stream".to_string()),
            ));
        }
        Ok(outcome)
    }
}

/// What a batch of lines is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Body text, carrying the previous exchange
    Body,
    /// Front-matter values
    FrontMatter,
}

impl JobKind {
    fn profile(self) -> ProfileKind {
        match self {
            Self::Body => ProfileKind::Translation,
            Self::FrontMatter => ProfileKind::FrontMatter,
        }
    }
}

/// Split a line into its leading whitespace and the rest
pub fn split_indent(line: &str) -> (&str, &str) {
    let body = line.trim_start();
    (&line[..line.len() - body.len()], body)
}

/// Runs single translation attempts against one service session
#[derive(Debug)]
pub struct TranslationEngine {
    session: Arc<ServiceSession>,
    prompts: Arc<PromptBuilder>,
    gate: QualityGate,
    reply_markers: Vec<String>,
}

impl TranslationEngine {
    pub fn new(session: Arc<ServiceSession>, prompts: Arc<PromptBuilder>, gate: QualityGate) -> Self {
        let mut reply_markers: Vec<String> =
            DEFAULT_REPLY_MARKERS.iter().map(|m| m.to_string()).collect();
        let end_marker = prompts.end_marker().to_string();
        if !end_marker.is_empty() && !reply_markers.contains(&end_marker) {
            reply_markers.push(end_marker);
        }
        Self {
            session,
            prompts,
            gate,
            reply_markers,
        }
    }

    /// Wire up a complete engine from the application configuration
    pub fn from_config(config: &Config, provider: Arc<dyn Provider>) -> Result<Self> {
        let settings = &config.translation;
        let profiles = ProfileSet::load(
            &settings.end_marker,
            &config.quality.judge_end_marker,
            settings.profiles_file.as_deref().map(Path::new),
        )?;
        let audit = AuditLog::open(&settings.log_dir)?;
        let client = StreamingClient::new(provider, config.stream.clone());
        let session = Arc::new(ServiceSession::new(
            client,
            config.service.model.clone(),
            config.service.context_length(),
            profiles,
            audit,
        ));

        let assets = PromptAssets::load(
            settings.preface_file.as_deref().map(Path::new),
            settings.terminology_file.as_deref().map(Path::new),
            settings.sample_file.as_deref().map(Path::new),
        )?;
        let prompts = Arc::new(PromptBuilder::new(
            assets,
            &config.source_language,
            &config.target_language,
            &settings.end_marker,
            &config.quality.judge_end_marker,
        ));

        let judge: Option<Arc<dyn JudgeBackend>> = match config.quality.judge_mode {
            JudgeMode::Disabled => None,
            _ => Some(Arc::new(ModelJudge::new(Arc::clone(&session), Arc::clone(&prompts)))),
        };
        let gate = QualityGate::new(config.quality.clone(), judge);

        Ok(Self::new(session, prompts, gate))
    }

    pub fn session(&self) -> &ServiceSession {
        &self.session
    }

    pub fn usage(&self) -> TokenUsageStats {
        self.session.usage()
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// A `BatchTranslator` view of this engine for the given kind of lines
    pub fn translator(&self, kind: JobKind) -> EngineTranslator<'_> {
        EngineTranslator { engine: self, kind }
    }

    /// One attempt at translating a batch of lines.
    pub async fn translate_lines(
        &self,
        kind: JobKind,
        request: &BatchRequest<'_>,
    ) -> Result<BatchResult, TranslationError> {
        let (indents, bodies): (Vec<&str>, Vec<String>) = request
            .lines
            .iter()
            .map(|line| {
                let (indent, body) = split_indent(line);
                (indent, body.to_string())
            })
            .unzip();
        let before: Vec<String> = request.context_before.iter().map(|l| l.trim().to_string()).collect();
        let after: Vec<String> = request.context_after.iter().map(|l| l.trim().to_string()).collect();
        let previous = match kind {
            JobKind::Body => request.previous,
            JobKind::FrontMatter => None,
        };

        let prompt = self
            .prompts
            .translation(kind, &bodies, &before, &after, previous);
        let outcome = self
            .session
            .run(kind.profile(), prompt.messages, request.site, prompt.start_line)
            .await?;

        let (mapping, strategy) = self.realign(&outcome.text, &bodies, prompt.start_line)?;
        let verdicts = self
            .gate
            .evaluate(request.site, &bodies, &mapping.lines, &mapping.missing)
            .await;
        if verdicts.needs_retranslation() {
            return Err(TranslationError::QualityRejected {
                rejected: verdicts.rejected(),
                total: bodies.len(),
            });
        }

        let lines = indents
            .iter()
            .zip(mapping.lines)
            .map(|(indent, text)| format!("{}{}", indent, text))
            .collect();

        Ok(BatchResult {
            lines,
            strategy,
            judge_calls: verdicts.judge_calls,
            termination: outcome.reason,
        })
    }

    /// One attempt at revising drafts. Only the rule tier checks the result.
    pub async fn revise_lines(
        &self,
        site: CallSite<'_>,
        items: &[RevisionItem<'_>],
    ) -> Result<BatchResult, TranslationError> {
        let prompt = self.prompts.enhancement(items);
        let outcome = self
            .session
            .run(ProfileKind::Enhancement, prompt.messages, site, prompt.start_line)
            .await?;

        let drafts: Vec<String> = items.iter().map(|item| item.draft.trim().to_string()).collect();
        let (mapping, strategy) = self.realign(&outcome.text, &drafts, prompt.start_line)?;

        let sources: Vec<String> = items.iter().map(|item| item.source.trim().to_string()).collect();
        let verdicts = self.gate.evaluate_rules(&sources, &mapping.lines, &mapping.missing);
        if verdicts.needs_retranslation() {
            return Err(TranslationError::QualityRejected {
                rejected: verdicts.rejected(),
                total: items.len(),
            });
        }

        Ok(BatchResult {
            lines: mapping.lines,
            strategy,
            judge_calls: 0,
            termination: outcome.reason,
        })
    }

    fn realign(
        &self,
        raw: &str,
        originals: &[String],
        start_line: usize,
    ) -> Result<(BatchMapping, AlignStrategy), TranslationError> {
        let markers: Vec<&str> = self.reply_markers.iter().map(String::as_str).collect();
        let cleaned = extract_clean_translation(raw, &markers);
        let alignment = align(&cleaned, originals.len(), start_line);
        if alignment.is_empty() {
            warn!(
                "Reply could not be aligned to lines {}..{}",
                start_line,
                start_line + originals.len()
            );
            return Err(TranslationError::AlignmentAmbiguity {
                expected: originals.len(),
            });
        }
        Ok((map_to_batch_indices(&alignment, originals), alignment.strategy))
    }
}

/// Borrowed engine bound to one kind of job
#[derive(Debug, Clone, Copy)]
pub struct EngineTranslator<'a> {
    engine: &'a TranslationEngine,
    kind: JobKind,
}

#[async_trait]
impl BatchTranslator for EngineTranslator<'_> {
    async fn translate_batch(&self, request: &BatchRequest<'_>) -> Result<BatchResult, TranslationError> {
        self.engine.translate_lines(self.kind, request).await
    }
}
