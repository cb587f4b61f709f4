/*!
 * Batch orchestration.
 *
 * The orchestrator walks the pending lines of one job in source order and
 * decides, batch by batch, whether to accept, retry, shrink or give up:
 *
 * - A retryable service error is retried at the same size after a fixed delay.
 * - Any other failure halves the adaptive batch size and re-splits the same
 *   range into smaller batches.
 * - A single line that still fails gets the configured fallback text.
 *
 * Every step consumes at least one line or shrinks the batch size, so a job
 * always finishes.
 */

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::Range;
use std::time::Duration;

use crate::errors::{TranslationError, TranslationErrorKind};
use crate::translation::align::AlignStrategy;
use crate::translation::core::{split_indent, CallSite};
use crate::translation::stream::TerminationReason;

/// Everything a translator needs for one attempt
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub site: CallSite<'a>,
    /// Job-level indices of the lines
    pub positions: &'a [usize],
    pub lines: &'a [String],
    pub context_before: &'a [String],
    pub context_after: &'a [String],
    pub previous: Option<&'a PreviousExchange>,
}

/// A translated batch, one line per requested line
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub lines: Vec<String>,
    pub strategy: AlignStrategy,
    pub judge_calls: usize,
    pub termination: TerminationReason,
}

/// One attempt at a batch of lines
#[async_trait]
pub trait BatchTranslator: Send + Sync {
    async fn translate_batch(&self, request: &BatchRequest<'_>) -> Result<BatchResult, TranslationError>;
}

/// Inputs and outputs of the last accepted batch, replayed as context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviousExchange {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

fn unindented(lines: Vec<String>) -> Vec<String> {
    lines.iter().map(|line| split_indent(line).1.to_string()).collect()
}

impl PreviousExchange {
    /// Lines are kept without leading indentation, the way batches are sent
    pub fn new(inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            inputs: unindented(inputs),
            outputs: unindented(outputs),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Batch size that shrinks on failure and grows back on success
#[derive(Debug, Clone)]
pub struct AdaptiveBatchSize {
    original: usize,
    current: usize,
    streak: usize,
    grow_after: usize,
    degrade_factor: usize,
}

impl AdaptiveBatchSize {
    pub fn new(original: usize, grow_after: usize, degrade_factor: usize) -> Self {
        let original = original.max(1);
        Self {
            original,
            current: original,
            streak: 0,
            grow_after: grow_after.max(1),
            degrade_factor: degrade_factor.max(2),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn original(&self) -> usize {
        self.original
    }

    pub fn on_failure(&mut self) {
        self.current = (self.current / self.degrade_factor).max(1);
        self.streak = 0;
    }

    pub fn on_success(&mut self) {
        self.streak += 1;
        if self.streak >= self.grow_after {
            self.current = (self.current * 2).min(self.original);
            self.streak = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Attempting,
    Degrading,
    Accepted,
    Failed,
}

/// Record of one orchestrator step, kept for the document report
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// First job-level index of the batch
    pub start: usize,
    /// One past the last job-level index
    pub end: usize,
    pub state: BatchState,
    pub batch_size: usize,
    pub attempts: usize,
    pub error: Option<TranslationErrorKind>,
    pub strategy: Option<AlignStrategy>,
    pub judge_calls: usize,
}

/// What one orchestrator step did
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// Lines translated and accepted
    Accepted { positions: Vec<usize>, lines: Vec<String> },
    /// The batch failed and was split; nothing was produced
    Degraded { positions: Vec<usize>, new_size: usize },
    /// A single line gave up; `lines` holds the fallback text
    Failed { positions: Vec<usize>, lines: Vec<String> },
}

/// Text used for a line that could not be translated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureFallback {
    /// A literal marker
    Marker(String),
    /// The untranslated source line
    Source,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub batch_size: usize,
    pub context_lines: usize,
    pub retry_count: usize,
    pub retry_wait: Duration,
    pub carry_previous: bool,
    pub fallback: FailureFallback,
    pub grow_after: usize,
    pub degrade_factor: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            context_lines: 5,
            retry_count: 3,
            retry_wait: Duration::from_millis(2000),
            carry_previous: true,
            fallback: FailureFallback::Marker("[翻译未完成]".to_string()),
            grow_after: 1,
            degrade_factor: 2,
        }
    }
}

/// Drives one job's pending lines through a translator
pub struct BatchOrchestrator<'a, T: BatchTranslator + ?Sized> {
    translator: &'a T,
    lines: &'a [String],
    pending: Vec<usize>,
    /// Ranges over `pending`, front first
    queue: VecDeque<Range<usize>>,
    document: &'a str,
    settings: OrchestratorSettings,
    size: AdaptiveBatchSize,
    previous: Option<PreviousExchange>,
    outcomes: Vec<BatchOutcome>,
}

impl<'a, T: BatchTranslator + ?Sized> BatchOrchestrator<'a, T> {
    /// `lines` are all lines of the job; only `pending` indices are translated,
    /// the rest serve as context.
    pub fn new(
        translator: &'a T,
        lines: &'a [String],
        pending: Vec<usize>,
        document: &'a str,
        settings: OrchestratorSettings,
    ) -> Self {
        let mut queue = VecDeque::new();
        if !pending.is_empty() {
            queue.push_back(0..pending.len());
        }
        let size = AdaptiveBatchSize::new(settings.batch_size, settings.grow_after, settings.degrade_factor);
        Self {
            translator,
            lines,
            pending,
            queue,
            document,
            settings,
            size,
            previous: None,
            outcomes: Vec::new(),
        }
    }

    pub fn outcomes(&self) -> &[BatchOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<BatchOutcome> {
        self.outcomes
    }

    pub fn batch_size(&self) -> usize {
        self.size.current()
    }

    /// Lines not yet accepted or failed
    pub fn remaining(&self) -> usize {
        self.queue.iter().map(|r| r.len()).sum()
    }

    pub fn is_finished(&self) -> bool {
        self.queue.is_empty()
    }

    /// Process the next batch. `Ok(None)` once every pending line is done;
    /// `Err` only for a fatal error.
    pub async fn step(&mut self) -> Result<Option<StepEvent>, TranslationError> {
        let Some(range) = self.queue.pop_front() else {
            return Ok(None);
        };

        let take = self.size.current().min(range.len());
        let chunk = range.start..range.start + take;
        if chunk.end < range.end {
            self.queue.push_front(chunk.end..range.end);
        }

        let positions: Vec<usize> = self.pending[chunk.clone()].to_vec();
        let (first, last) = (positions[0], positions[positions.len() - 1]);
        let label = format!("[{} lines {}-{}]", self.document, first + 1, last + 1);
        let batch: Vec<String> = positions.iter().map(|&p| self.lines[p].clone()).collect();
        let context_before = &self.lines[first.saturating_sub(self.settings.context_lines)..first];
        let after_end = (last + 1 + self.settings.context_lines).min(self.lines.len());
        let context_after = &self.lines[(last + 1).min(after_end)..after_end];

        let request = BatchRequest {
            site: CallSite::new(self.document, &label),
            positions: &positions,
            lines: &batch,
            context_before,
            context_after,
            previous: if self.settings.carry_previous { self.previous.as_ref() } else { None },
        };

        let mut attempts = 0;
        let error = loop {
            attempts += 1;
            debug!("{} attempt {} at size {}", label, attempts, positions.len());

            match self.translator.translate_batch(&request).await {
                Ok(result) if result.lines.len() != positions.len() => {
                    break TranslationError::StructuralInvariantViolation {
                        expected: positions.len(),
                        actual: result.lines.len(),
                    };
                }
                Ok(result) => {
                    info!(
                        "{} accepted ({} lines, {} alignment, {} judge calls)",
                        label,
                        positions.len(),
                        result.strategy,
                        result.judge_calls
                    );
                    self.size.on_success();
                    self.outcomes.push(BatchOutcome {
                        start: first,
                        end: last + 1,
                        state: BatchState::Accepted,
                        batch_size: positions.len(),
                        attempts,
                        error: None,
                        strategy: Some(result.strategy),
                        judge_calls: result.judge_calls,
                    });
                    if self.settings.carry_previous {
                        self.previous = Some(PreviousExchange::new(batch.clone(), result.lines.clone()));
                    }
                    return Ok(Some(StepEvent::Accepted {
                        positions,
                        lines: result.lines,
                    }));
                }
                Err(e) if e.is_retryable() && attempts <= self.settings.retry_count => {
                    warn!(
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        label,
                        attempts,
                        self.settings.retry_count + 1,
                        e,
                        self.settings.retry_wait
                    );
                    tokio::time::sleep(self.settings.retry_wait).await;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => break e,
            }
        };

        if positions.len() > 1 {
            self.size.on_failure();
            let split = self.size.current().min(positions.len().div_ceil(2));
            warn!(
                "{} failed: {}; degrading to batch size {}",
                label,
                error,
                split
            );
            self.queue.push_front(chunk.start + split..chunk.end);
            self.queue.push_front(chunk.start..chunk.start + split);
            self.outcomes.push(BatchOutcome {
                start: first,
                end: last + 1,
                state: BatchState::Degrading,
                batch_size: positions.len(),
                attempts,
                error: Some(error.kind()),
                strategy: None,
                judge_calls: 0,
            });
            return Ok(Some(StepEvent::Degraded {
                positions,
                new_size: split,
            }));
        }

        warn!("{} gave up on single line: {}", label, error);
        let lines = match &self.settings.fallback {
            FailureFallback::Marker(marker) => vec![marker.clone()],
            FailureFallback::Source => batch,
        };
        self.outcomes.push(BatchOutcome {
            start: first,
            end: last + 1,
            state: BatchState::Failed,
            batch_size: 1,
            attempts,
            error: Some(error.kind()),
            strategy: None,
            judge_calls: 0,
        });
        Ok(Some(StepEvent::Failed { positions, lines }))
    }
}
