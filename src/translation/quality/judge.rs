/*!
 * Judge tier of the quality gate.
 *
 * The model itself rates translations. Calls are kept few by bisection:
 * one GOOD/BAD verdict for the whole range first, halves of a rejected range
 * next, and a single per-line verdict request once a range is no longer
 * than the configured minimum. A call that fails or cannot be parsed counts
 * as BAD for every line it covered.
 */

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use crate::errors::TranslationError;
use crate::translation::align::strip_reasoning;
use crate::translation::core::{CallSite, ServiceSession};
use crate::translation::profiles::ProfileKind;
use crate::translation::prompts::PromptBuilder;

use super::Verdict;

static LINE_VERDICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\**\s*(\d+)\s*[.．:：、)]\s*\**\s*(GOOD|BAD)")
        .expect("valid line verdict regex")
});

static VERDICT_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"NOT\s*GOOD|NO\s+GOOD|GOOD|BAD").expect("valid verdict word regex"));

/// Last GOOD or BAD in a reply; a negated GOOD counts as BAD, and so does no verdict.
pub fn parse_verdict(reply: &str) -> Verdict {
    let text = strip_reasoning(reply).to_uppercase();
    match VERDICT_WORD.find_iter(&text).last() {
        Some(m) if m.as_str() == "GOOD" => Verdict::Good,
        _ => Verdict::Bad,
    }
}

/// `N. GOOD|BAD` lines for pairs `1..=count`; numbers not answered are BAD.
pub fn parse_line_verdicts(reply: &str, count: usize) -> Vec<Verdict> {
    let text = strip_reasoning(reply).to_uppercase();
    let mut found: HashMap<usize, Verdict> = HashMap::new();
    for caps in LINE_VERDICT.captures_iter(&text) {
        let Ok(number) = caps[1].parse::<usize>() else {
            continue;
        };
        let verdict = if &caps[2] == "GOOD" { Verdict::Good } else { Verdict::Bad };
        found.insert(number, verdict);
    }
    (1..=count)
        .map(|n| found.get(&n).copied().unwrap_or(Verdict::Bad))
        .collect()
}

/// Something that can render verdicts on source/target pairs
#[async_trait]
pub trait JudgeBackend: Send + Sync + std::fmt::Debug {
    /// One verdict for all pairs
    async fn judge_block(&self, site: CallSite<'_>, pairs: &[(&str, &str)]) -> Result<Verdict, TranslationError>;

    /// One verdict per pair, in order
    async fn judge_lines(&self, site: CallSite<'_>, pairs: &[(&str, &str)]) -> Result<Vec<Verdict>, TranslationError>;
}

/// Judge backed by the completion service with the quality-check profile
#[derive(Debug)]
pub struct ModelJudge {
    session: Arc<ServiceSession>,
    prompts: Arc<PromptBuilder>,
}

impl ModelJudge {
    pub fn new(session: Arc<ServiceSession>, prompts: Arc<PromptBuilder>) -> Self {
        Self { session, prompts }
    }
}

#[async_trait]
impl JudgeBackend for ModelJudge {
    async fn judge_block(&self, site: CallSite<'_>, pairs: &[(&str, &str)]) -> Result<Verdict, TranslationError> {
        let messages = self.prompts.judge_block(pairs);
        let outcome = self
            .session
            .run(ProfileKind::QualityCheck, messages, site, 1)
            .await?;
        Ok(parse_verdict(&outcome.text))
    }

    async fn judge_lines(&self, site: CallSite<'_>, pairs: &[(&str, &str)]) -> Result<Vec<Verdict>, TranslationError> {
        let messages = self.prompts.judge_lines(pairs);
        let outcome = self
            .session
            .run(ProfileKind::QualityCheck, messages, site, 1)
            .await?;
        Ok(parse_line_verdicts(&outcome.text, pairs.len()))
    }
}

/// Verdicts from bisection escalation, with the number of judge calls made
#[derive(Debug, Clone, PartialEq)]
pub struct BisectionResult {
    pub verdicts: Vec<Verdict>,
    pub calls: usize,
}

/// Classify every pair with as few judge calls as bisection allows.
pub async fn bisect(
    judge: &dyn JudgeBackend,
    site: CallSite<'_>,
    pairs: &[(&str, &str)],
    min_batch: usize,
) -> BisectionResult {
    let min_batch = min_batch.max(1);
    let mut verdicts = vec![Verdict::Bad; pairs.len()];
    let mut calls = 0;
    let mut pending: Vec<Range<usize>> = vec![0..pairs.len()];

    while let Some(range) = pending.pop() {
        if range.is_empty() {
            continue;
        }

        calls += 1;
        let block = judge
            .judge_block(site, &pairs[range.clone()])
            .await
            .unwrap_or_else(|e| {
                warn!("{} judge call failed for {:?}: {}", site.label, range, e);
                Verdict::Bad
            });
        if block == Verdict::Good {
            verdicts[range].fill(Verdict::Good);
            continue;
        }

        if range.len() > min_batch {
            let mid = range.start + range.len() / 2;
            debug!("{} judge rejected {:?}, bisecting", site.label, range);
            // pushed in reverse so the first half is judged first
            pending.push(mid..range.end);
            pending.push(range.start..mid);
            continue;
        }

        calls += 1;
        match judge.judge_lines(site, &pairs[range.clone()]).await {
            Ok(lines) => {
                for (slot, verdict) in verdicts[range.clone()].iter_mut().zip(lines) {
                    *slot = verdict;
                }
            }
            Err(e) => {
                warn!("{} per-line judge call failed for {:?}: {}", site.label, range, e);
            }
        }
    }

    BisectionResult { verdicts, calls }
}
