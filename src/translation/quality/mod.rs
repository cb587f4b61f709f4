/*!
 * Quality gate for translated batches.
 *
 * Two tiers decide whether a batch is accepted:
 * - **Rules**: cheap per-line heuristics (`rules`)
 * - **Judge**: model verdicts with bisection escalation (`judge`)
 *
 * `JudgeMode` chooses how they combine. In every mode a line whose source is
 * blank is GOOD, and a batch with any BAD line needs retranslation.
 */

pub mod judge;
pub mod rules;

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::translation::core::CallSite;

pub use judge::{bisect, BisectionResult, JudgeBackend, ModelJudge};
pub use rules::{RuleChecker, RuleIssue};

/// How the judge tier participates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JudgeMode {
    /// Rules only
    Disabled,
    /// Judge only the batches the rules reject
    #[default]
    Escalate,
    /// Judge every batch; rules still veto hard failures
    Primary,
}

impl std::str::FromStr for JudgeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "escalate" => Ok(Self::Escalate),
            "primary" => Ok(Self::Primary),
            _ => Err(anyhow::anyhow!("Invalid judge mode: {}", s)),
        }
    }
}

/// Thresholds of the rule tier and judge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    // @field: Lowest accepted target/source length ratio
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f32,

    // @field: Highest accepted target/source length ratio
    #[serde(default = "default_max_length_ratio")]
    pub max_length_ratio: f32,

    // @field: Longest accepted run of one character
    #[serde(default = "default_char_repeat_threshold")]
    pub char_repeat_threshold: usize,

    // @field: Segment length for repetition counting
    #[serde(default = "default_segment_length")]
    pub segment_length: usize,

    // @field: Most occurrences accepted for one segment
    #[serde(default = "default_segment_repeat_threshold")]
    pub segment_repeat_threshold: usize,

    // @field: Shorter targets skip the repetition checks
    #[serde(default = "default_min_repetition_check_chars")]
    pub min_repetition_check_chars: usize,

    // @field: Longest accepted stretch without punctuation
    #[serde(default = "default_max_unpunctuated_run")]
    pub max_unpunctuated_run: usize,

    // @field: Judge participation
    #[serde(default)]
    pub judge_mode: JudgeMode,

    // @field: Ranges this small get per-line verdicts
    #[serde(default = "default_judge_min_batch")]
    pub judge_min_batch: usize,

    // @field: Marker ending judge replies
    #[serde(default = "default_judge_end_marker")]
    pub judge_end_marker: String,
}

fn default_min_length_ratio() -> f32 {
    0.3
}

fn default_max_length_ratio() -> f32 {
    3.0
}

fn default_char_repeat_threshold() -> usize {
    12
}

fn default_segment_length() -> usize {
    15
}

fn default_segment_repeat_threshold() -> usize {
    5
}

fn default_min_repetition_check_chars() -> usize {
    10
}

fn default_max_unpunctuated_run() -> usize {
    80
}

fn default_judge_min_batch() -> usize {
    8
}

fn default_judge_end_marker() -> String {
    "[检查完成]".to_string()
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_length_ratio: default_min_length_ratio(),
            max_length_ratio: default_max_length_ratio(),
            char_repeat_threshold: default_char_repeat_threshold(),
            segment_length: default_segment_length(),
            segment_repeat_threshold: default_segment_repeat_threshold(),
            min_repetition_check_chars: default_min_repetition_check_chars(),
            max_unpunctuated_run: default_max_unpunctuated_run(),
            judge_mode: JudgeMode::default(),
            judge_min_batch: default_judge_min_batch(),
            judge_end_marker: default_judge_end_marker(),
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.min_length_ratio > 0.0 && self.min_length_ratio < self.max_length_ratio) {
            return Err(anyhow::anyhow!(
                "Length ratio bounds must satisfy 0 < min < max, got {} and {}",
                self.min_length_ratio,
                self.max_length_ratio
            ));
        }
        if self.segment_length == 0 || self.judge_min_batch == 0 {
            return Err(anyhow::anyhow!("Segment length and judge minimum batch must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Good,
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Accepted,
    NeedsRetranslation,
}

/// Per-line verdicts of one batch
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictSet {
    pub verdicts: Vec<Verdict>,
    pub conclusion: Conclusion,
    /// Judge requests spent reaching these verdicts
    pub judge_calls: usize,
}

impl VerdictSet {
    pub fn new(verdicts: Vec<Verdict>, judge_calls: usize) -> Self {
        let conclusion = if verdicts.contains(&Verdict::Bad) {
            Conclusion::NeedsRetranslation
        } else {
            Conclusion::Accepted
        };
        Self {
            verdicts,
            conclusion,
            judge_calls,
        }
    }

    pub fn needs_retranslation(&self) -> bool {
        self.conclusion == Conclusion::NeedsRetranslation
    }

    /// Batch positions of BAD lines
    pub fn rejected(&self) -> Vec<usize> {
        self.verdicts
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == Verdict::Bad)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Combines the rule tier and the judge tier
#[derive(Debug, Clone)]
pub struct QualityGate {
    rules: RuleChecker,
    mode: JudgeMode,
    min_batch: usize,
    judge: Option<Arc<dyn JudgeBackend>>,
}

impl QualityGate {
    pub fn new(config: QualityConfig, judge: Option<Arc<dyn JudgeBackend>>) -> Self {
        Self {
            mode: config.judge_mode,
            min_batch: config.judge_min_batch,
            rules: RuleChecker::new(config),
            judge,
        }
    }

    /// Mode actually in effect; without a judge backend only rules apply
    pub fn mode(&self) -> JudgeMode {
        if self.judge.is_some() { self.mode } else { JudgeMode::Disabled }
    }

    pub fn rules(&self) -> &RuleChecker {
        &self.rules
    }

    /// Rule-tier verdicts only
    pub fn evaluate_rules(&self, sources: &[String], targets: &[String], missing: &[usize]) -> VerdictSet {
        self.rules.evaluate(sources, targets, missing)
    }

    /// Verdicts for a batch under the configured mode.
    ///
    /// `missing` holds batch positions the aligner could not recover; such
    /// lines are BAD whatever the judge says. In escalate mode the judge may
    /// clear soft rule issues; in primary mode every rule rejection stands.
    pub async fn evaluate(
        &self,
        site: CallSite<'_>,
        sources: &[String],
        targets: &[String],
        missing: &[usize],
    ) -> VerdictSet {
        let issues = self.rules.check_batch(sources, targets, missing);
        let rule_verdicts: Vec<Verdict> = issues
            .iter()
            .map(|i| if i.is_empty() { Verdict::Good } else { Verdict::Bad })
            .collect();

        let judge = match (&self.judge, self.mode) {
            (Some(judge), JudgeMode::Escalate) if rule_verdicts.contains(&Verdict::Bad) => judge,
            (Some(judge), JudgeMode::Primary) => judge,
            _ => return VerdictSet::new(rule_verdicts, 0),
        };

        // blank sources are never sent to the judge
        let judged: Vec<usize> = (0..sources.len())
            .filter(|&i| !sources[i].trim().is_empty())
            .collect();
        if judged.is_empty() {
            return VerdictSet::new(rule_verdicts, 0);
        }

        let pairs: Vec<(&str, &str)> = judged
            .iter()
            .map(|&i| {
                let target = targets.get(i).map(String::as_str).unwrap_or("");
                (sources[i].as_str(), target)
            })
            .collect();

        debug!(
            "{} judging {} lines ({} rule rejections)",
            site.label,
            pairs.len(),
            rule_verdicts.iter().filter(|v| **v == Verdict::Bad).count()
        );
        let result = bisect(judge.as_ref(), site, &pairs, self.min_batch).await;

        let mut verdicts = vec![Verdict::Good; sources.len()];
        for (&i, verdict) in judged.iter().zip(result.verdicts) {
            let overruled = match self.mode {
                JudgeMode::Primary => !issues[i].is_empty(),
                _ => issues[i].iter().any(RuleIssue::is_hard),
            };
            verdicts[i] = if overruled { Verdict::Bad } else { verdict };
        }

        VerdictSet::new(verdicts, result.calls)
    }
}
