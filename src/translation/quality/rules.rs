/*!
 * Rule tier of the quality gate.
 *
 * Cheap per-line heuristics that need no model call. Each source/target
 * pair is checked independently; any issue makes the line BAD.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

use super::{QualityConfig, Verdict, VerdictSet};

/// Phonetic characters exclusive to Japanese (kana, half-width kana).
/// The middle dot and the long-vowel mark are left out: Chinese uses them too.
static KANA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{3040}-\x{309F}\x{30A0}-\x{30FA}\x{30FD}-\x{30FF}\x{FF66}-\x{FF9D}]").expect("valid kana regex")
});

/// Outputs that mean the model gave up on a line
pub const REFUSAL_PATTERNS: [&str; 6] = [
    "（以下省略）",
    "（省略）",
    "翻译失败",
    "无法翻译",
    "[ERROR]",
    "[FAILED]",
];

/// Sources shorter than this are too short for a meaningful length ratio
const SHORT_LINE_CHARS: usize = 4;

pub fn contains_kana(text: &str) -> bool {
    KANA.is_match(text)
}

/// Longest run of one repeated non-whitespace character, with that character
pub fn longest_char_run(text: &str) -> (usize, Option<char>) {
    let mut best = (0, None);
    let mut current: Option<char> = None;
    let mut run = 0;

    for c in text.chars() {
        if Some(c) == current {
            run += 1;
        } else {
            current = Some(c);
            run = 1;
        }
        if !c.is_whitespace() && run > best.0 {
            best = (run, Some(c));
        }
    }
    best
}

/// Highest number of times any `length`-character substring occurs
pub fn max_segment_repeats(text: &str, length: usize) -> usize {
    let chars: Vec<char> = text.chars().collect();
    if length == 0 || chars.len() < length {
        return 0;
    }
    let mut counts: HashMap<&[char], usize> = HashMap::new();
    for window in chars.windows(length) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts.values().copied().max().unwrap_or(0)
}

fn is_run_char(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fa5}') || c.is_ascii_alphanumeric()
}

/// Longest stretch of CJK ideographs and ASCII letters or digits.
/// Anything else ends a run, whitespace included.
pub fn longest_unpunctuated_run(text: &str) -> usize {
    let mut best = 0;
    let mut run = 0;
    for c in text.chars() {
        if is_run_char(c) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

/// Why a line was marked BAD
#[derive(Debug, Clone, PartialEq)]
pub enum RuleIssue {
    /// The aligner could not recover this line
    Missing,
    EmptyTranslation,
    Refusal(String),
    LengthRatio(f32),
    CharRepetition { ch: char, run: usize },
    SegmentRepetition(usize),
    CopyThrough,
    MissingPunctuation(usize),
}

impl RuleIssue {
    /// Issues no judge verdict can overrule
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Missing | Self::EmptyTranslation | Self::Refusal(_))
    }
}

impl fmt::Display for RuleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing from reply"),
            Self::EmptyTranslation => write!(f, "empty translation"),
            Self::Refusal(pattern) => write!(f, "refusal pattern {}", pattern),
            Self::LengthRatio(ratio) => write!(f, "length ratio {:.2}", ratio),
            Self::CharRepetition { ch, run } => write!(f, "'{}' repeated {} times", ch, run),
            Self::SegmentRepetition(count) => write!(f, "segment repeated {} times", count),
            Self::CopyThrough => write!(f, "copied untranslated"),
            Self::MissingPunctuation(run) => write!(f, "{} characters without punctuation", run),
        }
    }
}

/// Applies the rule checks with configured thresholds
#[derive(Debug, Clone)]
pub struct RuleChecker {
    config: QualityConfig,
}

impl RuleChecker {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// All issues of one pair. Blank sources never have any.
    pub fn check(&self, source: &str, target: &str, missing: bool) -> Vec<RuleIssue> {
        let source = source.trim();
        let target = target.trim();
        if source.is_empty() {
            return Vec::new();
        }
        if missing {
            return vec![RuleIssue::Missing];
        }
        if target.is_empty() {
            return vec![RuleIssue::EmptyTranslation];
        }

        let mut issues = Vec::new();
        let config = &self.config;

        if let Some(pattern) = REFUSAL_PATTERNS
            .iter()
            .find(|p| target.contains(*p) && !source.contains(*p))
        {
            issues.push(RuleIssue::Refusal(pattern.to_string()));
        }

        let source_chars = source.chars().count();
        let target_chars = target.chars().count();
        if source_chars >= SHORT_LINE_CHARS {
            let ratio = target_chars as f32 / source_chars as f32;
            if ratio < config.min_length_ratio || ratio > config.max_length_ratio {
                issues.push(RuleIssue::LengthRatio(ratio));
            }
        }

        if target_chars >= config.min_repetition_check_chars {
            let (run, ch) = longest_char_run(target);
            if let Some(ch) = ch {
                if run > config.char_repeat_threshold && run > longest_char_run(source).0 {
                    issues.push(RuleIssue::CharRepetition { ch, run });
                }
            }

            let repeats = max_segment_repeats(target, config.segment_length);
            if repeats > config.segment_repeat_threshold
                && repeats > max_segment_repeats(source, config.segment_length)
            {
                issues.push(RuleIssue::SegmentRepetition(repeats));
            }
        }

        if target == source && contains_kana(source) {
            issues.push(RuleIssue::CopyThrough);
        }

        let run = longest_unpunctuated_run(target);
        if run > config.max_unpunctuated_run {
            issues.push(RuleIssue::MissingPunctuation(run));
        }

        issues
    }

    /// Issues for every line of a batch; `missing` holds batch positions.
    pub fn check_batch(&self, sources: &[String], targets: &[String], missing: &[usize]) -> Vec<Vec<RuleIssue>> {
        sources
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let target = targets.get(i).map(String::as_str).unwrap_or("");
                self.check(source, target, missing.contains(&i) || i >= targets.len())
            })
            .collect()
    }

    /// Rule-tier verdicts for a batch
    pub fn evaluate(&self, sources: &[String], targets: &[String], missing: &[usize]) -> VerdictSet {
        let verdicts = self
            .check_batch(sources, targets, missing)
            .iter()
            .map(|issues| if issues.is_empty() { Verdict::Good } else { Verdict::Bad })
            .collect();
        VerdictSet::new(verdicts, 0)
    }
}
