/*!
 * Output aligner.
 *
 * Maps a model reply back onto the conversation line numbers of the batch
 * that produced it. Two strategies, tried in order and reported explicitly:
 *
 * 1. `Numbered`: keep `N. text` lines whose N lies in `[start, start + count)`.
 *    Numerals outside the window are discarded; they usually leak from the
 *    few-shot samples or the replayed previous exchange.
 * 2. `Positional`: used only when no in-window numbered line exists. Lines
 *    are taken in emitted order (stray numerals stripped, echoed `>` context
 *    quotes skipped) and assigned to `start, start + 1, ...`, truncated to
 *    `count`.
 */

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*[.．、]\s*(.*)$").expect("valid numbered line regex"));

static REASONING_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(think|thinking|reasoning)>.*?</(think|thinking|reasoning)>")
        .expect("valid reasoning block regex")
});

static UNCLOSED_REASONING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(think|thinking|reasoning)>.*$").expect("valid unclosed reasoning regex")
});

/// Markers a reply may carry that are never content
pub const DEFAULT_REPLY_MARKERS: [&str; 3] = ["[END]", "（未完待续）", "[翻译完成]"];

/// Which extraction strategy produced an alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignStrategy {
    Numbered,
    Positional,
}

impl fmt::Display for AlignStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numbered => f.write_str("numbered"),
            Self::Positional => f.write_str("positional"),
        }
    }
}

/// Conversation line number → text, plus how it was obtained
#[derive(Debug, Clone)]
pub struct Alignment {
    pub strategy: AlignStrategy,
    pub start: usize,
    pub expected: usize,
    pub lines: BTreeMap<usize, String>,
    /// Out-of-window numerals that were dropped
    pub discarded: Vec<usize>,
}

impl Alignment {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line numbers of the window with no recovered text
    pub fn missing(&self) -> Vec<usize> {
        (self.start..self.start + self.expected)
            .filter(|n| !self.lines.contains_key(n))
            .collect()
    }
}

/// Align a cleaned reply onto `[start, start + expected)`.
pub fn align(reply: &str, expected: usize, start: usize) -> Alignment {
    let window = start..start + expected;
    let mut lines = BTreeMap::new();
    let mut discarded = Vec::new();

    for raw in reply.lines() {
        let line = raw.trim();
        let Some(caps) = NUMBERED_LINE.captures(line) else {
            continue;
        };
        let Ok(number) = caps[1].parse::<usize>() else {
            continue;
        };
        if !window.contains(&number) {
            discarded.push(number);
            continue;
        }
        let text = caps[2].trim().to_string();
        if lines.contains_key(&number) {
            debug!("Duplicate line number {} in reply, keeping the first", number);
            continue;
        }
        lines.insert(number, text);
    }

    if !discarded.is_empty() {
        warn!(
            "Discarded {} numbered line(s) outside window {}..{}: {:?}",
            discarded.len(),
            window.start,
            window.end,
            discarded
        );
    }

    if !lines.is_empty() {
        debug!(
            "Aligned {}/{} lines with numbered strategy",
            lines.len(),
            expected
        );
        return Alignment {
            strategy: AlignStrategy::Numbered,
            start,
            expected,
            lines,
            discarded,
        };
    }

    let positional: BTreeMap<usize, String> = reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_context_quote(l))
        .map(strip_leading_numeral)
        .take(expected)
        .enumerate()
        .map(|(i, text)| (start + i, text.to_string()))
        .collect();

    if !positional.is_empty() {
        warn!(
            "No numbered line in window {}..{}, fell back to positional mapping ({} lines)",
            window.start,
            window.end,
            positional.len()
        );
    }

    Alignment {
        strategy: AlignStrategy::Positional,
        start,
        expected,
        lines: positional,
        discarded,
    }
}

/// Context lines are quoted with `>` in prompts; models sometimes echo them
fn is_context_quote(line: &str) -> bool {
    line.starts_with('>')
}

fn strip_leading_numeral(line: &str) -> &str {
    match NUMBERED_LINE.captures(line) {
        Some(caps) => caps.get(2).map(|m| m.as_str().trim()).unwrap_or(""),
        None => line,
    }
}

/// An alignment converted to batch-local positions
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMapping {
    /// One entry per source line, never empty-by-omission
    pub lines: Vec<String>,
    /// Positions that fell back to the untranslated original
    pub missing: Vec<usize>,
}

/// Convert a line-number keyed alignment to batch positions, substituting the
/// original text wherever a line number is missing.
pub fn map_to_batch_indices(alignment: &Alignment, originals: &[String]) -> BatchMapping {
    let mut lines = Vec::with_capacity(originals.len());
    let mut missing = Vec::new();

    for (pos, original) in originals.iter().enumerate() {
        match alignment.lines.get(&(alignment.start + pos)) {
            Some(text) => lines.push(text.clone()),
            None => {
                missing.push(pos);
                lines.push(original.clone());
            }
        }
    }

    if !missing.is_empty() {
        warn!(
            "{} of {} lines missing from reply, kept originals at positions {:?}",
            missing.len(),
            originals.len(),
            missing
        );
    }

    BatchMapping { lines, missing }
}

/// Drop `<think>`-style blocks, including one the model never closed.
pub fn strip_reasoning(raw: &str) -> String {
    let closed = REASONING_BLOCK.replace_all(raw, "");
    UNCLOSED_REASONING.replace(&closed, "").into_owned()
}

/// Remove reasoning blocks, marker lines and arrow prefixes from a raw reply.
pub fn extract_clean_translation(raw: &str, markers: &[&str]) -> String {
    strip_reasoning(raw)
        .lines()
        .map(str::trim_end)
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.starts_with("```")
                && !markers.iter().any(|m| !m.is_empty() && trimmed == *m)
        })
        .map(|line| {
            let trimmed = line.trim_start();
            match trimmed.strip_prefix('→') {
                Some(rest) => rest.trim_start(),
                None => line,
            }
        })
        .map(|line| {
            let mut cleaned = line.to_string();
            for marker in markers.iter().filter(|m| !m.is_empty()) {
                if cleaned.ends_with(marker) {
                    cleaned.truncate(cleaned.len() - marker.len());
                }
            }
            cleaned
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
