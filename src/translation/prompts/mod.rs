/*!
 * Conversation construction.
 *
 * Builds the message list for every request kind and keeps track of the
 * conversation line number: few-shot samples are numbered from 1, the
 * replayed previous exchange continues that count, and the live batch starts
 * where they leave off. That start number is what the aligner validates
 * reply numerals against.
 */

pub mod templates;

use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::language_utils::get_language_name;
use crate::providers::ChatMessage;
use crate::translation::batch::PreviousExchange;
use crate::translation::core::JobKind;

pub use templates::PromptTemplate;

static SAMPLE_NUMERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s*[.．]\s*").expect("valid sample numeral regex"));

/// One few-shot user/assistant pair
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleExchange {
    pub user: Vec<String>,
    pub assistant: Vec<String>,
}

/// Parse a few-shot file made of `User:` and `Assistant:` blocks.
///
/// Existing numerals are stripped; numbering is assigned when prompts are built.
pub fn parse_samples(text: &str) -> Vec<SampleExchange> {
    #[derive(PartialEq)]
    enum Block {
        None,
        User,
        Assistant,
    }

    let mut samples = Vec::new();
    let mut current = SampleExchange::default();
    let mut block = Block::None;

    for raw in text.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix("User:") {
            if !current.user.is_empty() {
                samples.push(std::mem::take(&mut current));
            }
            block = Block::User;
            if !rest.trim().is_empty() {
                current.user.push(rest.trim().to_string());
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("Assistant:") {
            block = Block::Assistant;
            if !rest.trim().is_empty() {
                current.assistant.push(rest.trim().to_string());
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }
        let text = SAMPLE_NUMERAL.replace(line, "").to_string();
        match block {
            Block::User => current.user.push(text),
            Block::Assistant => current.assistant.push(text),
            Block::None => {}
        }
    }
    if !current.user.is_empty() {
        samples.push(current);
    }

    samples.retain(|s| {
        if s.assistant.is_empty() {
            warn!("Dropping few-shot sample without an assistant block");
            return false;
        }
        if s.assistant.len() != s.user.len() {
            warn!(
                "Few-shot sample has {} user and {} assistant lines",
                s.user.len(),
                s.assistant.len()
            );
        }
        true
    });
    samples
}

/// Prompt material read from disk once per run
#[derive(Debug, Clone, Default)]
pub struct PromptAssets {
    /// Replacement for the built-in system template
    pub preface: Option<String>,
    pub terminology: Option<String>,
    pub samples: Vec<SampleExchange>,
}

impl PromptAssets {
    pub fn load(preface: Option<&Path>, terminology: Option<&Path>, samples: Option<&Path>) -> Result<Self> {
        let read = |path: &Path, what: &str| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {} file: {:?}", what, path))
        };

        let preface = preface.map(|p| read(p, "preface")).transpose()?;
        let terminology = terminology
            .map(|p| read(p, "terminology"))
            .transpose()?
            .filter(|t| !t.trim().is_empty());
        let samples = match samples {
            Some(path) => {
                let parsed = parse_samples(&read(path, "sample")?);
                debug!("Loaded {} few-shot samples from {:?}", parsed.len(), path);
                parsed
            }
            None => Vec::new(),
        };

        Ok(Self {
            preface,
            terminology,
            samples,
        })
    }
}

/// A conversation plus the number its live batch starts at
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub messages: Vec<ChatMessage>,
    pub start_line: usize,
}

/// A draft to revise, with the issues found in it
#[derive(Debug, Clone)]
pub struct RevisionItem<'a> {
    pub source: &'a str,
    pub draft: &'a str,
    pub issues: Vec<String>,
}

/// Builds every conversation the engine sends
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: String,
    judge_system: String,
    samples: Vec<SampleExchange>,
    target_name: String,
    end_marker: String,
    judge_end_marker: String,
}

fn display_name(code: &str) -> String {
    get_language_name(code).unwrap_or_else(|_| code.to_string())
}

impl PromptBuilder {
    pub fn new(
        assets: PromptAssets,
        source_language: &str,
        target_language: &str,
        end_marker: &str,
        judge_end_marker: &str,
    ) -> Self {
        let source_name = display_name(source_language);
        let target_name = display_name(target_language);

        let template = match &assets.preface {
            Some(text) => PromptTemplate::new(text),
            None => PromptTemplate::line_translator(),
        };
        let mut system = template.render(&source_name, &target_name, end_marker);
        if let Some(terms) = &assets.terminology {
            system.push_str("\n\n");
            system.push_str(templates::TERMINOLOGY_HEADER);
            system.push('\n');
            system.push_str(terms.trim());
        }
        let judge_system =
            PromptTemplate::translation_reviewer().render(&source_name, &target_name, judge_end_marker);

        Self {
            system,
            judge_system,
            samples: assets.samples,
            target_name,
            end_marker: end_marker.to_string(),
            judge_end_marker: judge_end_marker.to_string(),
        }
    }

    pub fn end_marker(&self) -> &str {
        &self.end_marker
    }

    pub fn system_prompt(&self) -> &str {
        &self.system
    }

    fn assistant_block<S: AsRef<str>>(&self, lines: &[S], start: usize) -> String {
        let mut text = templates::numbered(lines, start);
        if !self.end_marker.is_empty() {
            text.push('\n');
            text.push_str(&self.end_marker);
        }
        text
    }

    /// Conversation for one batch of body or front-matter lines.
    pub fn translation(
        &self,
        kind: JobKind,
        lines: &[String],
        context_before: &[String],
        context_after: &[String],
        previous: Option<&PreviousExchange>,
    ) -> BuiltPrompt {
        let mut messages = vec![ChatMessage::system(&self.system)];
        let mut next = 1;

        if kind == JobKind::Body {
            for sample in &self.samples {
                messages.push(ChatMessage::user(templates::numbered(&sample.user, next)));
                messages.push(ChatMessage::assistant(self.assistant_block(&sample.assistant, next)));
                next += sample.user.len();
            }
            if let Some(previous) = previous.filter(|p| !p.is_empty()) {
                messages.push(ChatMessage::user(templates::numbered(&previous.inputs, next)));
                messages.push(ChatMessage::assistant(self.assistant_block(&previous.outputs, next)));
                next += previous.inputs.len();
            }
        }

        let start_line = next;
        let mut sections = Vec::new();
        if !context_before.is_empty() {
            sections.push(format!(
                "{}\n{}",
                templates::CONTEXT_BEFORE_HEADER,
                templates::quoted(context_before)
            ));
        }
        let header = match kind {
            JobKind::Body => templates::TRANSLATE_HEADER,
            JobKind::FrontMatter => templates::METADATA_HEADER,
        };
        sections.push(format!("{}\n{}", header, templates::numbered(lines, start_line)));
        if !context_after.is_empty() {
            sections.push(format!(
                "{}\n{}",
                templates::CONTEXT_AFTER_HEADER,
                templates::quoted(context_after)
            ));
        }
        messages.push(ChatMessage::user(sections.join("\n\n")));

        BuiltPrompt {
            messages,
            start_line,
        }
    }

    /// Judge conversation asking for one verdict over all pairs
    pub fn judge_block(&self, pairs: &[(&str, &str)]) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(&self.judge_system),
            ChatMessage::user(templates::judge_block_request(pairs, &self.judge_end_marker)),
        ]
    }

    /// Judge conversation asking for one verdict per pair
    pub fn judge_lines(&self, pairs: &[(&str, &str)]) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(&self.judge_system),
            ChatMessage::user(templates::judge_lines_request(pairs, &self.judge_end_marker)),
        ]
    }

    /// Revision conversation for the enhancement pass, numbered from 1
    pub fn enhancement(&self, items: &[RevisionItem<'_>]) -> BuiltPrompt {
        let rows: Vec<(&str, &str, String)> = items
            .iter()
            .map(|item| (item.source.trim(), item.draft.trim(), item.issues.join("; ")))
            .collect();
        BuiltPrompt {
            messages: vec![
                ChatMessage::system(&self.system),
                ChatMessage::user(templates::revision_request(
                    &rows,
                    &self.target_name,
                    &self.end_marker,
                )),
            ],
            start_line: 1,
        }
    }
}
