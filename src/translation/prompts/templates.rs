/*!
 * Prompt templates for line-batch translation.
 *
 * Every request shares one line-numbering convention with the model:
 * `N. text`, one line per source line, followed by an end marker.
 */

/// System prompt template for line translation.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// The template string with placeholders
    template: String,
}

impl PromptTemplate {
    /// The default system prompt for numbered line translation.
    pub const LINE_TRANSLATOR: &'static str = r#"You are a professional literary translator working from {source_language} into {target_language}.

## Task
- Translate every numbered line of the user's message into {target_language}.
- Answer with exactly one line per numbered line, in the form `N. translation`, keeping the original number N.
- Never merge, split, skip or add lines, and never repeat a line.
- Lines starting with `> ` are context only. Do not translate or repeat them.
- Keep names, honorifics and recurring terms consistent with earlier turns.

## Output
- Output only the numbered translations, without notes or explanations.
- After the last line, write {end_marker} on its own line."#;

    /// The system prompt of the judge tier.
    pub const TRANSLATION_REVIEWER: &'static str = r#"You review translations from {source_language} into {target_language}.
A translation is GOOD when it is complete, faithful and natural {target_language}, with no untranslated {source_language} text, no omissions, no additions and no repetition. Otherwise it is BAD.
Keep any reasoning short and always finish with the requested verdicts."#;

    /// Create a new prompt template.
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Create the default line translator template.
    pub fn line_translator() -> Self {
        Self::new(Self::LINE_TRANSLATOR)
    }

    /// Create the judge template.
    pub fn translation_reviewer() -> Self {
        Self::new(Self::TRANSLATION_REVIEWER)
    }

    /// Render the template with the given variables.
    pub fn render(&self, source_language: &str, target_language: &str, end_marker: &str) -> String {
        self.template
            .replace("{source_language}", source_language)
            .replace("{target_language}", target_language)
            .replace("{end_marker}", end_marker)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::line_translator()
    }
}

pub const TERMINOLOGY_HEADER: &str = "## Terminology";
pub const CONTEXT_BEFORE_HEADER: &str = "[Preceding context, do not translate]";
pub const CONTEXT_AFTER_HEADER: &str = "[Following context, do not translate]";
pub const TRANSLATE_HEADER: &str = "[Translate]";
pub const METADATA_HEADER: &str = "[Translate these title, caption and tag values]";

/// First line of every judge request
pub const JUDGE_HEADER: &str = "[Quality check]";

/// First line of every revision request
pub const REVISION_HEADER: &str = "[Revise drafts]";

pub const SOURCE_LABEL: &str = "原文";
pub const TARGET_LABEL: &str = "译文";
pub const DRAFT_LABEL: &str = "初稿";
pub const ISSUES_LABEL: &str = "问题";

/// `N. line` for each line, numbered from `start`
pub fn numbered<S: AsRef<str>>(lines: &[S], start: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}", start + i, line.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `> line` for each context line
pub fn quoted<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .map(|line| format!("> {}", line.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn paired(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .enumerate()
        .map(|(i, (source, target))| {
            format!(
                "{n}. {}: {}\n{n}. {}: {}",
                SOURCE_LABEL,
                source,
                TARGET_LABEL,
                target,
                n = i + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ask for one verdict covering every pair
pub fn judge_block_request(pairs: &[(&str, &str)], end_marker: &str) -> String {
    format!(
        "{}\n{}\n\nFinish with a single verdict word: GOOD if every translation above is acceptable, BAD if any is not. Then write {} on its own line.",
        JUDGE_HEADER,
        paired(pairs),
        end_marker
    )
}

/// Ask for one verdict per pair
pub fn judge_lines_request(pairs: &[(&str, &str)], end_marker: &str) -> String {
    format!(
        "{}\n{}\n\nGive one verdict per pair, one per line, in the form `N. GOOD` or `N. BAD`. Then write {} on its own line.",
        JUDGE_HEADER,
        paired(pairs),
        end_marker
    )
}

/// Ask for revised drafts, each with its source and the issues found
pub fn revision_request(
    items: &[(&str, &str, String)],
    target_language: &str,
    end_marker: &str,
) -> String {
    let body = items
        .iter()
        .enumerate()
        .map(|(i, (source, draft, issues))| {
            format!(
                "{n}. {}: {}\n{n}. {}: {}\n{n}. {}: {}",
                SOURCE_LABEL,
                source,
                DRAFT_LABEL,
                draft,
                ISSUES_LABEL,
                issues,
                n = i + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\nEach item shows a source line, its current draft and the problems found in the draft. Rewrite each draft into a complete, natural {} translation of its source.\n{}\n\nAnswer with one line per item in the form `N. revised translation`, then write {} on its own line.",
        REVISION_HEADER, target_language, body, end_marker
    )
}
