/*!
 * Core document model types for line-oriented translation.
 *
 * A document is split once at load time into an optional YAML front-matter
 * block and body lines. Non-blank body lines become `ContentLine`s and are
 * the unit of translation; blank lines are kept only for layout. In the front
 * matter, only the values of a few known fields are translated.
 */

use serde::{Deserialize, Serialize};
use std::ops::Range;

const DELIMITER: &str = "---";

/// How translated output is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Each translatable line followed by its translation
    #[default]
    Bilingual,
    /// Translations in place of the source
    TargetOnly,
}

impl std::str::FromStr for OutputMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bilingual" => Ok(Self::Bilingual),
            "target_only" | "target" => Ok(Self::TargetOnly),
            _ => Err(anyhow::anyhow!("Invalid output mode: {}", s)),
        }
    }
}

/// Front-matter fields whose values are translated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Title,
    Caption,
    SeriesTitle,
    Tag,
}

/// Block context needed to interpret an indented line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanState {
    in_series: bool,
    in_tags: bool,
}

/// A translatable value inside a front-matter line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpan {
    pub kind: FieldKind,
    /// Index into `FrontMatter::lines`
    pub line: usize,
    /// Byte range of the value, quotes excluded
    pub range: Range<usize>,
}

/// Byte range of a scalar value starting at `from`, without quotes.
/// Block scalars (`|`, `>`) and empty values have none.
fn value_range(line: &str, from: usize) -> Option<Range<usize>> {
    let rest = &line[from..];
    let start = from + (rest.len() - rest.trim_start().len());
    let end = line.trim_end().len();
    if start >= end {
        return None;
    }
    let value = &line[start..end];
    if value.starts_with('|') || value.starts_with('>') {
        return None;
    }
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return (end - start > 2).then(|| start + 1..end - 1);
        }
    }
    Some(start..end)
}

/// Item ranges of an inline `[a, b]` list whose `[` is at or after `from`
fn inline_list_ranges(line: &str, from: usize) -> Vec<Range<usize>> {
    let (Some(open), Some(close)) = (line[from..].find('['), line.rfind(']')) else {
        return Vec::new();
    };
    let open = from + open;
    if close <= open {
        return Vec::new();
    }

    let mut ranges = Vec::new();
    let mut item_start = open + 1;
    for (offset, c) in line[open + 1..close].char_indices() {
        if c == ',' {
            let item_end = open + 1 + offset;
            ranges.extend(value_range(&line[..item_end], item_start));
            item_start = item_end + 1;
        }
    }
    ranges.extend(value_range(&line[..close], item_start));
    ranges
}

/// Translatable values on one front-matter line, updating the block context.
pub fn scan_line(line: &str, state: &mut ScanState) -> Vec<(FieldKind, Range<usize>)> {
    let body = line.trim_start();
    let indent = line.len() - body.len();
    if body.is_empty() || body.starts_with('#') {
        return Vec::new();
    }

    if state.in_tags {
        if let Some(rest) = body.strip_prefix('-') {
            let from = line.len() - rest.len();
            return value_range(line, from)
                .map(|r| vec![(FieldKind::Tag, r)])
                .unwrap_or_default();
        }
        if indent > 0 {
            return Vec::new();
        }
    }

    if indent == 0 {
        *state = ScanState::default();
    }

    let Some((key, _)) = body.split_once(':') else {
        return Vec::new();
    };
    let key = key.trim();
    let value_from = indent + body.find(':').map_or(0, |p| p + 1);
    let has_value = !line[value_from..].trim().is_empty();

    match (indent, key) {
        (0, "title") => value_range(line, value_from).map(|r| vec![(FieldKind::Title, r)]).unwrap_or_default(),
        (0, "caption") => value_range(line, value_from).map(|r| vec![(FieldKind::Caption, r)]).unwrap_or_default(),
        (0, "series") => {
            state.in_series = !has_value;
            Vec::new()
        }
        (0, "tags") if has_value => inline_list_ranges(line, value_from)
            .into_iter()
            .map(|r| (FieldKind::Tag, r))
            .collect(),
        (0, "tags") => {
            state.in_tags = true;
            Vec::new()
        }
        (i, "title") if i > 0 && state.in_series => value_range(line, value_from)
            .map(|r| vec![(FieldKind::SeriesTitle, r)])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Replace value ranges of `line`, last first so earlier offsets stay valid
pub fn replace_ranges(line: &str, replacements: &[(Range<usize>, &str)]) -> String {
    let mut out = line.to_string();
    let mut sorted: Vec<&(Range<usize>, &str)> = replacements.iter().collect();
    sorted.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
    for (range, value) in sorted {
        out.replace_range(range.clone(), value);
    }
    out
}

/// The `---` delimited block at the top of a document
#[derive(Debug, Clone, PartialEq)]
pub struct FrontMatter {
    /// Every line of the block, delimiters included
    pub lines: Vec<String>,
    pub fields: Vec<FieldSpan>,
    /// Scan context before each line, for re-reading rendered lines
    states: Vec<ScanState>,
}

impl FrontMatter {
    fn from_lines(lines: Vec<String>, open: usize, close: usize) -> Self {
        let mut fields = Vec::new();
        let mut states = vec![ScanState::default(); lines.len()];
        let mut state = ScanState::default();
        for i in open + 1..close {
            states[i] = state;
            for (kind, range) in scan_line(&lines[i], &mut state) {
                fields.push(FieldSpan { kind, line: i, range });
            }
        }
        Self { lines, fields, states }
    }

    /// Source text of every translatable value, in document order
    pub fn values(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| self.lines[f.line][f.range.clone()].to_string())
            .collect()
    }

    /// Indices into `fields` of the values on one line
    pub fn fields_on(&self, line: usize) -> Range<usize> {
        let start = self.fields.partition_point(|f| f.line < line);
        let end = self.fields.partition_point(|f| f.line <= line);
        start..end
    }

    /// A line with its values replaced
    pub fn translated_line(&self, line: usize, values: &[&str]) -> String {
        let fields = &self.fields[self.fields_on(line)];
        let replacements: Vec<(Range<usize>, String)> = fields
            .iter()
            .zip(values)
            .map(|(field, value)| (field.range.clone(), sanitize_value(field.kind, value)))
            .collect();
        let borrowed: Vec<(Range<usize>, &str)> =
            replacements.iter().map(|(r, v)| (r.clone(), v.as_str())).collect();
        replace_ranges(&self.lines[line], &borrowed)
    }

    /// Values read back from a rendered version of `line`, if its shape matches
    pub fn reread_line(&self, line: usize, rendered: &str) -> Option<Vec<String>> {
        let mut state = self.states[line];
        let spans = scan_line(rendered, &mut state);
        let expected = self.fields_on(line);
        let kinds_match = spans.len() == expected.len()
            && spans
                .iter()
                .zip(&self.fields[expected])
                .all(|((kind, _), field)| *kind == field.kind);
        kinds_match.then(|| spans.into_iter().map(|(_, r)| rendered[r].to_string()).collect())
    }
}

/// Keep a translated value on one line and inside its list
fn sanitize_value(kind: FieldKind, value: &str) -> String {
    let single = value.trim().replace(['\r', '\n'], " ");
    match kind {
        FieldKind::Tag => single.replace(',', "，").replace(['[', ']'], ""),
        _ => single,
    }
}

/// A non-blank body line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLine {
    /// Index into `Document::body`
    pub index: usize,
    pub text: String,
}

/// A loaded source document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub front_matter: Option<FrontMatter>,
    pub body: Vec<String>,
    pub content: Vec<ContentLine>,
    /// For each body line, its position in `content`
    content_of: Vec<Option<usize>>,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect();

        let open = lines.iter().position(|l| !l.trim().is_empty());
        let close = open
            .filter(|&o| lines[o].trim() == DELIMITER)
            .and_then(|o| lines[o + 1..].iter().position(|l| l.trim() == DELIMITER).map(|p| (o, o + 1 + p)));

        let (front_matter, body) = match close {
            Some((open, close)) => {
                let body = lines[close + 1..].to_vec();
                let block = lines[..=close].to_vec();
                (Some(FrontMatter::from_lines(block, open, close)), body)
            }
            None => (None, lines),
        };

        let mut content = Vec::new();
        let content_of = body
            .iter()
            .enumerate()
            .map(|(index, line)| {
                if line.trim().is_empty() {
                    None
                } else {
                    content.push(ContentLine { index, text: line.clone() });
                    Some(content.len() - 1)
                }
            })
            .collect();

        Self {
            front_matter,
            body,
            content,
            content_of,
        }
    }

    /// Translatable front-matter values
    pub fn field_values(&self) -> Vec<String> {
        self.front_matter.as_ref().map(FrontMatter::values).unwrap_or_default()
    }

    pub fn content_texts(&self) -> Vec<String> {
        self.content.iter().map(|c| c.text.clone()).collect()
    }

    pub fn content_at(&self, body_line: usize) -> Option<usize> {
        self.content_of.get(body_line).copied().flatten()
    }

    /// An empty translation state shaped for this document
    pub fn new_state(&self) -> TranslationState {
        TranslationState {
            fields: vec![None; self.field_values().len()],
            lines: vec![None; self.content.len()],
        }
    }

    /// Render the translated document. An incomplete state renders the
    /// processed prefix followed by a blank line and `partial_marker`.
    pub fn render(&self, state: &TranslationState, mode: OutputMode, partial_marker: &str) -> String {
        let mut out: Vec<String> = Vec::new();
        let bilingual = mode == OutputMode::Bilingual;

        let finish = |mut out: Vec<String>, complete: bool| {
            if !complete {
                out.push(String::new());
                out.push(partial_marker.to_string());
            }
            let mut text = out.join("\n");
            text.push('\n');
            text
        };

        if let Some(fm) = &self.front_matter {
            for (i, line) in fm.lines.iter().enumerate() {
                let fields = fm.fields_on(i);
                if fields.is_empty() {
                    out.push(line.clone());
                    continue;
                }
                let values: Option<Vec<&str>> = state.fields[fields].iter().map(|v| v.as_deref()).collect();
                let Some(values) = values else {
                    return finish(out, false);
                };
                if bilingual {
                    out.push(line.clone());
                }
                out.push(fm.translated_line(i, &values));
            }
        }

        for (i, line) in self.body.iter().enumerate() {
            match self.content_of[i] {
                None => out.push(line.clone()),
                Some(c) => {
                    let Some(translation) = &state.lines[c] else {
                        return finish(out, false);
                    };
                    if bilingual {
                        out.push(line.clone());
                    }
                    out.push(translation.clone());
                }
            }
        }

        finish(out, true)
    }
}

/// Translations known so far, parallel to the document's values and content
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslationState {
    pub fields: Vec<Option<String>>,
    pub lines: Vec<Option<String>>,
}

impl TranslationState {
    pub fn is_complete(&self) -> bool {
        self.fields.iter().chain(&self.lines).all(Option::is_some)
    }

    /// Values still to translate: never translated, or left at `failure_marker`
    pub fn pending_fields(&self, failure_marker: &str) -> Vec<usize> {
        pending(&self.fields, failure_marker)
    }

    pub fn pending_lines(&self, failure_marker: &str) -> Vec<usize> {
        pending(&self.lines, failure_marker)
    }

    pub fn has_pending(&self, failure_marker: &str) -> bool {
        self.fields
            .iter()
            .chain(&self.lines)
            .any(|e| is_pending(e, failure_marker))
    }

    /// Entries holding a translation other than `failure_marker`
    pub fn translated_count(&self, failure_marker: &str) -> usize {
        self.fields
            .iter()
            .chain(&self.lines)
            .flatten()
            .filter(|t| t.trim() != failure_marker)
            .count()
    }

    pub fn failed_count(&self, failure_marker: &str) -> usize {
        self.fields
            .iter()
            .chain(&self.lines)
            .flatten()
            .filter(|t| t.trim() == failure_marker)
            .count()
    }
}

fn is_pending(entry: &Option<String>, failure_marker: &str) -> bool {
    entry.as_deref().is_none_or(|t| t.trim() == failure_marker)
}

fn pending(entries: &[Option<String>], failure_marker: &str) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| is_pending(e, failure_marker))
        .map(|(i, _)| i)
        .collect()
}
