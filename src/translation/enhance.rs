/*!
 * Enhancement pass over an existing bilingual output.
 *
 * The file is read back as source/translation pairs. Pairs whose
 * translation is the failure marker or still shows residual problems are
 * revised with the enhancement profile, through the same batch
 * orchestrator as normal translation. The file is rewritten after every
 * accepted batch; lines that cannot be improved keep their translation.
 */

use async_trait::async_trait;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app_config::Config;
use crate::errors::{AppError, TranslationError};
use crate::file_utils::FileManager;
use crate::translation::batch::{
    BatchOrchestrator, BatchOutcome, BatchRequest, BatchResult, BatchTranslator,
    OrchestratorSettings, StepEvent,
};
use crate::translation::core::{split_indent, TranslationEngine};
use crate::translation::prompts::RevisionItem;
use crate::translation::quality::rules::{contains_kana, longest_char_run};

/// Same character this many times in a row reads as a stutter left by the model
pub const MAX_CHAR_RUN: usize = 5;

/// Kana word split by dots or dashes (`せ・ん`), or single Han characters
/// joined by middle dots (`不・要`).
static BROKEN_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"[\x{3040}-\x{309F}\x{30A0}-\x{30FA}\x{30FD}-\x{30FF}]+[・\-~～]+[\x{3040}-\x{309F}\x{30A0}-\x{30FA}\x{30FD}-\x{30FF}]+",
        r"|(?:^|[^\p{Han}])\p{Han}(?:・\p{Han})+(?:[^\p{Han}・]|$)",
    ))
    .expect("valid broken word regex")
});

const DELIMITER: &str = "---";

/// One source line and the line holding its translation
#[derive(Debug, Clone, PartialEq)]
pub struct BilingualPair {
    pub source_line: usize,
    pub target_line: usize,
}

/// A bilingual output file read back for revision
#[derive(Debug, Clone)]
pub struct BilingualFile {
    pub lines: Vec<String>,
    pub pairs: Vec<BilingualPair>,
}

impl BilingualFile {
    /// Pair consecutive non-blank body lines. Front matter is left alone and
    /// reading stops at the partial marker or at a source with no translation.
    pub fn parse(text: &str, partial_marker: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let is_stop = |line: &str| {
            let line = line.trim();
            line.is_empty() || (!partial_marker.is_empty() && line == partial_marker)
        };

        let mut i = body_start(&lines);
        let mut pairs = Vec::new();
        while i < lines.len() {
            let line = lines[i].trim();
            if line.is_empty() {
                i += 1;
                continue;
            }
            if line == partial_marker || i + 1 >= lines.len() || is_stop(&lines[i + 1]) {
                break;
            }
            pairs.push(BilingualPair {
                source_line: i,
                target_line: i + 1,
            });
            i += 2;
        }

        Self { lines, pairs }
    }

    pub fn source(&self, pair: usize) -> &str {
        &self.lines[self.pairs[pair].source_line]
    }

    pub fn target(&self, pair: usize) -> &str {
        &self.lines[self.pairs[pair].target_line]
    }

    /// Replace a translation, keeping the source line's indentation
    pub fn set_target(&mut self, pair: usize, text: &str) {
        let (indent, _) = split_indent(self.source(pair));
        let line = format!("{}{}", indent, text.trim_start());
        let target_line = self.pairs[pair].target_line;
        self.lines[target_line] = line;
    }

    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

/// Index of the first body line, past a front-matter block if there is one
fn body_start(lines: &[String]) -> usize {
    let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return lines.len();
    };
    if lines[first].trim_end() != DELIMITER {
        return 0;
    }
    lines[first + 1..]
        .iter()
        .position(|l| l.trim_end() == DELIMITER)
        .map(|close| first + close + 2)
        .unwrap_or(lines.len())
}

/// Problems left in a translation, described for the revision prompt
pub fn residual_issues(target: &str, failure_marker: &str) -> Vec<String> {
    let text = target.trim();
    if text == failure_marker {
        return vec!["not translated yet".to_string()];
    }

    let mut issues = Vec::new();
    if let Some(word) = BROKEN_WORD.find(text) {
        issues.push(format!("word broken apart by separators: {}", word.as_str().trim()));
    }
    if contains_kana(text) {
        issues.push("untranslated kana left in the translation".to_string());
    }
    let (run, c) = longest_char_run(text);
    if run >= MAX_CHAR_RUN {
        if let Some(c) = c {
            issues.push(format!("character {} repeated {} times", c, run));
        }
    }
    issues
}

/// Result of enhancing one file
#[derive(Debug, Clone)]
pub struct EnhancementReport {
    pub path: PathBuf,
    /// Pairs in the file
    pub pairs: usize,
    /// Pairs selected for revision
    pub candidates: usize,
    /// Pairs whose translation was replaced
    pub improved: usize,
    pub batches: Vec<BatchOutcome>,
    pub elapsed: Duration,
}

impl EnhancementReport {
    pub fn summary(&self) -> String {
        format!(
            "{} pairs | {} selected | {} improved | {} kept | {:.1}s",
            self.pairs,
            self.candidates,
            self.improved,
            self.candidates - self.improved,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Orchestrator adapter sending drafts through the revision prompt
struct RevisionTranslator<'a> {
    engine: &'a TranslationEngine,
    sources: &'a [String],
    issues: &'a [Vec<String>],
}

#[async_trait]
impl BatchTranslator for RevisionTranslator<'_> {
    async fn translate_batch(&self, request: &BatchRequest<'_>) -> Result<BatchResult, TranslationError> {
        let items: Vec<RevisionItem<'_>> = request
            .positions
            .iter()
            .zip(request.lines)
            .map(|(&p, draft)| RevisionItem {
                source: &self.sources[p],
                draft: draft.as_str(),
                issues: self.issues[p].clone(),
            })
            .collect();
        self.engine.revise_lines(request.site, &items).await
    }
}

/// Revises weak lines of bilingual outputs
pub struct Enhancer {
    engine: Arc<TranslationEngine>,
    settings: OrchestratorSettings,
    failure_marker: String,
    partial_marker: String,
}

impl Enhancer {
    pub fn new(
        engine: Arc<TranslationEngine>,
        settings: OrchestratorSettings,
        failure_marker: impl Into<String>,
        partial_marker: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            settings,
            failure_marker: failure_marker.into(),
            partial_marker: partial_marker.into(),
        }
    }

    pub fn from_config(engine: Arc<TranslationEngine>, config: &Config) -> Self {
        Self::new(
            engine,
            config.translation.enhancement_settings(),
            &config.translation.failure_marker,
            &config.translation.partial_marker,
        )
    }

    /// Revise the weak lines of one bilingual file in place
    pub async fn enhance_file(&self, path: &Path) -> Result<EnhancementReport, AppError> {
        let started = Instant::now();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let text = FileManager::read_to_string(path).map_err(|e| AppError::File(e.to_string()))?;
        let mut file = BilingualFile::parse(&text, &self.partial_marker);

        let sources: Vec<String> = (0..file.pairs.len()).map(|i| file.source(i).to_string()).collect();
        let drafts: Vec<String> = (0..file.pairs.len()).map(|i| file.target(i).to_string()).collect();
        let issues: Vec<Vec<String>> = drafts
            .iter()
            .map(|draft| residual_issues(draft, &self.failure_marker))
            .collect();
        let pending: Vec<usize> = (0..issues.len()).filter(|&i| !issues[i].is_empty()).collect();
        let candidates = pending.len();

        info!("{:?}: {} of {} lines need revision", path, candidates, file.pairs.len());
        for &i in &pending {
            debug!("{} line {}: {}", stem, i + 1, issues[i].join("; "));
        }

        let translator = RevisionTranslator {
            engine: &self.engine,
            sources: &sources,
            issues: &issues,
        };
        let mut orchestrator = BatchOrchestrator::new(&translator, &drafts, pending, &stem, self.settings.clone());
        let mut improved = 0;

        while let Some(event) = orchestrator.step().await? {
            if let StepEvent::Accepted { positions, lines } = event {
                for (p, line) in positions.into_iter().zip(lines) {
                    file.set_target(p, &line);
                    improved += 1;
                }
                FileManager::write_atomic(path, &file.render()).map_err(|e| AppError::File(e.to_string()))?;
            }
        }

        let report = EnhancementReport {
            path: path.to_path_buf(),
            pairs: file.pairs.len(),
            candidates,
            improved,
            batches: orchestrator.into_outcomes(),
            elapsed: started.elapsed(),
        };
        info!("{:?}: {}", path, report.summary());
        Ok(report)
    }
}
