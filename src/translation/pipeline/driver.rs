/*!
 * Pipeline driver: one document from source file to output file.
 *
 * Front-matter values are translated first, then the body. Each phase runs
 * its own batch orchestrator; after every accepted or failed batch the
 * output is rendered and written atomically, so an interrupted run leaves
 * a valid partial file that the next run resumes from.
 */

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app_config::Config;
use crate::errors::AppError;
use crate::file_utils::FileManager;
use crate::translation::batch::{
    BatchOrchestrator, BatchOutcome, BatchTranslator, OrchestratorSettings, StepEvent,
};
use crate::translation::core::{JobKind, TokenUsageStats, TranslationEngine};
use crate::translation::document::{Document, OutputMode, TranslationState};

use super::report::{DocumentReport, DocumentStatus};

/// Settings the driver needs beyond the engine
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub output_mode: OutputMode,
    pub target_language: String,
    pub failure_marker: String,
    pub partial_marker: String,
    pub overwrite: bool,
    pub debug: bool,
    pub metadata_only: bool,
    pub document_timeout: Option<Duration>,
    pub body: OrchestratorSettings,
    pub front_matter: OrchestratorSettings,
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        let t = &config.translation;
        Self {
            output_mode: t.output_mode,
            target_language: config.target_language.clone(),
            failure_marker: t.failure_marker.clone(),
            partial_marker: t.partial_marker.clone(),
            overwrite: t.overwrite,
            debug: t.debug,
            metadata_only: t.metadata_only,
            document_timeout: t.document_timeout(),
            body: t.orchestrator_settings(),
            front_matter: t.front_matter_settings(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slots {
    Fields,
    Lines,
}

/// Mutable state of one document while it is being translated
struct DocumentRun<'a> {
    document: &'a Document,
    state: TranslationState,
    output: &'a Path,
    mode: OutputMode,
    partial_marker: &'a str,
    deadline: Option<Instant>,
    bar: ProgressBar,
}

impl DocumentRun<'_> {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Record an event; returns whether the output changed
    fn apply(&mut self, slots: Slots, event: StepEvent) -> bool {
        let (positions, lines) = match event {
            StepEvent::Accepted { positions, lines } | StepEvent::Failed { positions, lines } => {
                (positions, lines)
            }
            StepEvent::Degraded { new_size, .. } => {
                self.bar.set_message(format!("batch size {}", new_size));
                return false;
            }
        };

        let target = match slots {
            Slots::Fields => &mut self.state.fields,
            Slots::Lines => &mut self.state.lines,
        };
        let count = positions.len() as u64;
        for (position, line) in positions.into_iter().zip(lines) {
            target[position] = Some(line);
        }
        self.bar.inc(count);
        true
    }

    fn flush(&self) -> Result<(), AppError> {
        let rendered = self.document.render(&self.state, self.mode, self.partial_marker);
        FileManager::write_atomic(self.output, &rendered).map_err(|e| AppError::File(e.to_string()))
    }
}

/// Runs documents through a translation engine
pub struct PipelineDriver {
    engine: Arc<TranslationEngine>,
    settings: DriverSettings,
    progress: Option<MultiProgress>,
}

impl PipelineDriver {
    pub fn new(engine: Arc<TranslationEngine>, settings: DriverSettings) -> Self {
        Self {
            engine,
            settings,
            progress: None,
        }
    }

    /// Show a progress bar per document under `progress`
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn engine(&self) -> &TranslationEngine {
        &self.engine
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Where the output of `input` goes for this run
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stamp = self.settings.debug.then(FileManager::debug_stamp);
        FileManager::output_path(
            input,
            self.settings.output_mode,
            &self.settings.target_language,
            stamp.as_deref(),
        )
    }

    fn progress_bar(&self, total: usize, stem: &str) -> ProgressBar {
        let Some(multi) = &self.progress else {
            return ProgressBar::hidden();
        };
        let bar = multi.add(ProgressBar::new(total as u64));
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} lines {prefix} {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("=>-"));
        bar.set_prefix(stem.to_string());
        bar
    }

    /// Translate one document file, resuming from an earlier output when allowed.
    ///
    /// Only fatal errors and file failures are returned as `Err`; a document
    /// that runs out of time comes back as a `Partial` report.
    pub async fn process_file(&self, input: &Path) -> Result<DocumentReport, AppError> {
        let started = Instant::now();
        let usage_before = self.engine.usage();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());

        let text = FileManager::read_to_string(input).map_err(|e| AppError::File(e.to_string()))?;
        let document = Document::parse(&text);
        let output = self.output_path(input);

        let (state, recovered) = self.initial_state(&document, &output)?;
        let resumed = recovered > 0;
        if resumed && !state.has_pending(&self.settings.failure_marker) {
            info!("{:?} is already fully translated in {:?}, skipping", input, output);
            return Ok(self.report(input, output, DocumentStatus::Skipped, Vec::new(), &state, recovered, started, &usage_before, None));
        }

        let total = state.fields.len() + if self.settings.metadata_only { 0 } else { state.lines.len() };
        let bar = self.progress_bar(total, &stem);
        bar.set_position(recovered.min(total) as u64);

        let mut run = DocumentRun {
            document: &document,
            state,
            output: &output,
            mode: self.settings.output_mode,
            partial_marker: &self.settings.partial_marker,
            deadline: self.settings.document_timeout.map(|budget| started + budget),
            bar,
        };
        info!(
            "Translating {:?} → {:?} ({} values, {} lines, {} resumed)",
            input,
            output,
            run.state.fields.len(),
            run.state.lines.len(),
            recovered
        );

        let mut batches = Vec::new();
        let mut stop_reason = None;

        let values = document.field_values();
        let pending = run.state.pending_fields(&self.settings.failure_marker);
        if !pending.is_empty() {
            let translator = self.engine.translator(JobKind::FrontMatter);
            let mut orchestrator =
                BatchOrchestrator::new(&translator, &values, pending, &stem, self.settings.front_matter.clone());
            stop_reason = self.drive(&mut orchestrator, &mut run, Slots::Fields).await?;
            batches.extend(orchestrator.into_outcomes());
        }

        let lines = document.content_texts();
        let pending = run.state.pending_lines(&self.settings.failure_marker);
        if stop_reason.is_none() && !pending.is_empty() {
            if self.settings.metadata_only {
                stop_reason = Some("metadata only".to_string());
            } else {
                let translator = self.engine.translator(JobKind::Body);
                let mut orchestrator =
                    BatchOrchestrator::new(&translator, &lines, pending, &stem, self.settings.body.clone());
                stop_reason = self.drive(&mut orchestrator, &mut run, Slots::Lines).await?;
                batches.extend(orchestrator.into_outcomes());
            }
        }

        // Also covers documents with nothing left to translate
        run.flush()?;
        run.bar.finish_and_clear();

        // Resumed failure markers keep the state complete even when they were never retried
        let status = if stop_reason.is_none() && run.state.is_complete() {
            DocumentStatus::Completed
        } else {
            DocumentStatus::Partial
        };
        if let Some(reason) = &stop_reason {
            warn!("{:?} stopped early: {}", input, reason);
        }
        let report = self.report(input, output.clone(), status, batches, &run.state, recovered, started, &usage_before, stop_reason);
        info!("{:?}: {}", output, report.summary());
        Ok(report)
    }

    fn initial_state(&self, document: &Document, output: &Path) -> Result<(TranslationState, usize), AppError> {
        if self.settings.overwrite || self.settings.debug || !output.exists() {
            return Ok((document.new_state(), 0));
        }

        let existing = FileManager::read_to_string(output).map_err(|e| AppError::File(e.to_string()))?;
        let resumed = document.resume(
            &existing,
            self.settings.output_mode,
            &self.settings.failure_marker,
            &self.settings.partial_marker,
        );
        debug!("Recovered {} entries from {:?}", resumed.recovered, output);
        Ok((resumed.state, resumed.recovered))
    }

    /// Step an orchestrator until it finishes or the time budget runs out.
    /// Returns the reason when stopped early.
    async fn drive<T: BatchTranslator + ?Sized>(
        &self,
        orchestrator: &mut BatchOrchestrator<'_, T>,
        run: &mut DocumentRun<'_>,
        slots: Slots,
    ) -> Result<Option<String>, AppError> {
        loop {
            if run.expired() {
                return Ok(Some(format!(
                    "time budget exhausted with {} lines left",
                    orchestrator.remaining()
                )));
            }
            let event = match orchestrator.step().await {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(None),
                Err(e) => {
                    run.flush()?;
                    run.bar.abandon();
                    return Err(e.into());
                }
            };
            if run.apply(slots, event) {
                run.flush()?;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        input: &Path,
        output: PathBuf,
        status: DocumentStatus,
        batches: Vec<BatchOutcome>,
        state: &TranslationState,
        recovered: usize,
        started: Instant,
        usage_before: &TokenUsageStats,
        stop_reason: Option<String>,
    ) -> DocumentReport {
        DocumentReport {
            source: input.to_path_buf(),
            output,
            status,
            batches,
            translated_lines: state.translated_count(&self.settings.failure_marker),
            failed_lines: state.failed_count(&self.settings.failure_marker),
            recovered_lines: recovered,
            elapsed: started.elapsed(),
            usage: self.engine.usage().since(usage_before),
            stop_reason,
        }
    }
}
