use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app_config::Config;
use crate::errors::{AppError, ProviderError};
use crate::file_utils::FileManager;
use crate::providers::openai::OpenAI;
use crate::providers::Provider;
use crate::translation::core::{TokenUsageStats, TranslationEngine};
use crate::translation::enhance::{EnhancementReport, Enhancer};
use crate::translation::pipeline::{DocumentReport, DocumentStatus, DriverSettings, PipelineDriver};

// @module: Application controller for document processing

/// Outcome of a whole run over several files
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub documents: Vec<DocumentReport>,
    pub enhanced: Vec<EnhancementReport>,
    /// Files that failed with a non-fatal error
    pub failures: Vec<(PathBuf, String)>,
    pub usage: TokenUsageStats,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(usage: TokenUsageStats) -> Self {
        Self {
            documents: Vec::new(),
            enhanced: Vec::new(),
            failures: Vec::new(),
            usage,
            elapsed: Duration::ZERO,
        }
    }

    pub fn count(&self, status: DocumentStatus) -> usize {
        self.documents.iter().filter(|d| d.status == status).count()
    }

    /// Log the per-document lines and the totals
    pub fn log(&self) {
        for report in &self.documents {
            info!("{:?}: {}", report.source, report.summary());
        }
        for report in &self.enhanced {
            info!("{:?}: {}", report.path, report.summary());
        }
        for (path, reason) in &self.failures {
            error!("{:?}: {}", path, reason);
        }
        if !self.documents.is_empty() {
            info!(
                "{} completed, {} partial, {} skipped, {} failed in {}",
                self.count(DocumentStatus::Completed),
                self.count(DocumentStatus::Partial),
                self.count(DocumentStatus::Skipped),
                self.failures.len(),
                Controller::format_duration(self.elapsed)
            );
        }
        for line in self.usage.summary().lines() {
            info!("{}", line);
        }
    }
}

/// Main application controller for document translation
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Draw progress bars
    show_progress: bool,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for the configured service
    pub fn create_provider(&self) -> Arc<dyn Provider> {
        let service = &self.config.service;
        Arc::new(OpenAI::new(&service.endpoint, &service.api_key, service.request_timeout_secs))
    }

    /// Fail fast when the service is unreachable or rejects the credentials
    async fn check_service(provider: &dyn Provider) -> Result<(), AppError> {
        match provider.test_connection().await {
            Ok(()) => Ok(()),
            Err(e @ (ProviderError::ConnectionError(_) | ProviderError::AuthenticationError(_))) => {
                Err(AppError::Provider(e))
            }
            Err(e) => {
                warn!("Connection check inconclusive ({}), continuing", e);
                Ok(())
            }
        }
    }

    fn engine(&self, provider: Arc<dyn Provider>) -> Result<Arc<TranslationEngine>, AppError> {
        let engine = TranslationEngine::from_config(&self.config, provider)
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(Arc::new(engine))
    }

    fn files_bar(&self, multi: &MultiProgress, count: usize) -> ProgressBar {
        if !self.show_progress || count < 2 {
            return ProgressBar::hidden();
        }
        let bar = multi.add(ProgressBar::new(count as u64));
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("=>-"));
        bar
    }

    /// Translate every input document with the configured service
    pub async fn run_translate(&self, inputs: &[PathBuf], limit: Option<usize>) -> Result<RunSummary, AppError> {
        let provider = self.create_provider();
        self.run_translate_with_provider(provider, inputs, limit).await
    }

    /// Translate every input document with the given service.
    ///
    /// A fatal error stops the run; any other per-file error is recorded and
    /// the next file is processed.
    pub async fn run_translate_with_provider(
        &self,
        provider: Arc<dyn Provider>,
        inputs: &[PathBuf],
        limit: Option<usize>,
    ) -> Result<RunSummary, AppError> {
        let started = Instant::now();
        let files = FileManager::find_inputs(inputs, &self.config.target_language, limit)
            .map_err(|e| AppError::File(e.to_string()))?;
        if files.is_empty() {
            warn!("No input documents found in {:?}", inputs);
        }

        Self::check_service(provider.as_ref()).await?;
        let engine = self.engine(provider)?;
        let multi = MultiProgress::new();
        let mut driver = PipelineDriver::new(Arc::clone(&engine), DriverSettings::from_config(&self.config));
        if self.show_progress {
            driver = driver.with_progress(multi.clone());
        }

        let files_bar = self.files_bar(&multi, files.len());
        let mut summary = RunSummary::new(engine.usage());
        for file in &files {
            files_bar.set_message(display_name(file));
            match driver.process_file(file).await {
                Ok(report) => summary.documents.push(report),
                Err(e) if e.is_fatal() => {
                    files_bar.abandon();
                    error!("Stopping the run: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Failed to process {:?}: {}", file, e);
                    summary.failures.push((file.clone(), e.to_string()));
                }
            }
            files_bar.inc(1);
        }
        files_bar.finish_and_clear();

        summary.usage = engine.usage();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// Revise existing bilingual outputs with the configured service
    pub async fn run_enhance(&self, files: &[PathBuf]) -> Result<RunSummary, AppError> {
        let provider = self.create_provider();
        self.run_enhance_with_provider(provider, files).await
    }

    pub async fn run_enhance_with_provider(
        &self,
        provider: Arc<dyn Provider>,
        files: &[PathBuf],
    ) -> Result<RunSummary, AppError> {
        let started = Instant::now();
        Self::check_service(provider.as_ref()).await?;
        let engine = self.engine(provider)?;
        let enhancer = Enhancer::from_config(Arc::clone(&engine), &self.config);

        let mut summary = RunSummary::new(engine.usage());
        for file in files {
            if !file.is_file() {
                summary.failures.push((file.clone(), "not a file".to_string()));
                continue;
            }
            match enhancer.enhance_file(file).await {
                Ok(report) => summary.enhanced.push(report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Failed to enhance {:?}: {}", file, e);
                    summary.failures.push((file.clone(), e.to_string()));
                }
            }
        }

        summary.usage = engine.usage();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}.{:03}s", seconds, duration.subsec_millis())
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
