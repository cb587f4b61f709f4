use anyhow::{anyhow, Context, Result};
use log::{warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::file_utils::FileManager;
use crate::translation::batch::{FailureFallback, OrchestratorSettings};
use crate::translation::core::context_length_for_model;
use crate::translation::document::OutputMode;
use crate::translation::profiles::ProfileSet;
use crate::translation::quality::{JudgeMode, QualityConfig};
use crate::translation::stream::StreamGuardConfig;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Completion service connection
    #[serde(default)]
    pub service: ServiceConfig,

    /// Source language code (ISO)
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Target language code (ISO)
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Batching, output and prompt settings
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Stream guard thresholds
    #[serde(default)]
    pub stream: StreamGuardConfig,

    /// Quality gate thresholds and judge mode
    #[serde(default)]
    pub quality: QualityConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// OpenAI-compatible completion service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    // @field: Base URL of the chat completions API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    // @field: Bearer token, empty for none
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Model name
    #[serde(default = "default_model")]
    pub model: String,

    // @field: Timeout seconds for a whole streamed request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // @field: Context window in tokens, derived from the model name when absent
    #[serde(default)]
    pub max_context_length: Option<usize>,
}

impl ServiceConfig {
    // @returns: Context window used for the token budget
    pub fn context_length(&self) -> usize {
        self.max_context_length
            .unwrap_or_else(|| context_length_for_model(&self.model))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            max_context_length: None,
        }
    }
}

/// Translation settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    // @field: Lines per batch before any degradation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    // @field: Neighbouring lines shown on each side of a batch
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    // @field: Accepted batches before the size grows back by one step
    #[serde(default = "default_grow_after_successes")]
    pub grow_after_successes: usize,

    // @field: Divisor applied to the batch size on failure
    #[serde(default = "default_degrade_factor")]
    pub degrade_factor: usize,

    // @field: Retries of a transient service failure
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,

    // @field: Fixed delay between retries
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,

    // @field: Wall-clock budget per document, 0 for none
    #[serde(default)]
    pub document_timeout_secs: u64,

    // @field: Bilingual or target-only output
    #[serde(default)]
    pub output_mode: OutputMode,

    // @field: Replay the previous exchange as conversation history
    #[serde(default = "default_true")]
    pub carry_previous_exchange: bool,

    // @field: Sentinel the model appends after the last line
    #[serde(default = "default_end_marker")]
    pub end_marker: String,

    // @field: Written for a line that could not be translated
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,

    // @field: Closes an incomplete output file
    #[serde(default = "default_partial_marker")]
    pub partial_marker: String,

    // @field: Timestamped output names, never resumed
    #[serde(default)]
    pub debug: bool,

    // @field: Translate front matter only
    #[serde(default)]
    pub metadata_only: bool,

    // @field: Ignore existing output instead of resuming
    #[serde(default)]
    pub overwrite: bool,

    // @field: System prompt template file
    #[serde(default)]
    pub preface_file: Option<String>,

    // @field: Terminology table appended to the system prompt
    #[serde(default)]
    pub terminology_file: Option<String>,

    // @field: Few-shot sample conversation
    #[serde(default)]
    pub sample_file: Option<String>,

    // @field: JSON overrides of the generation profiles
    #[serde(default)]
    pub profiles_file: Option<String>,

    // @field: Audit log directory, empty to disable
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    // @field: Lines per batch in the enhancement pass
    #[serde(default = "default_enhancement_batch_size")]
    pub enhancement_batch_size: usize,
}

impl TranslationConfig {
    /// Orchestrator settings for body translation
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            batch_size: self.batch_size,
            context_lines: self.context_lines,
            retry_count: self.retry_count,
            retry_wait: Duration::from_millis(self.retry_wait_ms),
            carry_previous: self.carry_previous_exchange,
            fallback: FailureFallback::Marker(self.failure_marker.clone()),
            grow_after: self.grow_after_successes,
            degrade_factor: self.degrade_factor,
        }
    }

    /// Front-matter values are short and unrelated, so no context and no carry
    pub fn front_matter_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            context_lines: 0,
            carry_previous: false,
            ..self.orchestrator_settings()
        }
    }

    /// Enhancement keeps the draft when a line cannot be improved
    pub fn enhancement_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            batch_size: self.enhancement_batch_size,
            context_lines: 0,
            carry_previous: false,
            fallback: FailureFallback::Source,
            ..self.orchestrator_settings()
        }
    }

    pub fn document_timeout(&self) -> Option<Duration> {
        (self.document_timeout_secs > 0).then(|| Duration::from_secs(self.document_timeout_secs))
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            context_lines: default_context_lines(),
            grow_after_successes: default_grow_after_successes(),
            degrade_factor: default_degrade_factor(),
            retry_count: default_retry_count(),
            retry_wait_ms: default_retry_wait_ms(),
            document_timeout_secs: 0,
            output_mode: OutputMode::default(),
            carry_previous_exchange: true,
            end_marker: default_end_marker(),
            failure_marker: default_failure_marker(),
            partial_marker: default_partial_marker(),
            debug: false,
            metadata_only: false,
            overwrite: false,
            preface_file: None,
            terminology_file: None,
            sample_file: None,
            profiles_file: None,
            log_dir: default_log_dir(),
            enhancement_batch_size: default_enhancement_batch_size(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

/// Values given on the command line, applied over the file before validation
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub batch_size: Option<usize>,
    pub output_mode: Option<OutputMode>,
    pub judge_mode: Option<JudgeMode>,
    pub log_level: Option<LogLevel>,
    pub document_timeout_secs: Option<u64>,
    pub overwrite: bool,
    pub debug: bool,
    pub metadata_only: bool,
}

fn default_endpoint() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_model() -> String {
    "Qwen/Qwen3-32B".to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_source_language() -> String {
    "ja".to_string()
}

fn default_target_language() -> String {
    "zh".to_string()
}

fn default_batch_size() -> usize {
    20
}

fn default_context_lines() -> usize {
    5
}

fn default_grow_after_successes() -> usize {
    1
}

fn default_degrade_factor() -> usize {
    2
}

fn default_retry_count() -> usize {
    3
}

fn default_retry_wait_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_end_marker() -> String {
    "[翻译完成]".to_string()
}

fn default_failure_marker() -> String {
    "[翻译未完成]".to_string()
}

fn default_partial_marker() -> String {
    "[未完待续：以下内容尚未翻译]".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_enhancement_batch_size() -> usize {
    10
}

impl Config {
    /// Load the configuration file, writing a default one when it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let text = FileManager::read_to_string(path)?;
            return serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config file: {:?}", path));
        }

        warn!("Config file not found at {:?}, creating default config.", path);
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        FileManager::write_atomic(path, &json)
            .with_context(|| format!("Failed to write default config to file: {:?}", path))?;
        Ok(config)
    }

    /// Apply command line values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(endpoint) = &overrides.endpoint {
            self.service.endpoint = endpoint.clone();
        }
        if let Some(api_key) = &overrides.api_key {
            self.service.api_key = api_key.clone();
        }
        if let Some(model) = &overrides.model {
            self.service.model = model.clone();
        }
        if let Some(source) = &overrides.source_language {
            self.source_language = source.clone();
        }
        if let Some(target) = &overrides.target_language {
            self.target_language = target.clone();
        }
        if let Some(batch_size) = overrides.batch_size {
            self.translation.batch_size = batch_size;
        }
        if let Some(mode) = overrides.output_mode {
            self.translation.output_mode = mode;
        }
        if let Some(mode) = overrides.judge_mode {
            self.quality.judge_mode = mode;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        if let Some(secs) = overrides.document_timeout_secs {
            self.translation.document_timeout_secs = secs;
        }
        self.translation.overwrite |= overrides.overwrite;
        self.translation.debug |= overrides.debug;
        self.translation.metadata_only |= overrides.metadata_only;
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        // Validate languages
        let _source_name = crate::language_utils::get_language_name(&self.source_language)?;
        let _target_name = crate::language_utils::get_language_name(&self.target_language)?;

        url::Url::parse(&self.service.endpoint)
            .with_context(|| format!("Invalid service endpoint: {}", self.service.endpoint))?;
        if self.service.model.trim().is_empty() {
            return Err(anyhow!("A model name is required"));
        }

        let t = &self.translation;
        if t.batch_size < 1 {
            return Err(anyhow!("batch_size must be at least 1"));
        }
        if t.enhancement_batch_size < 1 {
            return Err(anyhow!("enhancement_batch_size must be at least 1"));
        }
        if t.degrade_factor < 2 {
            return Err(anyhow!("degrade_factor must be at least 2, got {}", t.degrade_factor));
        }
        if t.grow_after_successes < 1 {
            return Err(anyhow!("grow_after_successes must be at least 1"));
        }
        if t.end_marker.trim().is_empty() || t.failure_marker.trim().is_empty() || t.partial_marker.trim().is_empty() {
            return Err(anyhow!("end, failure and partial markers must not be empty"));
        }

        self.quality.validate()?;

        let profiles = ProfileSet::load(
            &t.end_marker,
            &self.quality.judge_end_marker,
            t.profiles_file.as_deref().map(Path::new),
        )?;
        profiles.validate()?;

        for file in [&t.preface_file, &t.terminology_file, &t.sample_file].into_iter().flatten() {
            if !PathBuf::from(file).is_file() {
                return Err(anyhow!("Prompt file not found: {}", file));
            }
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            service: ServiceConfig::default(),
            source_language: default_source_language(),
            target_language: default_target_language(),
            translation: TranslationConfig::default(),
            stream: StreamGuardConfig::default(),
            quality: QualityConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}
