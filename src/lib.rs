/*!
 * # linewise
 *
 * Adaptive line-batch translation of long plain-text documents through an
 * OpenAI-compatible streaming LLM service.
 *
 * ## Features
 *
 * - Line-preserving translation: every source line gets exactly one output line
 * - Streaming with repetition guards, a watchdog and an end-of-output sentinel
 * - Numbered alignment with a positional fallback
 * - Rule-based quality checks with an optional model judge (with bisection)
 * - Adaptive batch size: halve on failure, grow back on success
 * - Incremental, atomic output with resume from partial files
 * - Bilingual or target-only output, YAML-style front-matter fields
 * - Enhancement pass over existing bilingual output
 * - ISO 639-1 and ISO 639-2 language code support
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `translation`: the engine:
 *   - `translation::stream`: Streaming client and guards
 *   - `translation::align`: Output aligner
 *   - `translation::quality`: Quality gate
 *   - `translation::batch`: Batch orchestrator
 *   - `translation::pipeline`: Per-document driver
 * - `file_utils`: File system operations
 * - `app_controller`: Main application controller
 * - `language_utils`: ISO language code utilities
 * - `providers`: Completion service clients
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::{Controller, RunSummary};
pub use errors::{AppError, ProviderError, TranslationError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use translation::{DocumentReport, DocumentStatus, PipelineDriver, TranslationEngine};
