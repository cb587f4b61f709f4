/*!
 * Line-batch translation engine.
 *
 * Submodules, bottom-up:
 *
 * - `profiles`: immutable generation profiles per kind of request
 * - `stream`: streaming client with repetition guards and watchdog
 * - `align`: mapping a free-form reply back onto the batch's lines
 * - `prompts`: conversation construction and line numbering
 * - `quality`: rule tier and model judge deciding whether to accept a batch
 * - `core`: one translation attempt, token budget and usage accounting
 * - `batch`: adaptive batch sizing, retries and degradation
 * - `document`: front matter, content lines, rendering and resume
 * - `pipeline`: per-document driver and reports
 * - `enhance`: revision pass over existing bilingual output
 * - `audit`: JSON-lines record of every request
 */

// Re-export main types for easier usage
pub use self::batch::{BatchOrchestrator, BatchTranslator, OrchestratorSettings};
pub use self::core::{TokenUsageStats, TranslationEngine};
pub use self::document::{Document, OutputMode};
pub use self::enhance::Enhancer;
pub use self::pipeline::{DocumentReport, DocumentStatus, PipelineDriver};

// Submodules
pub mod align;
pub mod audit;
pub mod batch;
pub mod core;
pub mod document;
pub mod enhance;
pub mod pipeline;
pub mod profiles;
pub mod prompts;
pub mod quality;
pub mod stream;
