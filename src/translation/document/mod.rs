/*!
 * Document modeling for line-batch translation.
 *
 * This module provides the document model the pipeline works on:
 * - Front-matter / body split with translatable field detection
 * - Content lines, the unit of translation
 * - Bilingual and target-only rendering, including partial output
 * - Resume from an earlier output file
 */

pub mod model;
pub mod resume;

pub use model::{ContentLine, Document, FieldKind, FrontMatter, OutputMode, TranslationState};
pub use resume::Resumed;
