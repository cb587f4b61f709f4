/*!
 * Document pipeline.
 *
 * Sequences the work for one document:
 * 1. **Resume**: recover translations from an earlier output, if any
 * 2. **Front matter**: translate title, caption, series title and tags
 * 3. **Body**: translate content lines with context and carried history
 *
 * Output is rewritten after every batch, and a `DocumentReport` records
 * what happened.
 */

pub mod driver;
pub mod report;

pub use driver::{DriverSettings, PipelineDriver};
pub use report::{DocumentReport, DocumentStatus};
