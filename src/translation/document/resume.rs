/*!
 * Recovering translations from an earlier, possibly partial, output file.
 *
 * The existing output is walked in lockstep with the rendering the document
 * would produce. Everything up to the first line that does not fit is taken
 * as already translated. Failure markers are kept in the state, so the lines
 * after them survive a rewrite, and count as pending so they are retried.
 */

use log::debug;

use super::model::{Document, OutputMode, TranslationState};

/// Result of reading an earlier output back
#[derive(Debug, Clone, PartialEq)]
pub struct Resumed {
    pub state: TranslationState,
    /// Values and lines recovered, failure markers excluded
    pub recovered: usize,
}

struct Cursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    partial_marker: &'a str,
}

impl<'a> Cursor<'a> {
    /// Next output line, unless the output ends or reaches the partial marker
    fn next(&mut self) -> Option<&'a str> {
        let line = *self.lines.get(self.pos)?;
        if !self.partial_marker.is_empty() && line.trim() == self.partial_marker {
            return None;
        }
        self.pos += 1;
        Some(line)
    }

    /// Consume the next line only if it equals `expected`
    fn expect(&mut self, expected: &str) -> bool {
        match self.lines.get(self.pos) {
            Some(line) if line.trim_end() == expected.trim_end() => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }
}

impl Document {
    /// Translations recoverable from `existing`, an earlier output of this document.
    pub fn resume(&self, existing: &str, mode: OutputMode, failure_marker: &str, partial_marker: &str) -> Resumed {
        let mut state = self.new_state();
        let mut cursor = Cursor {
            lines: existing.lines().collect(),
            pos: 0,
            partial_marker,
        };
        let bilingual = mode == OutputMode::Bilingual;

        'walk: {
            if let Some(fm) = &self.front_matter {
                for (i, line) in fm.lines.iter().enumerate() {
                    let fields = fm.fields_on(i);
                    if fields.is_empty() {
                        if !cursor.expect(line) {
                            debug!("Resume stopped at front-matter line {}", i + 1);
                            break 'walk;
                        }
                        continue;
                    }
                    if bilingual && !cursor.expect(line) {
                        break 'walk;
                    }
                    let Some(values) = cursor.next().and_then(|rendered| fm.reread_line(i, rendered)) else {
                        debug!("Resume stopped at front-matter values on line {}", i + 1);
                        break 'walk;
                    };
                    for (slot, value) in state.fields[fields].iter_mut().zip(values) {
                        *slot = Some(value);
                    }
                }
            }

            for (i, line) in self.body.iter().enumerate() {
                let Some(c) = self.content_at(i) else {
                    match cursor.next() {
                        Some(out) if out.trim().is_empty() => continue,
                        _ => break 'walk,
                    }
                };
                if bilingual && !cursor.expect(line) {
                    debug!("Resume stopped at body line {}", i + 1);
                    break 'walk;
                }
                match cursor.next() {
                    Some(out) if !out.trim().is_empty() => {
                        state.lines[c] = Some(out.to_string());
                    }
                    _ => break 'walk,
                }
            }
        }

        let recovered = state
            .fields
            .iter()
            .chain(&state.lines)
            .flatten()
            .filter(|v| v.trim() != failure_marker)
            .count();
        Resumed { state, recovered }
    }
}
