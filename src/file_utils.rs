use anyhow::{Result, Context};
use chrono::Local;
use std::cmp::Ordering;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::language_utils::normalize_to_part1_or_part2t;
use crate::translation::document::OutputMode;

// @module: File and directory utilities

/// Extension of translatable input documents
pub const INPUT_EXTENSION: &str = "txt";

const BILINGUAL_SUFFIX: &str = "_bilingual";
const DEBUG_INFIX: &str = "_debug_";

/// One piece of a natural sort key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyPart {
    Number(u64),
    Text(String),
}

/// Sort key comparing digit runs by value, so `2.txt` sorts before `10.txt`
fn natural_key(name: &str) -> Vec<KeyPart> {
    let mut parts = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();

    for c in name.chars() {
        if c.is_ascii_digit() {
            if !text.is_empty() {
                parts.push(KeyPart::Text(std::mem::take(&mut text).to_lowercase()));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                parts.push(KeyPart::Number(std::mem::take(&mut digits).parse().unwrap_or(u64::MAX)));
            }
            text.push(c);
        }
    }
    if !digits.is_empty() {
        parts.push(KeyPart::Number(digits.parse().unwrap_or(u64::MAX)));
    }
    if !text.is_empty() {
        parts.push(KeyPart::Text(text.to_lowercase()));
    }
    parts
}

/// Shortest ISO form of the target code for file names; unknown codes are kept as given
fn language_suffix(code: &str) -> String {
    normalize_to_part1_or_part2t(code).unwrap_or_else(|_| code.trim().to_string())
}

pub fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    let name = |p: &Path| p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    natural_key(&name(a)).cmp(&natural_key(&name(b)))
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Replace a file's content atomically: a temporary file in the same
    /// directory is written, then renamed over the target.
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::ensure_dir(&dir)?;

        let mut temp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary file in {:?}", dir))?;
        temp.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write temporary file for {:?}", path))?;
        temp.as_file().sync_all()?;
        temp.persist(path)
            .with_context(|| format!("Failed to move temporary file to {:?}", path))?;
        Ok(())
    }

    /// Append content to a log file with timestamp
    pub fn append_to_log_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                Self::ensure_dir(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {:?}", path.as_ref()))?;

        writeln!(file, "[{}] {}", timestamp, content)
            .with_context(|| format!("Failed to write to log file: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Whether a file name is one of our own outputs
    pub fn is_generated_output(path: &Path, target_language: &str) -> bool {
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let target_suffix = format!("_{}", language_suffix(target_language));
        stem.ends_with(BILINGUAL_SUFFIX) || stem.ends_with(&target_suffix) || stem.contains(DEBUG_INFIX)
    }

    /// Documents to translate: files as given, directories scanned one level
    /// deep for `.txt` files in natural order, our own outputs skipped.
    pub fn find_inputs(inputs: &[PathBuf], target_language: &str, limit: Option<usize>) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();

        for input in inputs {
            if input.is_file() {
                found.push(input.clone());
                continue;
            }
            if !input.is_dir() {
                return Err(anyhow::anyhow!("Input does not exist: {:?}", input));
            }

            let mut files = Vec::new();
            for entry in WalkDir::new(input).min_depth(1).max_depth(1).follow_links(true) {
                let entry = entry.context("Failed to read directory entry")?;
                let path = entry.path();
                let is_input = path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(INPUT_EXTENSION));
                if is_input && !Self::is_generated_output(path, target_language) {
                    files.push(path.to_path_buf());
                }
            }
            files.sort_by(|a, b| natural_cmp(a, b));
            found.extend(files);
        }

        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    // @generates: Output path beside the input
    // @params: debug_stamp makes every debug run write a fresh file
    pub fn output_path(input: &Path, mode: OutputMode, target_language: &str, debug_stamp: Option<&str>) -> PathBuf {
        let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let suffix = match mode {
            OutputMode::Bilingual => BILINGUAL_SUFFIX.to_string(),
            OutputMode::TargetOnly => format!("_{}", language_suffix(target_language)),
        };
        let debug = debug_stamp.map(|stamp| format!("{}{}", DEBUG_INFIX, stamp)).unwrap_or_default();
        let name = format!("{}{}{}.{}", stem, suffix, debug, INPUT_EXTENSION);
        input.with_file_name(name)
    }

    /// Timestamp used in debug output names
    pub fn debug_stamp() -> String {
        Local::now().format("%Y%m%d-%H%M%S").to_string()
    }
}
