/*!
 * Tests for file utility functions
 */

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::common;
use linewise::file_utils::FileManager;
use linewise::translation::document::OutputMode;

/// Inputs are .txt files in natural order, generated outputs excluded
#[test]
fn test_find_inputs_withDirectory_shouldSortNaturallyAndSkipOutputs() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let dir = temp_dir.path();
    for name in ["ch10.txt", "ch2.txt", "ch1.txt", "ch1_bilingual.txt", "ch2_zh.txt", "notes.md"] {
        common::create_test_file(dir, name, "本文")?;
    }

    let found = FileManager::find_inputs(&[dir.to_path_buf()], "zh", None)?;
    let names: Vec<String> = found
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();

    assert_eq!(names, vec!["ch1.txt", "ch2.txt", "ch10.txt"]);
    Ok(())
}

#[test]
fn test_find_inputs_withLimit_shouldTruncate() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    for i in 1..=4 {
        common::create_test_file(temp_dir.path(), &format!("part{}.txt", i), "本文")?;
    }

    let found = FileManager::find_inputs(&[temp_dir.path().to_path_buf()], "zh", Some(2))?;

    assert_eq!(found.len(), 2);
    assert!(found[0].ends_with("part1.txt"));
    Ok(())
}

#[test]
fn test_find_inputs_withExplicitFile_shouldKeepIt() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let file = common::create_test_file(temp_dir.path(), "story.txt", "本文")?;

    let found = FileManager::find_inputs(&[file.clone()], "zh", None)?;

    assert_eq!(found, vec![file]);
    Ok(())
}

#[test]
fn test_output_path_shouldFollowMode() {
    let input = Path::new("/books/story.txt");

    assert_eq!(
        FileManager::output_path(input, OutputMode::Bilingual, "zh", None),
        PathBuf::from("/books/story_bilingual.txt")
    );
    assert_eq!(
        FileManager::output_path(input, OutputMode::TargetOnly, "zh", None),
        PathBuf::from("/books/story_zh.txt")
    );
    assert_eq!(
        FileManager::output_path(input, OutputMode::Bilingual, "zh", Some("20260101-120000")),
        PathBuf::from("/books/story_bilingual_debug_20260101-120000.txt")
    );
}

#[test]
fn test_output_path_withThreeLetterTarget_shouldUseShortestCode() {
    let input = Path::new("/books/story.txt");

    assert_eq!(
        FileManager::output_path(input, OutputMode::TargetOnly, "eng", None),
        PathBuf::from("/books/story_en.txt")
    );
    assert!(FileManager::is_generated_output(Path::new("story_zh.txt"), "chi"));
}

#[test]
fn test_is_generated_output_shouldRecognizeSuffixes() {
    assert!(FileManager::is_generated_output(Path::new("a_bilingual.txt"), "zh"));
    assert!(FileManager::is_generated_output(Path::new("a_zh.txt"), "zh"));
    assert!(FileManager::is_generated_output(Path::new("a_bilingual_debug_1.txt"), "zh"));
    assert!(!FileManager::is_generated_output(Path::new("a_en.txt"), "zh"));
    assert!(!FileManager::is_generated_output(Path::new("a.txt"), "zh"));
}

/// Atomic writes replace the file and leave no temporary behind
#[test]
fn test_write_atomic_shouldReplaceContent() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("out.txt");

    FileManager::write_atomic(&path, "first\n")?;
    FileManager::write_atomic(&path, "second\n")?;

    assert_eq!(fs::read_to_string(&path)?, "second\n");
    assert_eq!(fs::read_dir(temp_dir.path())?.count(), 1);
    Ok(())
}

#[test]
fn test_append_to_log_file_shouldCreateParentsAndAppend() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("logs").join("run.log");

    FileManager::append_to_log_file(&path, "one")?;
    FileManager::append_to_log_file(&path, "two")?;

    let content = fs::read_to_string(&path)?;
    assert!(content.contains("one"));
    assert!(content.find("two") > content.find("one"));
    Ok(())
}
