/*!
 * End-to-end document translation through the pipeline driver
 */

use anyhow::Result;
use std::fs;
use std::time::Duration;

use crate::common::{self, FAILURE_MARKER, PARTIAL_MARKER};
use linewise::providers::mock::MockProvider;
use linewise::translation::document::OutputMode;
use linewise::translation::pipeline::{DriverSettings, PipelineDriver};
use linewise::DocumentStatus;

/// Every line is followed by its translation, front matter included
#[tokio::test]
async fn test_processFile_withWorkingService_shouldWriteBilingualOutput() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_document(temp_dir.path(), "dawn.txt")?;
    let provider = MockProvider::working();
    let driver = common::driver_for(&common::test_config(), &provider)?;

    let report = tokio_test::assert_ok!(driver.process_file(&input).await);

    assert_eq!(report.status, DocumentStatus::Completed);
    assert_eq!(report.output, temp_dir.path().join("dawn_bilingual.txt"));
    assert_eq!(report.translated_lines, 4);
    assert_eq!(report.failed_lines, 0);
    assert!(report.usage.requests >= 2);

    let output = fs::read_to_string(&report.output)?;
    let expected = concat!(
        "---\ntitle: 夜明けの街\ntitle: 译夜明けの街\nauthor: 山田\n---\n",
        "　朝の光が差し込む部屋で目を覚ました。\n　译朝の光が差し込む部屋で目を覚ました。\n\n",
        "窓の外では鳥が鳴いている。\n译窓の外では鳥が鳴いている。\n",
        "今日は特別な一日になる予感がした。\n译今日は特別な一日になる予感がした。\n",
    );
    assert_eq!(output, expected);
    Ok(())
}

#[tokio::test]
async fn test_processFile_targetOnly_shouldReplaceLines() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "short.txt", "猫が鳴いた。\n\n犬が走った。\n")?;
    let mut config = common::test_config();
    config.translation.output_mode = OutputMode::TargetOnly;
    let driver = common::driver_for(&config, &MockProvider::working())?;

    let report = driver.process_file(&input).await?;

    assert_eq!(report.output, temp_dir.path().join("short_zh.txt"));
    assert_eq!(fs::read_to_string(&report.output)?, "译猫が鳴いた。\n\n译犬が走った。\n");
    Ok(())
}

/// A partial output is picked up where it stopped
#[tokio::test]
async fn test_processFile_withPartialOutput_shouldResumeRemainingLines() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "resume.txt", "一行目の文章。\n二行目の文章。\n")?;
    common::create_test_file(
        temp_dir.path(),
        "resume_bilingual.txt",
        &format!("一行目の文章。\n先前的译文。\n\n{}\n", PARTIAL_MARKER),
    )?;
    let provider = MockProvider::working();
    let driver = common::driver_for(&common::test_config(), &provider)?;

    let report = driver.process_file(&input).await?;

    assert_eq!(report.status, DocumentStatus::Completed);
    assert_eq!(report.recovered_lines, 1);
    assert_eq!(provider.request_count(), 1);
    assert!(provider.requests()[0].last_content().contains("1. 二行目の文章。"));
    assert_eq!(
        fs::read_to_string(&report.output)?,
        "一行目の文章。\n先前的译文。\n二行目の文章。\n译二行目の文章。\n"
    );
    Ok(())
}

/// A complete output is left alone; overwrite starts over
#[tokio::test]
async fn test_processFile_withCompleteOutput_shouldSkipUnlessOverwrite() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "done.txt", "終わった話。\n")?;
    let provider = MockProvider::working();
    let config = common::test_config();

    common::driver_for(&config, &provider)?.process_file(&input).await?;
    let second = common::driver_for(&config, &provider)?.process_file(&input).await?;
    assert_eq!(second.status, DocumentStatus::Skipped);
    assert_eq!(provider.request_count(), 1);

    let mut config = config;
    config.translation.overwrite = true;
    let third = common::driver_for(&config, &provider)?.process_file(&input).await?;
    assert_eq!(third.status, DocumentStatus::Completed);
    assert_eq!(provider.request_count(), 2);
    Ok(())
}

/// A rejected batch is split and retried; the output stays complete
#[tokio::test]
async fn test_processFile_withRejectedBatch_shouldDegradeAndRecover() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "degrade.txt", "一つ目の文です。\n二つ目の文です。\n")?;
    // second line missing from the first reply
    let provider = MockProvider::scripted(vec!["1. 第一句话。\n[翻译完成]".to_string()]);
    let mut config = common::test_config();
    config.translation.batch_size = 2;
    let driver = common::driver_for(&config, &provider)?;

    let report = driver.process_file(&input).await?;

    assert_eq!(report.status, DocumentStatus::Completed);
    assert_eq!(report.degraded_batches(), 1);
    assert_eq!(report.failed_lines, 0);
    assert_eq!(provider.request_count(), 3);
    let output = fs::read_to_string(&report.output)?;
    assert!(output.contains("译一つ目の文です。"));
    assert!(output.contains("译二つ目の文です。"));
    Ok(())
}

/// Lines that never succeed get the failure marker and are retried next run
#[tokio::test]
async fn test_processFile_withFailingService_shouldWriteFailureMarkers() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "broken.txt", "一行目。\n二行目。\n")?;
    let driver = common::driver_for(&common::test_config(), &MockProvider::failing())?;

    let report = driver.process_file(&input).await?;

    assert_eq!(report.status, DocumentStatus::Completed);
    assert_eq!(report.failed_lines, 2);
    assert_eq!(report.translated_lines, 0);
    let output = fs::read_to_string(&report.output)?;
    assert_eq!(output.matches(FAILURE_MARKER).count(), 2);

    let retry = common::driver_for(&common::test_config(), &MockProvider::working())?;
    let report = retry.process_file(&input).await?;
    assert_eq!(report.recovered_lines, 0);
    assert_eq!(report.failed_lines, 0);
    assert!(!fs::read_to_string(&report.output)?.contains(FAILURE_MARKER));
    Ok(())
}

/// Losing the service aborts with a fatal error after flushing what exists
#[tokio::test]
async fn test_processFile_withUnreachableService_shouldFailFatally() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "offline.txt", "一行目。\n")?;
    let driver = common::driver_for(&common::test_config(), &MockProvider::unreachable())?;

    let err = driver.process_file(&input).await.unwrap_err();

    assert!(err.is_fatal());
    let output = fs::read_to_string(temp_dir.path().join("offline_bilingual.txt"))?;
    assert!(output.ends_with(&format!("{}\n", PARTIAL_MARKER)));
    Ok(())
}

/// An exhausted time budget leaves a partial file, not an error
#[tokio::test]
async fn test_processFile_withExhaustedBudget_shouldReturnPartial() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "slow.txt", "一行目。\n二行目。\n")?;
    let config = common::test_config();
    let provider = MockProvider::working();
    let mut settings = DriverSettings::from_config(&config);
    settings.document_timeout = Some(Duration::ZERO);
    let driver = PipelineDriver::new(common::engine_for(&config, &provider)?, settings);

    let report = driver.process_file(&input).await?;

    assert_eq!(report.status, DocumentStatus::Partial);
    assert!(report.stop_reason.as_deref().unwrap_or("").contains("time budget"));
    assert_eq!(provider.request_count(), 0);
    assert!(fs::read_to_string(&report.output)?.contains(PARTIAL_MARKER));
    Ok(())
}

fn write_output_with_marked_hole(dir: &std::path::Path) -> Result<std::path::PathBuf> {
    let input = common::create_test_file(dir, "hole.txt", "一行目。\n二行目。\n三行目。\n")?;
    common::create_test_file(
        dir,
        "hole_bilingual.txt",
        &format!("一行目。\n译一。\n二行目。\n{}\n三行目。\n译三。\n", FAILURE_MARKER),
    )?;
    Ok(input)
}

/// A fatal error while retrying a marked line keeps the translations after it
#[tokio::test]
async fn test_processFile_withMarkedHoleAndUnreachableService_shouldKeepLaterLines() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = write_output_with_marked_hole(temp_dir.path())?;
    let driver = common::driver_for(&common::test_config(), &MockProvider::unreachable())?;

    let err = driver.process_file(&input).await.unwrap_err();

    assert!(err.is_fatal());
    let output = fs::read_to_string(temp_dir.path().join("hole_bilingual.txt"))?;
    assert_eq!(
        output,
        format!("一行目。\n译一。\n二行目。\n{}\n三行目。\n译三。\n", FAILURE_MARKER)
    );
    Ok(())
}

/// Running out of time before retrying a marked line is partial and loses nothing
#[tokio::test]
async fn test_processFile_withMarkedHoleAndExhaustedBudget_shouldKeepLaterLines() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = write_output_with_marked_hole(temp_dir.path())?;
    let config = common::test_config();
    let provider = MockProvider::working();
    let mut settings = DriverSettings::from_config(&config);
    settings.document_timeout = Some(Duration::ZERO);
    let driver = PipelineDriver::new(common::engine_for(&config, &provider)?, settings);

    let report = driver.process_file(&input).await?;

    assert_eq!(report.status, DocumentStatus::Partial);
    assert_eq!(report.recovered_lines, 2);
    assert_eq!(provider.request_count(), 0);
    assert!(fs::read_to_string(&report.output)?.contains("译三。"));
    Ok(())
}

/// A working service fills in the marked line and leaves the rest as it was
#[tokio::test]
async fn test_processFile_withMarkedHole_shouldRetryOnlyThatLine() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = write_output_with_marked_hole(temp_dir.path())?;
    let provider = MockProvider::working();
    let driver = common::driver_for(&common::test_config(), &provider)?;

    let report = driver.process_file(&input).await?;

    assert_eq!(report.status, DocumentStatus::Completed);
    assert_eq!(provider.request_count(), 1);
    assert_eq!(
        fs::read_to_string(&report.output)?,
        "一行目。\n译一。\n二行目。\n译二行目。\n三行目。\n译三。\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_processFile_metadataOnly_shouldStopAfterFrontMatter() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_document(temp_dir.path(), "meta.txt")?;
    let mut config = common::test_config();
    config.translation.metadata_only = true;
    let provider = MockProvider::working();
    let driver = common::driver_for(&config, &provider)?;

    let report = driver.process_file(&input).await?;

    assert_eq!(report.status, DocumentStatus::Partial);
    assert_eq!(report.stop_reason.as_deref(), Some("metadata only"));
    assert_eq!(provider.request_count(), 1);
    let output = fs::read_to_string(&report.output)?;
    assert!(output.contains("title: 译夜明けの街"));
    assert!(output.ends_with(&format!("---\n\n{}\n", PARTIAL_MARKER)));
    Ok(())
}

/// Debug runs write a fresh timestamped file and never resume
#[tokio::test]
async fn test_processFile_debug_shouldWriteTimestampedOutput() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "trace.txt", "試しの行。\n")?;
    let mut config = common::test_config();
    config.translation.debug = true;
    let driver = common::driver_for(&config, &MockProvider::working())?;

    let report = driver.process_file(&input).await?;

    let name = report.output.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("trace_bilingual_debug_"));
    assert!(!temp_dir.path().join("trace_bilingual.txt").exists());
    Ok(())
}

/// Every request and response lands in the audit log
#[tokio::test]
async fn test_processFile_withLogDir_shouldWriteAuditLines() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "audited.txt", "記録する行。\n")?;
    let log_dir = temp_dir.path().join("logs");
    let mut config = common::test_config();
    config.translation.log_dir = log_dir.to_string_lossy().to_string();
    let driver = common::driver_for(&config, &MockProvider::working())?;

    driver.process_file(&input).await?;

    let logs: Vec<_> = fs::read_dir(&log_dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].file_name().unwrap().to_string_lossy().starts_with("audited_"));
    let content = fs::read_to_string(&logs[0])?;
    let entry: serde_json::Value = serde_json::from_str(content.lines().next().unwrap())?;
    assert_eq!(entry["document"], "audited");
    assert!(entry["reply"].as_str().unwrap_or("").contains("译記録する行。"));
    Ok(())
}
