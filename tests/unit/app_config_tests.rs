/*!
 * Tests for application configuration
 */

use anyhow::Result;

use crate::common;
use linewise::app_config::{Config, ConfigOverrides, LogLevel};
use linewise::translation::document::OutputMode;
use linewise::translation::quality::JudgeMode;

/// A missing config file is created with defaults
#[test]
fn test_load_or_create_withMissingFile_shouldWriteDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("conf.json");

    let config = Config::load_or_create(&path)?;

    assert!(path.exists());
    assert_eq!(config.source_language, "ja");
    assert_eq!(config.target_language, "zh");
    let reloaded = Config::load_or_create(&path)?;
    assert_eq!(reloaded.translation.batch_size, config.translation.batch_size);
    Ok(())
}

/// Fields left out of the file take their defaults
#[test]
fn test_load_or_create_withPartialFile_shouldFillDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        temp_dir.path(),
        "conf.json",
        r#"{
            "target_language": "en",
            "service": { "model": "local-model" },
            "translation": { "batch_size": 7, "output_mode": "target_only" },
            "quality": { "judge_mode": "primary" }
        }"#,
    )?;

    let config = Config::load_or_create(&path)?;

    assert_eq!(config.target_language, "en");
    assert_eq!(config.source_language, "ja");
    assert_eq!(config.service.model, "local-model");
    assert_eq!(config.service.endpoint, "http://localhost:8000/v1");
    assert_eq!(config.translation.batch_size, 7);
    assert_eq!(config.translation.output_mode, OutputMode::TargetOnly);
    assert_eq!(config.translation.failure_marker, "[翻译未完成]");
    assert_eq!(config.quality.judge_mode, JudgeMode::Primary);
    assert!(config.validate().is_ok());
    Ok(())
}

#[test]
fn test_load_or_create_withInvalidJson_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), "conf.json", "{ not json")?;

    assert!(Config::load_or_create(&path).is_err());
    Ok(())
}

#[test]
fn test_apply_overrides_shouldReplaceOnlyGivenValues() {
    let mut config = Config::default();
    let overrides = ConfigOverrides {
        model: Some("other-model".to_string()),
        batch_size: Some(4),
        log_level: Some(LogLevel::Debug),
        document_timeout_secs: Some(90),
        overwrite: true,
        ..Default::default()
    };

    config.apply_overrides(&overrides);

    assert_eq!(config.service.model, "other-model");
    assert_eq!(config.translation.batch_size, 4);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.translation.document_timeout().map(|d| d.as_secs()), Some(90));
    assert!(config.translation.overwrite);
    assert!(!config.translation.debug);
    assert_eq!(config.target_language, "zh");
}

#[test]
fn test_validate_withBadValues_shouldFail() {
    let mut config = Config::default();
    config.target_language = "??".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.service.endpoint = "not a url".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.translation.batch_size = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.translation.degrade_factor = 1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.translation.sample_file = Some("/nonexistent/samples.txt".to_string());
    assert!(config.validate().is_err());
}

/// Profile overrides are read and validated along with the config
#[test]
fn test_validate_withProfilesFile_shouldCheckOverrides() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let good = common::create_test_file(temp_dir.path(), "good.json", r#"{ "translation": { "temperature": 0.3 } }"#)?;
    let bad = common::create_test_file(temp_dir.path(), "bad.json", "[1, 2")?;

    let mut config = Config::default();
    config.translation.profiles_file = Some(good.to_string_lossy().to_string());
    assert!(config.validate().is_ok());

    config.translation.profiles_file = Some(bad.to_string_lossy().to_string());
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn test_orchestratorSettings_shouldDeriveFromTranslationConfig() {
    let mut config = Config::default();
    config.translation.batch_size = 12;
    config.translation.enhancement_batch_size = 3;
    config.translation.retry_wait_ms = 0;

    let body = config.translation.orchestrator_settings();
    let front = config.translation.front_matter_settings();
    let enhance = config.translation.enhancement_settings();

    assert_eq!(body.batch_size, 12);
    assert_eq!(body.retry_wait.as_millis(), 0);
    assert_eq!(front.context_lines, 0);
    assert!(!front.carry_previous);
    assert_eq!(enhance.batch_size, 3);
}
