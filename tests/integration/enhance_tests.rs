/*!
 * Enhancement pass over existing bilingual outputs
 */

use anyhow::Result;
use std::fs;

use crate::common::{self, FAILURE_MARKER};
use linewise::providers::mock::MockProvider;
use linewise::translation::Enhancer;

fn bilingual_fixture() -> String {
    format!(
        "---\ntitle: 題\ntitle: 题\n---\n今日はいい天気ですね。\n今天天气真好啊。\n\nそれでは、また明日。\n那么，明天见ね。\n三行目です。\n{}\n",
        FAILURE_MARKER
    )
}

/// Only lines with residual problems are sent for revision
#[tokio::test]
async fn test_enhanceFile_shouldReviseOnlyWeakLines() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), "story_bilingual.txt", &bilingual_fixture())?;
    let config = common::test_config();
    let provider = MockProvider::working();
    let enhancer = Enhancer::from_config(common::engine_for(&config, &provider)?, &config);

    let report = enhancer.enhance_file(&path).await?;

    assert_eq!(report.pairs, 3);
    assert_eq!(report.candidates, 2);
    assert_eq!(report.improved, 2);
    assert_eq!(provider.request_count(), 1);

    let request = &provider.requests()[0];
    assert!(request.last_content().contains("明天见ね"));
    assert!(!request.last_content().contains("今天天气真好啊"));

    let output = fs::read_to_string(&path)?;
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[..6], ["---", "title: 題", "title: 题", "---", "今日はいい天気ですね。", "今天天气真好啊。"]);
    assert_eq!(lines[8], "润色文文文文、文文明日。");
    assert_eq!(lines[10], "润色三行目文文。");
    assert!(!output.contains(FAILURE_MARKER));
    Ok(())
}

/// A revision that keeps failing leaves the draft in place
#[tokio::test]
async fn test_enhanceFile_withFailingService_shouldKeepDrafts() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let original = bilingual_fixture();
    let path = common::create_test_file(temp_dir.path(), "story_bilingual.txt", &original)?;
    let config = common::test_config();
    let enhancer = Enhancer::from_config(common::engine_for(&config, &MockProvider::failing())?, &config);

    let report = enhancer.enhance_file(&path).await?;

    assert_eq!(report.candidates, 2);
    assert_eq!(report.improved, 0);
    assert_eq!(fs::read_to_string(&path)?, original);
    Ok(())
}

#[tokio::test]
async fn test_enhanceFile_withCleanFile_shouldNotCallService() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), "clean_bilingual.txt", "一行目。\n第一行。\n")?;
    let config = common::test_config();
    let provider = MockProvider::working();
    let enhancer = Enhancer::from_config(common::engine_for(&config, &provider)?, &config);

    let report = enhancer.enhance_file(&path).await?;

    assert_eq!(report.candidates, 0);
    assert_eq!(provider.request_count(), 0);
    Ok(())
}
