/*!
 * Full application lifecycle through the controller
 */

use anyhow::Result;
use std::sync::Arc;

use crate::common;
use linewise::providers::mock::MockProvider;
use linewise::{Controller, DocumentStatus};

/// A directory run translates inputs in natural order up to the limit
#[tokio::test]
async fn test_runTranslate_withDirectoryAndLimit_shouldProcessFirstFiles() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    for name in ["chapter10.txt", "chapter2.txt", "chapter1.txt"] {
        common::create_test_file(temp_dir.path(), name, "物語が始まる。\n")?;
    }
    let provider = MockProvider::working();
    let controller = Controller::with_config(common::test_config()).with_progress(false);

    let summary = controller
        .run_translate_with_provider(Arc::new(provider.clone()), &[temp_dir.path().to_path_buf()], Some(2))
        .await?;

    assert_eq!(summary.documents.len(), 2);
    assert_eq!(summary.count(DocumentStatus::Completed), 2);
    assert!(summary.failures.is_empty());
    assert!(summary.documents[0].source.ends_with("chapter1.txt"));
    assert!(summary.documents[1].source.ends_with("chapter2.txt"));
    assert!(temp_dir.path().join("chapter2_bilingual.txt").exists());
    assert!(!temp_dir.path().join("chapter10_bilingual.txt").exists());
    assert_eq!(summary.usage.requests, 2);
    Ok(())
}

/// Second run over the same directory resumes and skips finished outputs
#[tokio::test]
async fn test_runTranslate_twice_shouldSkipFinishedDocuments() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    common::create_test_document(temp_dir.path(), "novel.txt")?;
    let provider = MockProvider::working();
    let controller = Controller::with_config(common::test_config()).with_progress(false);
    let inputs = [temp_dir.path().to_path_buf()];

    controller.run_translate_with_provider(Arc::new(provider.clone()), &inputs, None).await?;
    let requests_after_first = provider.request_count();
    let summary = controller.run_translate_with_provider(Arc::new(provider.clone()), &inputs, None).await?;

    // the bilingual output itself is not picked up as an input
    assert_eq!(summary.documents.len(), 1);
    assert_eq!(summary.count(DocumentStatus::Skipped), 1);
    assert_eq!(provider.request_count(), requests_after_first);
    Ok(())
}

/// An unreachable service stops the run before any document is touched
#[tokio::test]
async fn test_runTranslate_withUnreachableService_shouldFailFast() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    common::create_test_file(temp_dir.path(), "a.txt", "一行。\n")?;
    let provider = MockProvider::unreachable();
    let controller = Controller::with_config(common::test_config()).with_progress(false);

    let result = controller
        .run_translate_with_provider(Arc::new(provider.clone()), &[temp_dir.path().to_path_buf()], None)
        .await;

    let err = result.err().expect("run should fail");
    assert!(err.is_fatal());
    assert_eq!(provider.request_count(), 0);
    assert!(!temp_dir.path().join("a_bilingual.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_runTranslate_withMissingInput_shouldReturnFileError() {
    let controller = Controller::with_config(common::test_config()).with_progress(false);

    let result = controller
        .run_translate_with_provider(
            Arc::new(MockProvider::working()),
            &["/nonexistent/input/dir".into()],
            None,
        )
        .await;

    assert!(matches!(result, Err(linewise::AppError::File(_))));
}

/// Missing files are recorded and the other files are still enhanced
#[tokio::test]
async fn test_runEnhance_withMissingFile_shouldRecordFailureAndContinue() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let good = common::create_test_file(
        temp_dir.path(),
        "story_bilingual.txt",
        &format!("三行目です。\n{}\n", common::FAILURE_MARKER),
    )?;
    let missing = temp_dir.path().join("gone_bilingual.txt");
    let controller = Controller::with_config(common::test_config()).with_progress(false);

    let summary = controller
        .run_enhance_with_provider(Arc::new(MockProvider::working()), &[missing.clone(), good])
        .await?;

    assert_eq!(summary.enhanced.len(), 1);
    assert_eq!(summary.enhanced[0].improved, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, missing);
    Ok(())
}
