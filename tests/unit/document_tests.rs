/*!
 * Tests for document parsing, rendering and resume
 */

use linewise::translation::document::{Document, FieldKind, OutputMode};

const FAIL: &str = "[翻译未完成]";
const PARTIAL: &str = "[未完待续：以下内容尚未翻译]";

const NOVEL: &str = "---\ntitle: \"星の海\"\ncaption: 旅の記録\nseries:\n  title: 航海記\n  id: 3\ntags: [冒険, SF]\nauthor: 某\n---\n第一章\n\n　船は静かに港を出た。\n";

#[test]
fn test_parse_shouldCollectTranslatableValuesInOrder() {
    let doc = Document::parse(NOVEL);
    let fm = doc.front_matter.as_ref().unwrap();

    let kinds: Vec<FieldKind> = fm.fields.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![FieldKind::Title, FieldKind::Caption, FieldKind::SeriesTitle, FieldKind::Tag, FieldKind::Tag]
    );
    assert_eq!(doc.field_values(), vec!["星の海", "旅の記録", "航海記", "冒険", "SF"]);
    assert_eq!(doc.content_texts(), vec!["第一章", "　船は静かに港を出た。"]);
}

#[test]
fn test_render_bilingual_withFullState_shouldKeepStructure() {
    let doc = Document::parse(NOVEL);
    let mut state = doc.new_state();
    state.fields = ["星之海", "旅行记录", "航海记", "冒险", "科幻"]
        .iter()
        .map(|v| Some(v.to_string()))
        .collect();
    state.lines = vec![Some("第一章".to_string()), Some("　船静静地驶出了港口。".to_string())];

    let rendered = doc.render(&state, OutputMode::Bilingual, PARTIAL);

    assert!(rendered.contains("title: \"星の海\"\ntitle: \"星之海\"\n"));
    assert!(rendered.contains("  title: 航海記\n  title: 航海记\n  id: 3\n"));
    assert!(rendered.contains("tags: [冒险, 科幻]"));
    assert!(rendered.contains("author: 某\n---\n"));
    assert!(rendered.ends_with("第一章\n第一章\n\n　船は静かに港を出た。\n　船静静地驶出了港口。\n"));
    assert!(!rendered.contains(PARTIAL));
}

#[test]
fn test_render_targetOnly_withMissingValue_shouldStopInFrontMatter() {
    let doc = Document::parse(NOVEL);
    let mut state = doc.new_state();
    state.fields[0] = Some("星之海".to_string());

    let rendered = doc.render(&state, OutputMode::TargetOnly, PARTIAL);

    assert!(rendered.starts_with("---\ntitle: \"星之海\"\n"));
    assert!(rendered.ends_with(&format!("\n\n{}\n", PARTIAL)));
    assert!(!rendered.contains("船"));
}

/// Failure markers stay in place but count as pending so the lines are attempted again
#[test]
fn test_resume_withFailureMarker_shouldLeaveLinePending() {
    let doc = Document::parse("一行目です。\n二行目です。\n三行目です。\n");
    let mut state = doc.new_state();
    state.lines = vec![
        Some("第一行。".to_string()),
        Some(FAIL.to_string()),
        Some("第三行。".to_string()),
    ];
    let rendered = doc.render(&state, OutputMode::Bilingual, PARTIAL);

    let resumed = doc.resume(&rendered, OutputMode::Bilingual, FAIL, PARTIAL);

    assert_eq!(resumed.recovered, 2);
    assert_eq!(resumed.state.pending_lines(FAIL), vec![1]);
    assert_eq!(resumed.state.lines[1].as_deref(), Some(FAIL));
    assert_eq!(resumed.state.lines[2].as_deref(), Some("第三行。"));

    // Rendering the resumed state keeps the lines after the marker
    assert_eq!(doc.render(&resumed.state, OutputMode::Bilingual, PARTIAL), rendered);
}

/// An output of a different source stops recovery at the first mismatch
#[test]
fn test_resume_withEditedSource_shouldStopAtDivergence() {
    let old = Document::parse("一行目です。\n二行目です。\n");
    let mut state = old.new_state();
    state.lines = vec![Some("第一行。".to_string()), Some("第二行。".to_string())];
    let rendered = old.render(&state, OutputMode::Bilingual, PARTIAL);

    let edited = Document::parse("一行目です。\n書き直した行。\n");
    let resumed = edited.resume(&rendered, OutputMode::Bilingual, FAIL, PARTIAL);

    assert_eq!(resumed.recovered, 1);
    assert_eq!(resumed.state.pending_lines(FAIL), vec![1]);
}

#[test]
fn test_translationState_counts_shouldSeparateFailures() {
    let doc = Document::parse("a\nb\nc\n");
    let mut state = doc.new_state();
    assert!(!state.is_complete());

    state.lines = vec![Some("x".into()), Some(FAIL.into()), Some("z".into())];

    assert!(state.is_complete());
    assert_eq!(state.translated_count(FAIL), 2);
    assert_eq!(state.failed_count(FAIL), 1);
}
