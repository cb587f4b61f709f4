/*!
 * Tests for the quality gate: rule tier, judge escalation and bisection
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use linewise::errors::TranslationError;
use linewise::translation::core::CallSite;
use linewise::translation::quality::judge::{parse_line_verdicts, parse_verdict};
use linewise::translation::quality::{
    bisect, JudgeBackend, JudgeMode, QualityConfig, QualityGate, RuleChecker, RuleIssue, Verdict,
};

/// Judges a pair BAD when its target contains `bad_word`; records every call
#[derive(Debug)]
struct KeywordJudge {
    bad_word: &'static str,
    calls: Mutex<Vec<String>>,
}

impl KeywordJudge {
    fn new(bad_word: &'static str) -> Self {
        Self {
            bad_word,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl JudgeBackend for KeywordJudge {
    async fn judge_block(&self, _site: CallSite<'_>, pairs: &[(&str, &str)]) -> Result<Verdict, TranslationError> {
        self.calls.lock().push(format!("block:{}", pairs.len()));
        let bad = pairs.iter().any(|(_, target)| target.contains(self.bad_word));
        Ok(if bad { Verdict::Bad } else { Verdict::Good })
    }

    async fn judge_lines(&self, _site: CallSite<'_>, pairs: &[(&str, &str)]) -> Result<Vec<Verdict>, TranslationError> {
        self.calls.lock().push(format!("lines:{}", pairs.len()));
        Ok(pairs
            .iter()
            .map(|(_, target)| if target.contains(self.bad_word) { Verdict::Bad } else { Verdict::Good })
            .collect())
    }
}

fn site() -> CallSite<'static> {
    CallSite::new("doc", "doc[1-8]")
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_rules_withDegenerateOutputs_shouldFlagEach() {
    let checker = RuleChecker::new(QualityConfig::default());

    assert_eq!(checker.check("今日は晴れです。", "", false), vec![RuleIssue::EmptyTranslation]);
    assert_eq!(checker.check("今日は晴れです。", "今天晴。", true), vec![RuleIssue::Missing]);
    assert!(matches!(
        checker.check("今日は晴れです。", "无法翻译这一行。", false)[0],
        RuleIssue::Refusal(_)
    ));
    assert!(checker
        .check("今日は晴れです。", "今", false)
        .iter()
        .any(|i| matches!(i, RuleIssue::LengthRatio(_))));
    assert!(checker
        .check("ああ、そうだ。", &"啊".repeat(20), false)
        .iter()
        .any(|i| matches!(i, RuleIssue::CharRepetition { ch: '啊', .. })));
    assert!(checker
        .check("長い文章", &"字".repeat(3).repeat(30), false)
        .iter()
        .any(|i| matches!(i, RuleIssue::MissingPunctuation(_))));
}

#[test]
fn test_rules_withBlankSourceOrGoodTranslation_shouldPass() {
    let checker = RuleChecker::new(QualityConfig::default());

    assert!(checker.check("   ", "", true).is_empty());
    assert!(checker.check("今日は晴れです。", "今天是晴天。", false).is_empty());
    // short lines skip the ratio check
    assert!(checker.check("はい", "好的，我明白了。", false).is_empty());
}

/// The source's own repetition does not count against the translation
#[test]
fn test_rules_withRepetitionInSource_shouldNotFlag() {
    let checker = RuleChecker::new(QualityConfig::default());
    let source = format!("{}！", "あ".repeat(20));
    let target = format!("{}！", "啊".repeat(20));

    assert!(checker.check(&source, &target, false).is_empty());
}

#[test]
fn test_parseVerdicts_shouldReadLastAndNumbered() {
    assert_eq!(parse_verdict("<think>BAD?</think>Overall: GOOD"), Verdict::Good);
    assert_eq!(parse_verdict("no idea"), Verdict::Bad);
    assert_eq!(
        parse_line_verdicts("1. GOOD\n**2.** BAD\n", 3),
        vec![Verdict::Good, Verdict::Bad, Verdict::Bad]
    );
}

/// A single bad line among eight is isolated by halving
#[tokio::test]
async fn test_bisect_withOneBadLine_shouldNarrowDown() {
    let judge = KeywordJudge::new("坏");
    let targets = ["好1", "好2", "好3", "好4", "好5", "坏6", "好7", "好8"];
    let pairs: Vec<(&str, &str)> = targets.iter().map(|t| ("原文", *t)).collect();

    let result = bisect(&judge, site(), &pairs, 2).await;

    let expected: Vec<Verdict> = targets
        .iter()
        .map(|t| if t.contains('坏') { Verdict::Bad } else { Verdict::Good })
        .collect();
    assert_eq!(result.verdicts, expected);
    assert_eq!(result.calls, judge.calls().len());
    // first half clears at once, the bad pair gets one per-line call
    assert_eq!(
        judge.calls(),
        vec!["block:8", "block:4", "block:4", "block:2", "lines:2", "block:2"]
    );
}

#[tokio::test]
async fn test_gate_escalate_withCleanBatch_shouldNotCallJudge() {
    let judge = Arc::new(KeywordJudge::new("坏"));
    let config = QualityConfig {
        judge_mode: JudgeMode::Escalate,
        ..QualityConfig::default()
    };
    let gate = QualityGate::new(config, Some(judge.clone() as Arc<dyn JudgeBackend>));

    let verdicts = gate
        .evaluate(site(), &strings(&["今日は晴れ。"]), &strings(&["今天晴天。"]), &[])
        .await;

    assert!(!verdicts.needs_retranslation());
    assert_eq!(verdicts.judge_calls, 0);
    assert!(judge.calls().is_empty());
}

/// The judge can overrule a soft rule rejection but never a hard one
#[tokio::test]
async fn test_gate_escalate_shouldLetJudgeOverruleSoftIssuesOnly() {
    let judge = Arc::new(KeywordJudge::new("坏"));
    let config = QualityConfig {
        judge_mode: JudgeMode::Escalate,
        ..QualityConfig::default()
    };
    let gate = QualityGate::new(config, Some(judge.clone() as Arc<dyn JudgeBackend>));

    // line 0: length ratio (soft); line 1: empty translation (hard)
    let sources = strings(&["ありがとうございました。", "さようなら。"]);
    let targets = strings(&["谢", ""]);
    let verdicts = gate.evaluate(site(), &sources, &targets, &[]).await;

    assert_eq!(verdicts.verdicts, vec![Verdict::Good, Verdict::Bad]);
    assert_eq!(verdicts.rejected(), vec![1]);
    assert!(verdicts.judge_calls >= 1);
}

/// The judge sees every batch and cannot clear any rule rejection
#[tokio::test]
async fn test_gate_primary_shouldJudgeEveryBatchAndKeepRuleRejections() {
    let judge = Arc::new(KeywordJudge::new("坏"));
    let config = QualityConfig {
        judge_mode: JudgeMode::Primary,
        ..QualityConfig::default()
    };
    let gate = QualityGate::new(config, Some(judge.clone() as Arc<dyn JudgeBackend>));

    // line 2 is copied through untranslated, which the judge does not object to
    let sources = strings(&["一文目。", "二文目。", "お兄ちゃん、待って！"]);
    let targets = strings(&["第一句。", "坏句子。", "お兄ちゃん、待って！"]);
    let verdicts = gate.evaluate(site(), &sources, &targets, &[]).await;

    assert_eq!(verdicts.rejected(), vec![1, 2]);
    assert_eq!(judge.calls()[0], "block:3");
}

#[tokio::test]
async fn test_gate_withoutJudge_shouldFallBackToRules() {
    let config = QualityConfig {
        judge_mode: JudgeMode::Primary,
        ..QualityConfig::default()
    };
    let gate = QualityGate::new(config, None);

    assert_eq!(gate.mode(), JudgeMode::Disabled);
    let verdicts = gate
        .evaluate(site(), &strings(&["お元気ですか。"]), &strings(&["お元気ですか。"]), &[])
        .await;
    assert!(verdicts.needs_retranslation());
}
