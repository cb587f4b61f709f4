/*!
 * Tests for provider implementations and the streaming client
 */

use std::sync::Arc;

use linewise::errors::ProviderError;
use linewise::providers::mock::MockProvider;
use linewise::providers::openai::SseDecoder;
use linewise::providers::{ChatMessage, ChatRequest, Provider};
use linewise::translation::profiles::GenerationProfile;
use linewise::translation::stream::{StreamGuardConfig, StreamingClient, TerminationReason};

fn translate_request(lines: &str) -> ChatRequest {
    ChatRequest::new(
        "mock-model",
        vec![ChatMessage::system("translate"), ChatMessage::user(format!("[Translate]\n{}", lines))],
    )
}

fn client(provider: MockProvider) -> StreamingClient {
    StreamingClient::new(Arc::new(provider), StreamGuardConfig::default())
}

/// The reply stops at the end marker without waiting for the stream to close
#[tokio::test]
async fn test_streamingClient_withWorkingProvider_shouldStopAtSentinel() {
    let profile = GenerationProfile::translation("[翻译完成]");
    let outcome = client(MockProvider::working())
        .complete(translate_request("1. 猫がいる。\n2. 犬もいる。"), &profile, "test")
        .await
        .unwrap();

    assert_eq!(outcome.reason, TerminationReason::SentinelMatch);
    assert!(outcome.reason.is_clean());
    assert!(outcome.text.starts_with("1. 译猫がいる。\n2. 译犬もいる。"));
}

#[tokio::test]
async fn test_streamingClient_withRepeatingFragment_shouldTripGuard() {
    let profile = GenerationProfile::translation("[翻译完成]");
    let outcome = client(MockProvider::repeating("哈", 500))
        .complete(translate_request("1. はは"), &profile, "test")
        .await
        .unwrap();

    assert_eq!(outcome.reason, TerminationReason::RepetitionGuard);
    assert!(outcome.text.chars().count() < 500);
}

#[tokio::test]
async fn test_streamingClient_withTruncatedReply_shouldReportLengthCutoff() {
    let profile = GenerationProfile::translation("[翻译完成]");
    let outcome = client(MockProvider::truncated())
        .complete(translate_request("1. 一\n2. 二\n3. 三\n4. 四"), &profile, "test")
        .await
        .unwrap();

    assert_eq!(outcome.reason, TerminationReason::LengthCutoff);
    assert!(!outcome.reason.is_clean());
    assert!(!outcome.text.contains("[翻译完成]"));
}

/// Failures before the first fragment surface as errors
#[tokio::test]
async fn test_streamingClient_withFailingProviders_shouldReturnErrors() {
    let profile = GenerationProfile::translation("[翻译完成]");

    let unreachable = client(MockProvider::unreachable())
        .complete(translate_request("1. 一"), &profile, "test")
        .await;
    assert!(matches!(unreachable, Err(ProviderError::ConnectionError(_))));

    let overflow = client(MockProvider::context_overflow())
        .complete(translate_request("1. 一"), &profile, "test")
        .await;
    assert!(matches!(overflow, Err(ProviderError::ContextOverflow(_))));
}

#[tokio::test]
async fn test_mockProvider_scripted_shouldReplayInOrderThenWork() {
    let provider = MockProvider::scripted(vec!["1. 第一次".to_string()]);
    let profile = GenerationProfile::translation("[翻译完成]");
    let client = client(provider.clone());

    let first = client.complete(translate_request("1. 一回目"), &profile, "a").await.unwrap();
    let second = client.complete(translate_request("1. 二回目"), &profile, "b").await.unwrap();

    assert_eq!(first.text, "1. 第一次");
    assert!(second.text.starts_with("1. 译二回目"));
    assert_eq!(provider.request_count(), 2);
    assert!(provider.requests()[1].last_content().contains("二回目"));
}

#[tokio::test]
async fn test_mockProvider_testConnection_shouldFailOnlyWhenUnreachable() {
    assert!(MockProvider::working().test_connection().await.is_ok());
    assert!(MockProvider::failing().test_connection().await.is_ok());
    assert!(MockProvider::unreachable().test_connection().await.is_err());
}

/// Feeding one byte at a time yields the same text as one big chunk
#[test]
fn test_sseDecoder_byteByByte_shouldMatchWholeFeed() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"1. 你好\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"，世界\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    let mut whole = SseDecoder::default();
    let expected: String = whole
        .feed(body.as_bytes())
        .into_iter()
        .map(|c| c.unwrap().delta)
        .collect();

    let mut split = SseDecoder::default();
    let mut text = String::new();
    for byte in body.as_bytes() {
        for chunk in split.feed(std::slice::from_ref(byte)) {
            text.push_str(&chunk.unwrap().delta);
        }
    }

    assert_eq!(expected, "1. 你好，世界");
    assert_eq!(text, expected);
    assert!(split.is_done());
}
