// LLM backends and the manager that falls back between them
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::config::{Config, ProviderConfig};
use crate::error::{GapFinderError, ProviderAttempt, ProviderFailure, Result};

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// A completion must be longer than this (after trimming) to count as an answer.
const MIN_RESPONSE_CHARS: usize = 10;
const LLM_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-sonnet-4-5",
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Gemini => "gemini-2.5-flash",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" | "gpt" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown AI provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// JSON schema the answer should follow, when the backend can enforce one.
    pub schema: Option<Value>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            schema: None,
            max_tokens: 2000,
            temperature: 0.7,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Prompt text for backends without native schema support.
    pub(crate) fn prompt_with_schema_hint(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}\n\nRespond with JSON only, matching this JSON schema:\n{}",
                self.prompt, schema
            ),
            None => self.prompt.clone(),
        }
    }
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderFailure>;
}

/// Maps a non-success response onto a provider failure.
pub(crate) async fn check_status(resp: Response) -> std::result::Result<Response, ProviderFailure> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderFailure::RateLimited);
    }
    let body: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
    Err(ProviderFailure::Status {
        status: status.as_u16(),
        body,
    })
}

/// Finds the answer array in model output. A top-level object contributes its
/// `key` field, falling back to any other array field. Arrays embedded in prose
/// or code fences are tried in order; an array counts only when it is empty or
/// holds at least one element accepted by `is_item`, so citation markers such
/// as `[1]` are skipped.
pub fn extract_json_array(text: &str, key: &str, is_item: fn(&Value) -> bool) -> Option<Vec<Value>> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if let Some(items) = answer_array(value, key, is_item) {
            return Some(items);
        }
    }
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .find_map(|(i, _)| {
            let value = serde_json::Deserializer::from_str(&text[i..])
                .into_iter::<Value>()
                .next()?
                .ok()?;
            answer_array(value, key, is_item)
        })
}

fn answer_array(value: Value, key: &str, is_item: fn(&Value) -> bool) -> Option<Vec<Value>> {
    let accepts = |items: &[Value]| items.is_empty() || items.iter().any(is_item);
    match value {
        Value::Array(items) if accepts(&items[..]) => Some(items),
        Value::Object(mut fields) => {
            if let Some(Value::Array(items)) = fields.remove(key) {
                if accepts(&items[..]) {
                    return Some(items);
                }
            }
            fields.into_iter().find_map(|(_, v)| match v {
                Value::Array(items) if accepts(&items[..]) => Some(items),
                _ => None,
            })
        }
        _ => None,
    }
}

pub fn adapter_for(provider: &ProviderConfig, client: Client) -> Option<Box<dyn LlmAdapter>> {
    let key = provider.api_key.clone()?;
    let adapter: Box<dyn LlmAdapter> = match provider.kind {
        ProviderKind::Anthropic => Box::new(anthropic::AnthropicAdapter::new(client, key, &provider.model)),
        ProviderKind::OpenAi => Box::new(openai::OpenAiAdapter::new(client, key, &provider.model)),
        ProviderKind::Gemini => Box::new(gemini::GeminiAdapter::new(client, key, &provider.model)),
    };
    Some(adapter)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub provider: ProviderKind,
    pub text: String,
}

/// Tries each configured backend in preference order until one answers.
pub struct ProviderManager {
    adapters: Vec<Box<dyn LlmAdapter>>,
    retries: u32,
    backoff: Duration,
}

impl ProviderManager {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(LLM_TIMEOUT).build()?;
        let adapters: Vec<Box<dyn LlmAdapter>> = config
            .available_providers()
            .filter_map(|p| adapter_for(p, client.clone()))
            .collect();

        let manager = Self::with_adapters(adapters, config.provider_retries, config.provider_backoff);
        if manager.is_empty() {
            tracing::warn!("No AI providers available");
        } else {
            let names: Vec<_> = manager.providers().iter().map(|p| p.name()).collect();
            tracing::info!("AI providers available: {}", names.join(", "));
        }
        Ok(manager)
    }

    pub fn with_adapters(adapters: Vec<Box<dyn LlmAdapter>>, retries: u32, backoff: Duration) -> Self {
        Self {
            adapters,
            retries,
            backoff,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        self.adapters.iter().map(|a| a.kind()).collect()
    }

    /// Returns the first usable answer, or every provider's failure.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut failures = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let provider = adapter.kind();
            match self.try_provider(adapter.as_ref(), request).await {
                Ok(text) => {
                    tracing::info!("Successfully used {} provider", provider);
                    return Ok(Completion { provider, text });
                }
                Err(failure) => {
                    tracing::warn!("Provider {} failed: {}", provider, failure);
                    failures.push(ProviderAttempt {
                        provider: provider.name().to_string(),
                        failure,
                    });
                }
            }
        }

        Err(GapFinderError::ProviderUnavailable { failures })
    }

    async fn try_provider(
        &self,
        adapter: &dyn LlmAdapter,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderFailure> {
        let mut attempt = 0;
        loop {
            match adapter.complete(request).await {
                Ok(text) if text.trim().chars().count() > MIN_RESPONSE_CHARS => return Ok(text),
                Ok(_) => return Err(ProviderFailure::EmptyResponse),
                Err(failure) if failure.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(
                        "{} attempt {} failed ({}); retrying in {:?}",
                        adapter.kind(),
                        attempt,
                        failure,
                        self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays canned outcomes and counts calls.
    pub(crate) struct ScriptedAdapter {
        kind: ProviderKind,
        script: Mutex<VecDeque<std::result::Result<String, ProviderFailure>>>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl ScriptedAdapter {
        pub(crate) fn new(kind: ProviderKind, script: Vec<std::result::Result<String, ProviderFailure>>) -> Self {
            Self {
                kind,
                script: Mutex::new(script.into()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl LlmAdapter for ScriptedAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn complete(&self, _request: &CompletionRequest) -> std::result::Result<String, ProviderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderFailure::Transport("script exhausted".into())))
        }
    }

    fn manager(adapters: Vec<ScriptedAdapter>, retries: u32) -> ProviderManager {
        ProviderManager::with_adapters(
            adapters.into_iter().map(|a| Box::new(a) as Box<dyn LlmAdapter>).collect(),
            retries,
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("Google".parse::<ProviderKind>(), Ok(ProviderKind::Gemini));
        assert_eq!("openai".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert!("mistral".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
    }

    #[tokio::test]
    async fn test_first_provider_answer_is_used() {
        let first = ScriptedAdapter::new(ProviderKind::Anthropic, vec![Ok("a sufficiently long answer".into())]);
        let second = ScriptedAdapter::new(ProviderKind::OpenAi, vec![Ok("never consulted here".into())]);
        let second_calls = second.calls.clone();

        let completion = manager(vec![first, second], 1)
            .complete(&CompletionRequest::new("q"))
            .await
            .unwrap();

        assert_eq!(completion.provider, ProviderKind::Anthropic);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let anthropic = ScriptedAdapter::new(
            ProviderKind::Anthropic,
            vec![Err(ProviderFailure::Status { status: 401, body: "bad key".into() })],
        );
        let openai = ScriptedAdapter::new(ProviderKind::OpenAi, vec![Ok("tiny".into())]);
        let gemini = ScriptedAdapter::new(ProviderKind::Gemini, vec![Ok("[{\"gap\": \"answer\"}]".into())]);

        let completion = manager(vec![anthropic, openai, gemini], 0)
            .complete(&CompletionRequest::new("q"))
            .await
            .unwrap();

        assert_eq!(completion.provider, ProviderKind::Gemini);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_on_same_provider() {
        let flaky = ScriptedAdapter::new(
            ProviderKind::OpenAi,
            vec![Err(ProviderFailure::Timeout), Ok("the second try works".into())],
        );
        let calls = flaky.calls.clone();

        let completion = manager(vec![flaky], 1).complete(&CompletionRequest::new("q")).await.unwrap();

        assert_eq!(completion.provider, ProviderKind::OpenAi);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let broken = ScriptedAdapter::new(
            ProviderKind::OpenAi,
            vec![Err(ProviderFailure::Status { status: 400, body: String::new() })],
        );
        let calls = broken.calls.clone();

        let err = manager(vec![broken], 3).complete(&CompletionRequest::new("q")).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, GapFinderError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_all_providers_failing_reports_each() {
        let adapters = vec![
            ScriptedAdapter::new(ProviderKind::Anthropic, vec![Err(ProviderFailure::RateLimited)]),
            ScriptedAdapter::new(ProviderKind::OpenAi, vec![Ok("   ".into())]),
        ];

        match manager(adapters, 0).complete(&CompletionRequest::new("q")).await {
            Err(GapFinderError::ProviderUnavailable { failures }) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].provider, "anthropic");
                assert_eq!(failures[0].failure, ProviderFailure::RateLimited);
                assert_eq!(failures[1].failure, ProviderFailure::EmptyResponse);
            }
            other => panic!("expected ProviderUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_providers_is_unavailable() {
        let empty = ProviderManager::with_adapters(Vec::new(), 1, Duration::ZERO);
        assert!(empty.is_empty());
        let err = empty.complete(&CompletionRequest::new("q")).await.unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
    }

    #[test]
    fn test_extract_json_array_variants() {
        let strings = |text: &str| extract_json_array(text, "queries", Value::is_string).map(|v| v.len());
        assert_eq!(strings(r#"["a", "b"]"#), Some(2));
        assert_eq!(strings(r#"{"queries": ["a"], "note": "x"}"#), Some(1));
        let fenced = "Here you go:\n```json\n[{\"category\": \"temporal\"}]\n```";
        assert_eq!(extract_json_array(fenced, "gaps", Value::is_object).map(|v| v.len()), Some(1));
        assert!(strings("no structure at all").is_none());
        assert!(strings("] backwards [").is_none());
    }

    #[test]
    fn test_citation_markers_before_the_answer_are_skipped() {
        let text = "Papers [1] and [2] both skip field trials.\n```json\n[{\"category\": \"methodological\"}]\n```\nSee also [3].";
        let items = extract_json_array(text, "gaps", Value::is_object).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["category"], "methodological");
    }

    #[test]
    fn test_expected_key_wins_over_other_arrays() {
        let text = r#"{"analysis": [{"note": "overview"}], "gaps": [{"category": "theoretical"}, {"category": "temporal"}]}"#;
        let items = extract_json_array(text, "gaps", Value::is_object).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["category"], "theoretical");

        let wrapped = "Result: {\"queries\": [\"graph neural networks\"]} done";
        assert_eq!(extract_json_array(wrapped, "queries", Value::is_string).map(|v| v.len()), Some(1));
    }

    #[test]
    fn test_schema_hint_is_appended() {
        let request = CompletionRequest::new("List gaps").with_schema(serde_json::json!({"type": "object"}));
        assert!(request.prompt_with_schema_hint().contains("\"type\":\"object\""));
        assert_eq!(CompletionRequest::new("plain").prompt_with_schema_hint(), "plain");
    }
}
