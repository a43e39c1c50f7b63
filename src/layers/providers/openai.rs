use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderFailure;
use crate::layers::providers::{check_status, CompletionRequest, LlmAdapter, ProviderKind};

const OPENAI_BASE: &str = "https://api.openai.com";

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(client: Client, api_key: impl Into<String>, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.to_string(),
            base_url: OPENAI_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_completion_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let Some(schema) = &request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "structured_answer", "schema": schema},
            });
        }

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        tracing::debug!("Calling OpenAI model {}", self.model);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let parsed: ChatResponse = check_status(resp).await?.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_requests_structured_output() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-test",
                "response_format": {"type": "json_schema"}
            })))
            .with_status(200)
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "{\"gaps\": []}"}}]}"#)
            .create_async()
            .await;

        let adapter = OpenAiAdapter::new(Client::new(), "sk-test", "gpt-test").with_base_url(server.url());
        let request = CompletionRequest::new("find gaps").with_schema(json!({"type": "object"}));
        let text = adapter.complete(&request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, r#"{"gaps": []}"#);
    }

    #[tokio::test]
    async fn test_quota_errors_are_rate_limits() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error": {"code": "insufficient_quota"}}"#)
            .create_async()
            .await;

        let adapter = OpenAiAdapter::new(Client::new(), "sk-test", "gpt-test").with_base_url(server.url());
        let failure = adapter.complete(&CompletionRequest::new("q")).await.unwrap_err();
        assert_eq!(failure, ProviderFailure::RateLimited);
    }

    #[tokio::test]
    async fn test_missing_choices_yield_empty_text() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let adapter = OpenAiAdapter::new(Client::new(), "sk-test", "gpt-test").with_base_url(server.url());
        assert_eq!(adapter.complete(&CompletionRequest::new("q")).await.unwrap(), "");
    }
}
