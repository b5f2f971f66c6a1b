//! OpenAI-compatible chat completion client.
//!
//! One request, one text answer. The review pipeline treats the model as a
//! black box: it sends a list of chat messages and reads back the first
//! choice's content. No streaming, no tool calls, no retries (a failed
//! call aborts the delivery that issued it).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-request timeout for completion calls. Review prompts over large
/// change sets can take the model a while.
pub const COMPLETION_TIMEOUT_SECS: u64 = 120;

/// One chat turn in a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// The base URL is a constructor parameter so tests can point the client
/// at a local mock server.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(COMPLETION_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Model name the client is configured for.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_url.trim_end_matches('/'))
    }

    /// Send one completion request and return the first choice's content.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let payload = ChatRequest {
            model: &self.model,
            messages,
        };

        tracing::debug!(model = %self.model, turns = messages.len(), "requesting completion");
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("completion API error {status}: {body}");
        }

        let body: ChatResponse = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("completion response contained no choices"))?;

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-test",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": content}}
            ]
        })
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = CompletionClient::new("http://localhost:9/v1/", "k", "m").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9/v1/chat/completions");

        let client = CompletionClient::new("http://localhost:9/v1", "k", "m").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9/v1/chat/completions");
    }

    #[tokio::test]
    async fn complete_returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("looks fine")))
            .expect(1)
            .mount(&server)
            .await;

        let client = CompletionClient::new(server.uri(), "test-key", "gpt-test").unwrap();
        let answer = client
            .complete(&[ChatMessage::system("review this")])
            .await
            .unwrap();
        assert_eq!(answer, "looks fine");
    }

    #[tokio::test]
    async fn complete_sends_model_and_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&server)
            .await;

        let client = CompletionClient::new(server.uri(), "test-key", "gpt-test").unwrap();
        client
            .complete(&[
                ChatMessage::system("instructions"),
                ChatMessage::user("File: src/lib.rs"),
            ])
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["model"], "gpt-test");
        assert_eq!(sent["messages"][0]["role"], "system");
        assert_eq!(sent["messages"][1]["role"], "user");
        assert_eq!(sent["messages"][1]["content"], "File: src/lib.rs");
    }

    #[tokio::test]
    async fn complete_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let client = CompletionClient::new(server.uri(), "test-key", "gpt-test").unwrap();
        let err = client
            .complete(&[ChatMessage::system("review this")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn complete_fails_on_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-test",
                "choices": []
            })))
            .mount(&server)
            .await;

        let client = CompletionClient::new(server.uri(), "test-key", "gpt-test").unwrap();
        let err = client
            .complete(&[ChatMessage::system("review this")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }
}
