//! OpenAI-compatible chat-completions backend.
//!
//! Works with any server exposing `POST {base_url}/chat/completions`
//! (OpenAI, vLLM, llama.cpp server, Ollama's OpenAI shim, ...).

use std::time::Duration;

use async_trait::async_trait;
use nexus_brain::{BrainError, GenerationRequest, LlmBackend};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const BACKEND: &str = "openai-like";

#[derive(Debug, Clone)]
pub struct OpenAiLikeConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Transport-level connect timeout. Generation itself is not bounded.
    pub connect_timeout: Duration,
}

impl Default for OpenAiLikeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl OpenAiLikeConfig {
    /// Read the API key from `key_env`; an unset or blank variable means no key.
    pub fn from_env(base_url: Option<&str>, key_env: &str) -> Self {
        let api_key = std::env::var(key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Self {
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            api_key,
            ..Self::default()
        }
    }
}

pub struct OpenAiLikeBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiLikeBackend {
    pub fn new(config: OpenAiLikeConfig) -> Result<Self, BrainError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| BrainError::RequestFailed {
                backend: BACKEND.into(),
                reason: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn build_request(request: &GenerationRequest) -> ChatRequest<'_> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.prompt,
    });
    ChatRequest {
        model: &request.model,
        messages,
        max_tokens: request.max_tokens,
    }
}

fn parse_success(body: &str) -> Result<String, BrainError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|err| invalid(err.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| invalid("no choices in response".to_string()))?;
    Ok(choice.message.content.unwrap_or_default())
}

fn parse_failure(status: u16, body: &str) -> BrainError {
    let reason = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("HTTP {status}: {}", envelope.error.message),
        Err(_) => format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()),
    };
    BrainError::RequestFailed {
        backend: BACKEND.into(),
        reason,
    }
}

fn invalid(reason: String) -> BrainError {
    BrainError::InvalidResponse {
        backend: BACKEND.into(),
        reason,
    }
}

fn transport(err: reqwest::Error) -> BrainError {
    BrainError::RequestFailed {
        backend: BACKEND.into(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl LlmBackend for OpenAiLikeBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, BrainError> {
        let body = build_request(&request);
        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        debug!(status = status.as_u16(), bytes = text.len(), model = %request.model, "Chat completion returned");

        if !status.is_success() {
            return Err(parse_failure(status.as_u16(), &text));
        }
        parse_success(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(system: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            model: "gpt-4o-mini".into(),
            system: system.map(str::to_string),
            prompt: "hi".into(),
            max_tokens: 32,
        }
    }

    #[test]
    fn system_prompt_leads_the_messages() {
        let req = request(Some("be terse"));
        let body = serde_json::to_value(build_request(&req)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "hi"}
                ],
                "max_tokens": 32
            })
        );

        let bare = request(Some("  "));
        let body = serde_json::to_value(build_request(&bare)).unwrap();
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn first_choice_content_is_returned() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"pong"}},{"message":{"content":"other"}}]}"#;
        assert_eq!(parse_success(body).unwrap(), "pong");
        assert_eq!(
            parse_success(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap(),
            ""
        );
        assert!(matches!(
            parse_success(r#"{"choices":[]}"#),
            Err(BrainError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn error_bodies_are_summarised() {
        let err = parse_failure(401, r#"{"error":{"message":"bad key","type":"auth"}}"#);
        assert!(err.to_string().contains("HTTP 401: bad key"));
        let err = parse_failure(502, "<html>bad gateway</html>");
        assert!(err.to_string().contains("HTTP 502: <html>"));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let backend = OpenAiLikeBackend::new(OpenAiLikeConfig {
            base_url: "http://localhost:8000/v1/".into(),
            ..OpenAiLikeConfig::default()
        })
        .unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:8000/v1/chat/completions");
    }
}
