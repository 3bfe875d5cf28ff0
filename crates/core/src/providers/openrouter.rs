use super::{generation_body, generation_http_error, non_empty_key, process_text, GenerationDefaults};
use crate::error::{EmbeddingError, GenerationError};
use crate::models::{DocumentType, GenerationMessage, Role};
use crate::traits::{EmbeddingCapability, GenerationCapability, LlmProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const BACKEND: &str = "OPENROUTER";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI-compatible chat completions through OpenRouter. Generation only.
pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    defaults: GenerationDefaults,
    site_url: String,
    site_name: String,
    generation_model_id: Option<String>,
}

impl OpenRouterProvider {
    pub fn new(client: Client, api_key: Option<String>, defaults: GenerationDefaults) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            defaults,
            site_url: "http://localhost:8000".to_string(),
            site_name: "RAG Application".to_string(),
            generation_model_id: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request<'a>(
        &self,
        model: &'a str,
        prompt: &str,
        chat_history: &[GenerationMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> ChatRequest<'a> {
        let limit = self.defaults.max_input_characters;
        let mut messages = chat_history
            .iter()
            .map(|message| ChatMessage {
                role: map_role(message.role),
                content: process_text(&message.content, limit),
            })
            .filter(|message| !message.content.is_empty())
            .collect::<Vec<_>>();

        messages.push(ChatMessage {
            role: map_role(Role::User),
            content: process_text(prompt, limit),
        });

        ChatRequest {
            model,
            messages,
            max_tokens,
            temperature,
        }
    }
}

fn map_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_completion(body: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|error| GenerationError::Malformed {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| GenerationError::EmptyResponse {
            backend: BACKEND.to_string(),
        })
}

#[async_trait]
impl GenerationCapability for OpenRouterProvider {
    fn set_generation_model(&mut self, model_id: &str) {
        self.generation_model_id = Some(model_id.to_string());
        info!(backend = BACKEND, model_id, "generation model set");
    }

    async fn generate_text(
        &self,
        prompt: &str,
        chat_history: &[GenerationMessage],
        max_output_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<String, GenerationError> {
        let api_key = non_empty_key(&self.api_key).ok_or_else(|| {
            GenerationError::MissingCredentials {
                backend: BACKEND.to_string(),
            }
        })?;
        let model = self
            .generation_model_id
            .as_deref()
            .ok_or_else(|| GenerationError::ModelNotSet {
                backend: BACKEND.to_string(),
            })?;

        let body = self.build_request(
            model,
            prompt,
            chat_history,
            max_output_tokens.unwrap_or(self.defaults.max_output_tokens),
            temperature.unwrap_or(self.defaults.temperature),
        );
        debug!(backend = BACKEND, messages = body.messages.len(), "sending chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.site_url)
            .header("X-Title", &self.site_name)
            .json(&body)
            .send()
            .await
            .map_err(|error| generation_http_error(BACKEND, error))?;

        let text = generation_body(BACKEND, response).await?;

        parse_completion(&text)
    }

    fn max_input_characters(&self) -> usize {
        self.defaults.max_input_characters
    }
}

#[async_trait]
impl EmbeddingCapability for OpenRouterProvider {
    fn set_embedding_model(&mut self, model_id: &str, _embedding_size: usize) {
        warn!(backend = BACKEND, model_id, "backend has no embeddings endpoint; model ignored");
    }

    fn embedding_size(&self) -> Option<usize> {
        None
    }

    async fn embed_text(
        &self,
        _text: &str,
        _document_type: DocumentType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unsupported {
            backend: BACKEND.to_string(),
        })
    }
}

impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        BACKEND
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::http_client;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn served_by(server_uri: &str, timeout: Duration) -> OpenRouterProvider {
        let client = http_client(timeout).expect("client");
        let mut provider =
            OpenRouterProvider::new(client, Some("key".to_string()), GenerationDefaults::default())
                .with_base_url(format!("{server_uri}/"));
        provider.set_generation_model("qwen/qwen3-4b:free");
        provider
    }

    fn provider(max_input_characters: usize) -> OpenRouterProvider {
        OpenRouterProvider::new(
            Client::new(),
            Some("key".to_string()),
            GenerationDefaults {
                max_input_characters,
                ..GenerationDefaults::default()
            },
        )
    }

    #[test]
    fn request_maps_roles_and_truncates_prompt() {
        let provider = provider(10);
        let history = vec![
            GenerationMessage::new(Role::System, "be brief and precise"),
            GenerationMessage::new(Role::Assistant, "   "),
        ];

        let request = provider.build_request("m", "a very long question", &history, 50, 0.2);
        let value = serde_json::to_value(&request).expect("serializable");

        assert_eq!(value["messages"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "be brief a");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "a very lon");
        assert_eq!(value["max_tokens"], 50);
    }

    #[test]
    fn completion_text_is_extracted() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  42 \n"}}]}"#;
        assert_eq!(parse_completion(body).expect("completion"), "42");
    }

    #[test]
    fn empty_choices_are_an_error() {
        let result = parse_completion(r#"{"choices":[]}"#);
        assert!(matches!(result, Err(GenerationError::EmptyResponse { .. })));

        let result = parse_completion(r#"{"choices":[{"message":{"content":""}}]}"#);
        assert!(matches!(result, Err(GenerationError::EmptyResponse { .. })));
    }

    #[test]
    fn non_json_body_is_malformed() {
        let result = parse_completion("<html>gateway</html>");
        assert!(matches!(result, Err(GenerationError::Malformed { .. })));
    }

    #[tokio::test]
    async fn embeddings_are_unsupported() {
        let result = provider(100).embed_text("text", DocumentType::Document).await;
        assert!(matches!(result, Err(EmbeddingError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn generation_without_model_fails_before_any_request() {
        let result = provider(100).generate_text("hi", &[], None, None).await;
        assert!(matches!(result, Err(GenerationError::ModelNotSet { .. })));
    }

    #[tokio::test]
    async fn generation_without_key_fails_before_any_request() {
        let mut provider = OpenRouterProvider::new(Client::new(), None, GenerationDefaults::default());
        provider.set_generation_model("m");
        let result = provider.generate_text("hi", &[], None, None).await;
        assert!(matches!(result, Err(GenerationError::MissingCredentials { .. })));
    }

    #[tokio::test]
    async fn completion_is_fetched_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"choices":[{"message":{"role":"assistant","content":"210 bar"}}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let provider = served_by(&server.uri(), Duration::from_secs(5));
        let text = provider.generate_text("pressure?", &[], None, None).await.expect("completion");
        assert_eq!(text, "210 bar");
    }

    #[tokio::test]
    async fn rejected_completion_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = served_by(&server.uri(), Duration::from_secs(5));
        let result = provider.generate_text("pressure?", &[], None, None).await;
        match result {
            Err(GenerationError::Backend { status, message, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stalled_completion_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let provider = served_by(&server.uri(), Duration::from_millis(200));
        let result = provider.generate_text("pressure?", &[], None, None).await;
        assert!(matches!(result, Err(GenerationError::Timeout { .. })));
    }

    #[tokio::test]
    async fn stalled_body_after_success_status_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = vec![0u8; 8192];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 200\r\n\r\n{\"choi")
                    .await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        });

        let provider = served_by(&format!("http://{address}"), Duration::from_millis(300));
        let result = provider.generate_text("pressure?", &[], None, None).await;
        assert!(matches!(result, Err(GenerationError::Timeout { .. })));
    }
}
