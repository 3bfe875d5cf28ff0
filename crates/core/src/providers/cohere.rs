use super::{
    check_dimension, embedding_http_error, generation_http_error, non_empty_key, process_text,
    embedding_body, generation_body, GenerationDefaults,
};
use crate::error::{EmbeddingError, GenerationError};
use crate::models::{DocumentType, GenerationMessage, Role};
use crate::traits::{EmbeddingCapability, GenerationCapability, LlmProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const BACKEND: &str = "COHERE";
const DEFAULT_BASE_URL: &str = "https://api.cohere.ai/v1";

pub struct CohereProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    defaults: GenerationDefaults,
    generation_model_id: Option<String>,
    embedding_model_id: Option<String>,
    embedding_size: Option<usize>,
}

impl CohereProvider {
    pub fn new(client: Client, api_key: Option<String>, defaults: GenerationDefaults) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            defaults,
            generation_model_id: None,
            embedding_model_id: None,
            embedding_size: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_chat_request<'a>(
        &self,
        model: &'a str,
        prompt: &str,
        chat_history: &[GenerationMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> ChatRequest<'a> {
        let limit = self.defaults.max_input_characters;
        ChatRequest {
            model,
            message: process_text(prompt, limit),
            chat_history: chat_history
                .iter()
                .map(|message| HistoryMessage {
                    role: map_role(message.role),
                    message: process_text(&message.content, limit),
                })
                .filter(|message| !message.message.is_empty())
                .collect(),
            max_tokens,
            temperature,
        }
    }
}

fn map_role(role: Role) -> &'static str {
    match role {
        Role::System => "SYSTEM",
        Role::User => "USER",
        Role::Assistant => "CHATBOT",
    }
}

fn input_type(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Document => "search_document",
        DocumentType::Query => "search_query",
    }
}

fn parse_chat(body: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|error| GenerationError::Malformed {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })?;
    parsed
        .text
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| GenerationError::EmptyResponse {
            backend: BACKEND.to_string(),
        })
}

fn parse_embed(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: EmbedResponse =
        serde_json::from_str(body).map_err(|error| EmbeddingError::Malformed {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })?;
    parsed
        .embeddings
        .float
        .into_iter()
        .next()
        .filter(|vector| !vector.is_empty())
        .ok_or_else(|| EmbeddingError::Malformed {
            backend: BACKEND.to_string(),
            details: "no float embeddings in response".to_string(),
        })
}

#[async_trait]
impl GenerationCapability for CohereProvider {
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

        let body = self.build_chat_request(
            model,
            prompt,
            chat_history,
            max_output_tokens.unwrap_or(self.defaults.max_output_tokens),
            temperature.unwrap_or(self.defaults.temperature),
        );
        debug!(backend = BACKEND, history = body.chat_history.len(), "sending chat");

        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| generation_http_error(BACKEND, error))?;

        let payload = generation_body(BACKEND, response).await?;

        parse_chat(&payload)
    }

    fn max_input_characters(&self) -> usize {
        self.defaults.max_input_characters
    }
}

#[async_trait]
impl EmbeddingCapability for CohereProvider {
    fn set_embedding_model(&mut self, model_id: &str, embedding_size: usize) {
        self.embedding_model_id = Some(model_id.to_string());
        self.embedding_size = Some(embedding_size);
        info!(backend = BACKEND, model_id, embedding_size, "embedding model set");
    }

    fn embedding_size(&self) -> Option<usize> {
        self.embedding_size
    }

    async fn embed_text(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let api_key =
            non_empty_key(&self.api_key).ok_or_else(|| EmbeddingError::MissingCredentials {
                backend: BACKEND.to_string(),
            })?;
        let (model, size) = match (self.embedding_model_id.as_deref(), self.embedding_size) {
            (Some(model), Some(size)) => (model, size),
            _ => {
                return Err(EmbeddingError::ModelNotSet {
                    backend: BACKEND.to_string(),
                })
            }
        };

        let body = EmbedRequest {
            model,
            texts: vec![process_text(text, self.defaults.max_input_characters)],
            input_type: input_type(document_type),
            embedding_types: ["float"],
        };

        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| embedding_http_error(BACKEND, error))?;

        let payload = embedding_body(BACKEND, response).await?;

        check_dimension(parse_embed(&payload)?, size)
    }
}

impl LlmProvider for CohereProvider {
    fn name(&self) -> &'static str {
        BACKEND
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: String,
    chat_history: Vec<HistoryMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct HistoryMessage {
    role: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: Vec<String>,
    input_type: &'static str,
    embedding_types: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: FloatEmbeddings,
}

#[derive(Debug, Deserialize)]
struct FloatEmbeddings {
    #[serde(default)]
    float: Vec<Vec<f32>>,
}
