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

const BACKEND: &str = "GEMINI";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    defaults: GenerationDefaults,
    generation_model_id: Option<String>,
    embedding_model_id: Option<String>,
    embedding_size: Option<usize>,
}

impl GeminiProvider {
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

    /// System messages become the system instruction; the rest map onto the
    /// `user`/`model` turns Gemini accepts.
    fn build_generate_request(
        &self,
        prompt: &str,
        chat_history: &[GenerationMessage],
        max_output_tokens: u32,
        temperature: f32,
    ) -> GenerateRequest {
        let limit = self.defaults.max_input_characters;
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in chat_history {
            let text = process_text(&message.content, limit);
            if text.is_empty() {
                continue;
            }
            match map_role(message.role) {
                None => system_parts.push(Part { text }),
                Some(role) => contents.push(Content {
                    role: Some(role),
                    parts: vec![Part { text }],
                }),
            }
        }

        contents.push(Content {
            role: map_role(Role::User),
            parts: vec![Part {
                text: process_text(prompt, limit),
            }],
        });

        GenerateRequest {
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(Content {
                    role: None,
                    parts: system_parts,
                })
            },
            contents,
            generation_config: GenerationConfig {
                max_output_tokens,
                temperature,
            },
        }
    }

    fn build_embed_request(
        &self,
        model: &str,
        text: &str,
        document_type: DocumentType,
        size: usize,
    ) -> EmbedRequest {
        EmbedRequest {
            model: format!("models/{model}"),
            content: Content {
                role: None,
                parts: vec![Part {
                    text: process_text(text, self.defaults.max_input_characters),
                }],
            },
            task_type: task_type(document_type),
            output_dimensionality: size,
        }
    }
}

/// `None` marks the system role, which travels outside `contents`.
fn map_role(role: Role) -> Option<&'static str> {
    match role {
        Role::System => None,
        Role::User => Some("user"),
        Role::Assistant => Some("model"),
    }
}

fn task_type(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Document => "RETRIEVAL_DOCUMENT",
        DocumentType::Query => "RETRIEVAL_QUERY",
    }
}

fn parse_generation(body: &str) -> Result<String, GenerationError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|error| GenerationError::Malformed {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })?;

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .map(|text| text.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(GenerationError::EmptyResponse {
            backend: BACKEND.to_string(),
        });
    }
    Ok(text)
}

fn parse_embedding(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: EmbedResponse =
        serde_json::from_str(body).map_err(|error| EmbeddingError::Malformed {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })?;
    if parsed.embedding.values.is_empty() {
        return Err(EmbeddingError::Malformed {
            backend: BACKEND.to_string(),
            details: "empty embedding".to_string(),
        });
    }
    Ok(parsed.embedding.values)
}

#[async_trait]
impl GenerationCapability for GeminiProvider {
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

        let body = self.build_generate_request(
            prompt,
            chat_history,
            max_output_tokens.unwrap_or(self.defaults.max_output_tokens),
            temperature.unwrap_or(self.defaults.temperature),
        );
        debug!(backend = BACKEND, turns = body.contents.len(), "sending generateContent");

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| generation_http_error(BACKEND, error))?;

        let text = generation_body(BACKEND, response).await?;

        parse_generation(&text)
    }

    fn max_input_characters(&self) -> usize {
        self.defaults.max_input_characters
    }
}

#[async_trait]
impl EmbeddingCapability for GeminiProvider {
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

        let body = self.build_embed_request(model, text, document_type, size);
        let response = self
            .client
            .post(format!("{}/models/{}:embedContent", self.base_url, model))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| embedding_http_error(BACKEND, error))?;

        let payload = embedding_body(BACKEND, response).await?;

        check_dimension(parse_embedding(&payload)?, size)
    }
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        BACKEND
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    model: String,
    content: Content,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}
