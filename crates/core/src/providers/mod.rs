//! LLM backends and the factory that picks one by name.
//!
//! Every backend implements both [`GenerationCapability`] and
//! [`EmbeddingCapability`]; a backend that lacks one of them fails fast with a
//! typed `Unsupported` error instead of returning an empty value.
//!
//! [`GenerationCapability`]: crate::traits::GenerationCapability
//! [`EmbeddingCapability`]: crate::traits::EmbeddingCapability

pub mod cohere;
pub mod gemini;
pub mod ngram;
pub mod openrouter;

pub use cohere::CohereProvider;
pub use gemini::GeminiProvider;
pub use ngram::NgramEmbedder;
pub use openrouter::OpenRouterProvider;

use crate::config::Settings;
use crate::error::{EmbeddingError, GenerationError};
use crate::traits::LlmProvider;
use reqwest::{Client, Response};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmBackend {
    OpenRouter,
    Gemini,
    Cohere,
    Ngram,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPENROUTER" => Ok(LlmBackend::OpenRouter),
            "GEMINI" => Ok(LlmBackend::Gemini),
            "COHERE" => Ok(LlmBackend::Cohere),
            "NGRAM" => Ok(LlmBackend::Ngram),
            other => Err(format!("unknown llm backend: {other}")),
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmBackend::OpenRouter => "OPENROUTER",
            LlmBackend::Gemini => "GEMINI",
            LlmBackend::Cohere => "COHERE",
            LlmBackend::Ngram => "NGRAM",
        };
        f.write_str(name)
    }
}

/// Limits applied when a call does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub max_input_characters: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl From<&Settings> for GenerationDefaults {
    fn from(settings: &Settings) -> Self {
        Self {
            max_input_characters: settings.input_default_max_characters,
            max_output_tokens: settings.generation_default_max_tokens,
            temperature: settings.generation_default_temperature,
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

pub struct LlmProviderFactory {
    settings: Settings,
    client: Client,
}

impl LlmProviderFactory {
    /// Builds the shared HTTP client every provider created here reuses.
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            settings: settings.clone(),
            client: http_client(settings.request_timeout())?,
        })
    }

    /// `None` for an unknown backend name.
    pub fn create(&self, backend: &str) -> Option<Box<dyn LlmProvider>> {
        let backend = match backend.parse::<LlmBackend>() {
            Ok(backend) => backend,
            Err(error) => {
                warn!(%error, "llm provider factory cannot create backend");
                return None;
            }
        };
        let defaults = GenerationDefaults::from(&self.settings);

        let provider: Box<dyn LlmProvider> = match backend {
            LlmBackend::OpenRouter => Box::new(OpenRouterProvider::new(
                self.client.clone(),
                self.settings.openrouter_api_key.clone(),
                defaults,
            )),
            LlmBackend::Gemini => Box::new(GeminiProvider::new(
                self.client.clone(),
                self.settings.gemini_api_key.clone(),
                defaults,
            )),
            LlmBackend::Cohere => Box::new(CohereProvider::new(
                self.client.clone(),
                self.settings.cohere_api_key.clone(),
                defaults,
            )),
            LlmBackend::Ngram => Box::new(NgramEmbedder::new(defaults)),
        };
        Some(provider)
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

/// Cuts `text` to `max_characters` chars and trims it.
pub fn process_text(text: &str, max_characters: usize) -> String {
    text.chars()
        .take(max_characters)
        .collect::<String>()
        .trim()
        .to_string()
}

pub(crate) fn non_empty_key(key: &Option<String>) -> Option<&str> {
    key.as_deref().map(str::trim).filter(|key| !key.is_empty())
}

pub(crate) fn generation_http_error(backend: &str, error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout {
            backend: backend.to_string(),
        }
    } else {
        GenerationError::Http(error)
    }
}

pub(crate) fn embedding_http_error(backend: &str, error: reqwest::Error) -> EmbeddingError {
    if error.is_timeout() {
        EmbeddingError::Timeout {
            backend: backend.to_string(),
        }
    } else {
        EmbeddingError::Http(error)
    }
}

/// Body of a generation response. Non-success statuses become
/// `GenerationError::Backend`; a failed read goes through the timeout mapping.
pub(crate) async fn generation_body(
    backend: &str,
    response: Response,
) -> Result<String, GenerationError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        warn!(backend, status = status.as_u16(), "generation request rejected");
        return Err(GenerationError::Backend {
            backend: backend.to_string(),
            status: status.as_u16(),
            message,
        });
    }
    response
        .text()
        .await
        .map_err(|error| generation_http_error(backend, error))
}

pub(crate) async fn embedding_body(
    backend: &str,
    response: Response,
) -> Result<String, EmbeddingError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        warn!(backend, status = status.as_u16(), "embedding request rejected");
        return Err(EmbeddingError::Backend {
            backend: backend.to_string(),
            status: status.as_u16(),
            message,
        });
    }
    response
        .text()
        .await
        .map_err(|error| embedding_http_error(backend, error))
}

pub(crate) fn check_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_parse_case_insensitively() {
        assert_eq!("openrouter".parse::<LlmBackend>(), Ok(LlmBackend::OpenRouter));
        assert_eq!("GEMINI".parse::<LlmBackend>(), Ok(LlmBackend::Gemini));
        assert_eq!(" Cohere ".parse::<LlmBackend>(), Ok(LlmBackend::Cohere));
        assert!("OPENAI".parse::<LlmBackend>().is_err());
    }

    #[test]
    fn factory_returns_none_for_unknown_backend() {
        let factory = LlmProviderFactory::new(&Settings::default()).expect("client");
        assert!(factory.create("MISTRAL").is_none());
    }

    #[test]
    fn factory_builds_each_known_backend() {
        let factory = LlmProviderFactory::new(&Settings::default()).expect("client");
        for (name, expected) in [
            ("OPENROUTER", "OPENROUTER"),
            ("GEMINI", "GEMINI"),
            ("COHERE", "COHERE"),
            ("NGRAM", "NGRAM"),
        ] {
            let provider = factory.create(name).expect("known backend");
            assert_eq!(provider.name(), expected);
        }
    }

    #[test]
    fn process_text_truncates_by_chars_and_trims() {
        assert_eq!(process_text("  hello world  ", 8), "hello");
        assert_eq!(process_text("ééééé", 3), "ééé");
        assert_eq!(process_text("short", 100), "short");
    }

    #[test]
    fn blank_keys_count_as_missing() {
        assert_eq!(non_empty_key(&Some("  ".to_string())), None);
        assert_eq!(non_empty_key(&Some(" k ".to_string())), Some("k"));
        assert_eq!(non_empty_key(&None), None);
    }
}
