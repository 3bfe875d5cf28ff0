use crate::models::Distance;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide values fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation_backend: String,
    pub embedding_backend: String,
    pub vector_db_backend: String,

    pub openrouter_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub cohere_api_key: Option<String>,

    pub generation_model_id: String,
    pub embedding_model_id: String,
    pub embedding_model_size: usize,
    pub input_default_max_characters: usize,
    pub generation_default_max_tokens: u32,
    pub generation_default_temperature: f32,

    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub vector_db_distance_method: Distance,

    pub primary_lang: String,
    pub default_lang: String,

    pub indexing_batch_size: usize,
    pub request_timeout_secs: u64,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            generation_backend: "OPENROUTER".to_string(),
            embedding_backend: "GEMINI".to_string(),
            vector_db_backend: "QDRANT".to_string(),
            openrouter_api_key: None,
            gemini_api_key: None,
            cohere_api_key: None,
            generation_model_id: "qwen/qwen3-4b:free".to_string(),
            embedding_model_id: "text-embedding-004".to_string(),
            embedding_model_size: 768,
            input_default_max_characters: 1_024,
            generation_default_max_tokens: 500,
            generation_default_temperature: 0.7,
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            vector_db_distance_method: Distance::Cosine,
            primary_lang: "en".to_string(),
            default_lang: "en".to_string(),
            indexing_batch_size: 50,
            request_timeout_secs: 60,
        }
    }
}
