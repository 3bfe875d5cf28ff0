use super::GenerationDefaults;
use crate::error::{EmbeddingError, GenerationError};
use crate::models::{DocumentType, GenerationMessage};
use crate::traits::{EmbeddingCapability, GenerationCapability, LlmProvider};
use async_trait::async_trait;

const BACKEND: &str = "NGRAM";

pub const DEFAULT_NGRAM_DIMENSIONS: usize = 128;

/// Offline embedder hashing character trigrams into a fixed number of
/// buckets. Query and document embeddings are identical.
#[derive(Debug, Clone, Copy)]
pub struct NgramEmbedder {
    dimensions: usize,
    defaults: GenerationDefaults,
}

impl NgramEmbedder {
    pub fn new(defaults: GenerationDefaults) -> Self {
        Self {
            dimensions: DEFAULT_NGRAM_DIMENSIONS,
            defaults,
        }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            defaults: GenerationDefaults::default(),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self::new(GenerationDefaults::default())
    }
}

#[async_trait]
impl GenerationCapability for NgramEmbedder {
    fn set_generation_model(&mut self, _model_id: &str) {}

    async fn generate_text(
        &self,
        _prompt: &str,
        _chat_history: &[GenerationMessage],
        _max_output_tokens: Option<u32>,
        _temperature: Option<f32>,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Unsupported {
            backend: BACKEND.to_string(),
        })
    }

    fn max_input_characters(&self) -> usize {
        self.defaults.max_input_characters
    }
}

#[async_trait]
impl EmbeddingCapability for NgramEmbedder {
    /// The model id is ignored; only the size matters.
    fn set_embedding_model(&mut self, _model_id: &str, embedding_size: usize) {
        self.dimensions = embedding_size.max(1);
    }

    fn embedding_size(&self) -> Option<usize> {
        Some(self.dimensions)
    }

    async fn embed_text(
        &self,
        text: &str,
        _document_type: DocumentType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }
}

impl LlmProvider for NgramEmbedder {
    fn name(&self) -> &'static str {
        BACKEND
    }
}
