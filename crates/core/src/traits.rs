use crate::error::{
    ChunkStoreError, EmbeddingError, GenerationError, LoaderError, StoreError,
};
use crate::models::{
    Chunk, CollectionInfo, DocumentType, GenerationMessage, LoadedDocument, RetrievedDocument,
    VectorRecord,
};
use async_trait::async_trait;

#[async_trait]
pub trait GenerationCapability {
    fn set_generation_model(&mut self, model_id: &str);

    /// Generates a completion for `prompt` after `chat_history`. `None` limits
    /// fall back to the provider defaults.
    async fn generate_text(
        &self,
        prompt: &str,
        chat_history: &[GenerationMessage],
        max_output_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<String, GenerationError>;

    /// Character budget applied to every prompt and history message.
    fn max_input_characters(&self) -> usize;
}

#[async_trait]
pub trait EmbeddingCapability {
    fn set_embedding_model(&mut self, model_id: &str, embedding_size: usize);

    fn embedding_size(&self) -> Option<usize>;

    async fn embed_text(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<Vec<f32>, EmbeddingError>;
}

/// A concrete LLM backend. Every backend answers both capabilities; the ones
/// that cannot serve one of them fail with an `Unsupported` error.
pub trait LlmProvider: GenerationCapability + EmbeddingCapability + Send + Sync {
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait VectorStoreCapability: Send + Sync {
    async fn connect(&self) -> Result<(), StoreError>;

    async fn disconnect(&self) -> Result<(), StoreError>;

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Returns `true` when a collection was created. With `reset` any existing
    /// collection is dropped first.
    async fn create_collection(
        &self,
        name: &str,
        embedding_size: usize,
        reset: bool,
    ) -> Result<bool, StoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError>;

    async fn upsert_one(&self, name: &str, record: VectorRecord) -> Result<(), StoreError> {
        self.upsert_many(name, vec![record], 1).await.map(|_| ())
    }

    /// Upserts `records` in sequential slices of `batch_size`. Returns the
    /// number of committed records; a failing slice reports how many were
    /// committed before it.
    async fn upsert_many(
        &self,
        name: &str,
        records: Vec<VectorRecord>,
        batch_size: usize,
    ) -> Result<usize, StoreError>;

    /// `Ok(None)` when the search produced no hits.
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Option<Vec<RetrievedDocument>>, StoreError>;
}

pub trait DocumentLoader: Send + Sync {
    fn load(&self, bytes: &[u8], file_name: &str) -> Result<Vec<LoadedDocument>, LoaderError>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn insert_many(&self, chunks: Vec<Chunk>) -> Result<usize, ChunkStoreError>;

    /// All chunks of a project, ascending by `order`.
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Chunk>, ChunkStoreError>;

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, ChunkStoreError>;

    /// Removes one asset's chunks, leaving the rest of the project in place.
    async fn delete_by_asset(
        &self,
        project_id: &str,
        asset_id: &str,
    ) -> Result<usize, ChunkStoreError>;
}
