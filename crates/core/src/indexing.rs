use crate::error::{EmbeddingError, IndexingError, StoreError};
use crate::models::{Chunk, DocumentType, IndexingReport, VectorPayload, VectorRecord};
use crate::stores::{collection_name, record_id_for};
use crate::traits::{ChunkStore, EmbeddingCapability, LlmProvider, VectorStoreCapability};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const DEFAULT_INDEXING_BATCH_SIZE: usize = 50;

type RunningProjects = Arc<Mutex<HashSet<String>>>;

fn lock(running: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a project as being indexed until dropped.
struct RunGuard {
    running: RunningProjects,
    project_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.project_id);
    }
}

/// Maps every chunk to its record id, rejecting two distinct chunk ids that
/// land on the same record.
fn assign_record_ids(chunks: &[Chunk]) -> Result<Vec<u64>, IndexingError> {
    let mut owners: HashMap<u64, &str> = HashMap::with_capacity(chunks.len());
    chunks
        .iter()
        .map(|chunk| {
            let record_id = record_id_for(&chunk.id);
            match owners.insert(record_id, &chunk.id) {
                Some(previous) if previous != chunk.id => Err(IndexingError::RecordIdCollision {
                    record_id,
                    first: previous.to_string(),
                    second: chunk.id.clone(),
                }),
                _ => Ok(record_id),
            }
        })
        .collect()
}

/// Turns a project's stored chunks into vector-store records.
pub struct IndexingCoordinator {
    embedder: Arc<dyn LlmProvider>,
    vector_store: Arc<dyn VectorStoreCapability>,
    chunk_store: Arc<dyn ChunkStore>,
    batch_size: usize,
    running: RunningProjects,
}

impl IndexingCoordinator {
    pub fn new(
        embedder: Arc<dyn LlmProvider>,
        vector_store: Arc<dyn VectorStoreCapability>,
        chunk_store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            chunk_store,
            batch_size: DEFAULT_INDEXING_BATCH_SIZE,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn acquire(&self, project_id: &str) -> Result<RunGuard, IndexingError> {
        if !lock(&self.running).insert(project_id.to_string()) {
            return Err(IndexingError::AlreadyRunning(project_id.to_string()));
        }
        Ok(RunGuard {
            running: Arc::clone(&self.running),
            project_id: project_id.to_string(),
        })
    }

    async fn embedding_size(&self) -> Result<usize, IndexingError> {
        if let Some(size) = self.embedder.embedding_size() {
            return Ok(size);
        }
        // Without a configured size a probe either reveals it or reports why
        // the backend cannot embed.
        self.embedder
            .embed_text("probe", DocumentType::Document)
            .await
            .map(|vector| vector.len())
            .map_err(IndexingError::Embedding)
    }

    /// Embeds and upserts every chunk of `project_id`.
    ///
    /// With `reset` the project's collection is dropped and rebuilt, otherwise
    /// records are upserted over the existing ones. Chunks whose embedding
    /// fails are skipped and counted, except when the backend cannot embed at
    /// all, which aborts the run before anything is written.
    pub async fn index_project(
        &self,
        project_id: &str,
        reset: bool,
    ) -> Result<IndexingReport, IndexingError> {
        let _guard = self.acquire(project_id)?;
        let collection = collection_name(project_id);

        let chunks = self.chunk_store.list_by_project(project_id).await?;
        let record_ids = assign_record_ids(&chunks)?;
        let embedding_size = self.embedding_size().await?;

        let created = self
            .vector_store
            .create_collection(&collection, embedding_size, reset)
            .await
            .map_err(|source| IndexingError::Collection {
                collection: collection.clone(),
                source,
            })?;
        info!(
            project_id,
            collection = %collection,
            created,
            reset,
            chunks = chunks.len(),
            "indexing project"
        );

        let mut inserted_count = 0;
        let mut failed_chunks = 0;
        let mut assets = HashSet::new();

        for (batch_index, (batch, ids)) in chunks
            .chunks(self.batch_size)
            .zip(record_ids.chunks(self.batch_size))
            .enumerate()
        {
            let mut records = Vec::with_capacity(batch.len());
            for (chunk, record_id) in batch.iter().zip(ids) {
                match self
                    .embedder
                    .embed_text(&chunk.text, DocumentType::Document)
                    .await
                {
                    Ok(vector) => {
                        assets.insert(chunk.asset_id.as_str());
                        records.push(VectorRecord {
                            record_id: *record_id,
                            vector,
                            payload: VectorPayload {
                                chunk_id: chunk.id.clone(),
                                text: chunk.text.clone(),
                                metadata: chunk.metadata.clone(),
                            },
                        });
                    }
                    Err(error @ EmbeddingError::Unsupported { .. }) => {
                        return Err(IndexingError::Embedding(error));
                    }
                    Err(error) => {
                        warn!(project_id, chunk_id = %chunk.id, %error, "skipping chunk");
                        failed_chunks += 1;
                    }
                }
            }

            if records.is_empty() {
                continue;
            }

            match self
                .vector_store
                .upsert_many(&collection, records, self.batch_size)
                .await
            {
                Ok(count) => inserted_count += count,
                Err(source) => {
                    let committed = inserted_count
                        + match &source {
                            StoreError::BatchFailed { committed, .. } => *committed,
                            _ => 0,
                        };
                    warn!(project_id, batch_index, committed, error = %source, "upsert failed");
                    return Err(IndexingError::Upsert { committed, source });
                }
            }
            debug!(project_id, batch_index, inserted_count, "batch indexed");
        }

        info!(
            project_id,
            inserted_count,
            failed_chunks,
            assets = assets.len(),
            "indexing finished"
        );

        Ok(IndexingReport {
            collection,
            inserted_count,
            processed_asset_count: assets.len(),
            failed_chunks,
            indexed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::MemoryChunkStore;
    use crate::error::GenerationError;
    use crate::models::{CollectionInfo, GenerationMessage, RetrievedDocument};
    use crate::providers::NgramEmbedder;
    use crate::stores::MemoryVectorStore;
    use crate::traits::GenerationCapability;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SIZE: usize = 16;

    struct FakeEmbedder {
        ngram: NgramEmbedder,
        fail_on: Option<&'static str>,
        unsupported: bool,
    }

    impl FakeEmbedder {
        fn working() -> Self {
            Self {
                ngram: NgramEmbedder::with_dimensions(SIZE),
                fail_on: None,
                unsupported: false,
            }
        }
    }

    #[async_trait]
    impl GenerationCapability for FakeEmbedder {
        fn set_generation_model(&mut self, _model_id: &str) {}

        async fn generate_text(
            &self,
            _prompt: &str,
            _chat_history: &[GenerationMessage],
            _max_output_tokens: Option<u32>,
            _temperature: Option<f32>,
        ) -> Result<String, GenerationError> {
            Err(GenerationError::Unsupported {
                backend: "FAKE".to_string(),
            })
        }

        fn max_input_characters(&self) -> usize {
            1_024
        }
    }

    #[async_trait]
    impl EmbeddingCapability for FakeEmbedder {
        fn set_embedding_model(&mut self, _model_id: &str, _embedding_size: usize) {}

        fn embedding_size(&self) -> Option<usize> {
            Some(SIZE)
        }

        async fn embed_text(
            &self,
            text: &str,
            _document_type: DocumentType,
        ) -> Result<Vec<f32>, EmbeddingError> {
            if self.unsupported {
                return Err(EmbeddingError::Unsupported {
                    backend: "FAKE".to_string(),
                });
            }
            if self.fail_on.is_some_and(|needle| text.contains(needle)) {
                return Err(EmbeddingError::Backend {
                    backend: "FAKE".to_string(),
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(self.ngram.embed(text))
        }
    }

    impl LlmProvider for FakeEmbedder {
        fn name(&self) -> &'static str {
            "FAKE"
        }
    }

    /// Counts upsert calls and fails the one numbered `fail_at` (1-based).
    struct FlakyStore {
        inner: MemoryVectorStore,
        upserts: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl FlakyStore {
        async fn new(fail_at: Option<usize>) -> Self {
            let inner = MemoryVectorStore::default();
            inner.connect().await.expect("connect");
            Self {
                inner,
                upserts: AtomicUsize::new(0),
                fail_at,
            }
        }
    }

    #[async_trait]
    impl VectorStoreCapability for FlakyStore {
        async fn connect(&self) -> Result<(), StoreError> {
            self.inner.connect().await
        }

        async fn disconnect(&self) -> Result<(), StoreError> {
            self.inner.disconnect().await
        }

        async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
            self.inner.collection_exists(name).await
        }

        async fn create_collection(
            &self,
            name: &str,
            embedding_size: usize,
            reset: bool,
        ) -> Result<bool, StoreError> {
            self.inner.create_collection(name, embedding_size, reset).await
        }

        async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
            self.inner.delete_collection(name).await
        }

        async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
            self.inner.collection_info(name).await
        }

        async fn upsert_many(
            &self,
            name: &str,
            records: Vec<VectorRecord>,
            batch_size: usize,
        ) -> Result<usize, StoreError> {
            let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at == Some(call) {
                return Err(StoreError::BatchFailed {
                    batch_index: 0,
                    committed: 0,
                    details: "connection reset".to_string(),
                });
            }
            self.inner.upsert_many(name, records, batch_size).await
        }

        async fn search(
            &self,
            name: &str,
            vector: &[f32],
            limit: usize,
        ) -> Result<Option<Vec<RetrievedDocument>>, StoreError> {
            self.inner.search(name, vector, limit).await
        }
    }

    fn chunk(project_id: &str, asset_id: &str, order: u64, text: &str) -> Chunk {
        Chunk {
            id: format!("{project_id}:{asset_id}:{order}"),
            text: text.to_string(),
            metadata: BTreeMap::new(),
            order,
            project_id: project_id.to_string(),
            asset_id: asset_id.to_string(),
        }
    }

    async fn seeded_chunks(project_id: &str, count: u64) -> Arc<MemoryChunkStore> {
        let store = Arc::new(MemoryChunkStore::new());
        let chunks = (1..=count)
            .map(|order| chunk(project_id, "asset", order, &format!("chunk number {order}")))
            .collect();
        store.insert_many(chunks).await.expect("seed");
        store
    }

    async fn points(store: &dyn VectorStoreCapability, project_id: &str) -> u64 {
        store
            .collection_info(&collection_name(project_id))
            .await
            .expect("info")
            .map(|info| info.points_count)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn reindexing_without_reset_is_idempotent() {
        let chunks = seeded_chunks("p", 5).await;
        let store = Arc::new(FlakyStore::new(None).await);
        let coordinator =
            IndexingCoordinator::new(Arc::new(FakeEmbedder::working()), store.clone(), chunks)
                .with_batch_size(2);

        let first = coordinator.index_project("p", false).await.expect("first run");
        let second = coordinator.index_project("p", false).await.expect("second run");

        assert_eq!(first.inserted_count, 5);
        assert_eq!(second.inserted_count, 5);
        assert_eq!(first.processed_asset_count, 1);
        assert_eq!(first.collection, "collection_p");
        assert_eq!(points(store.as_ref(), "p").await, 5);
    }

    #[tokio::test]
    async fn reset_leaves_exactly_the_current_chunks() {
        let chunks = seeded_chunks("p", 5).await;
        let store = Arc::new(FlakyStore::new(None).await);
        let coordinator = IndexingCoordinator::new(
            Arc::new(FakeEmbedder::working()),
            store.clone(),
            chunks.clone(),
        );

        coordinator.index_project("p", false).await.expect("first run");
        chunks.delete_by_project("p").await.expect("delete");
        chunks
            .insert_many(vec![chunk("p", "fresh", 1, "replacement text")])
            .await
            .expect("insert");

        let report = coordinator.index_project("p", true).await.expect("reset run");
        assert_eq!(report.inserted_count, 1);
        assert_eq!(points(store.as_ref(), "p").await, 1);
    }

    #[tokio::test]
    async fn other_projects_are_untouched() {
        let chunks = seeded_chunks("p1", 3).await;
        chunks
            .insert_many(vec![chunk("p2", "a", 1, "second project")])
            .await
            .expect("insert");
        let store = Arc::new(FlakyStore::new(None).await);
        let coordinator =
            IndexingCoordinator::new(Arc::new(FakeEmbedder::working()), store.clone(), chunks);

        coordinator.index_project("p2", false).await.expect("p2");
        coordinator.index_project("p1", true).await.expect("p1");

        assert_eq!(points(store.as_ref(), "p1").await, 3);
        assert_eq!(points(store.as_ref(), "p2").await, 1);
    }

    #[tokio::test]
    async fn failed_embeddings_are_skipped_and_counted() {
        let chunks = seeded_chunks("p", 3).await;
        chunks
            .insert_many(vec![chunk("p", "asset", 4, "a bad chunk")])
            .await
            .expect("insert");
        let store = Arc::new(FlakyStore::new(None).await);
        let embedder = FakeEmbedder {
            fail_on: Some("bad"),
            ..FakeEmbedder::working()
        };
        let coordinator = IndexingCoordinator::new(Arc::new(embedder), store.clone(), chunks);

        let report = coordinator.index_project("p", false).await.expect("run");
        assert_eq!(report.inserted_count, 3);
        assert_eq!(report.failed_chunks, 1);
        assert_eq!(points(store.as_ref(), "p").await, 3);
    }

    #[tokio::test]
    async fn unsupported_embeddings_abort_before_any_upsert() {
        let chunks = seeded_chunks("p", 3).await;
        let store = Arc::new(FlakyStore::new(None).await);
        let embedder = FakeEmbedder {
            unsupported: true,
            ..FakeEmbedder::working()
        };
        let coordinator = IndexingCoordinator::new(Arc::new(embedder), store.clone(), chunks);

        let result = coordinator.index_project("p", false).await;
        assert!(matches!(
            result,
            Err(IndexingError::Embedding(EmbeddingError::Unsupported { .. }))
        ));
        assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generation_only_backend_cannot_index() {
        let chunks = seeded_chunks("p", 2).await;
        let store = Arc::new(FlakyStore::new(None).await);
        let provider = crate::providers::OpenRouterProvider::new(
            reqwest::Client::new(),
            None,
            crate::providers::GenerationDefaults::default(),
        );
        let coordinator = IndexingCoordinator::new(Arc::new(provider), store.clone(), chunks);

        let result = coordinator.index_project("p", false).await;
        assert!(matches!(
            result,
            Err(IndexingError::Embedding(EmbeddingError::Unsupported { .. }))
        ));
        assert!(!store
            .collection_exists(&collection_name("p"))
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn upsert_failure_reports_committed_records() {
        let chunks = seeded_chunks("p", 5).await;
        let store = Arc::new(FlakyStore::new(Some(2)).await);
        let coordinator =
            IndexingCoordinator::new(Arc::new(FakeEmbedder::working()), store.clone(), chunks)
                .with_batch_size(2);

        let result = coordinator.index_project("p", false).await;
        match result {
            Err(IndexingError::Upsert { committed, .. }) => assert_eq!(committed, 2),
            other => panic!("expected upsert failure, got {other:?}"),
        }
        assert_eq!(points(store.as_ref(), "p").await, 2);
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_project_are_rejected() {
        let chunks = seeded_chunks("p", 1).await;
        let store = Arc::new(FlakyStore::new(None).await);
        let coordinator =
            IndexingCoordinator::new(Arc::new(FakeEmbedder::working()), store, chunks);

        let guard = coordinator.acquire("p").expect("first acquire");
        let result = coordinator.index_project("p", false).await;
        assert!(matches!(result, Err(IndexingError::AlreadyRunning(_))));

        drop(guard);
        coordinator.index_project("p", false).await.expect("after release");
    }

    #[test]
    fn colliding_record_ids_are_rejected() {
        let chunks = vec![chunk("p", "a", 1, "x"), chunk("p", "a", 2, "y")];
        assert_eq!(assign_record_ids(&chunks).expect("distinct").len(), 2);

        let mut first = chunk("p", "a", 1, "x");
        first.id = "5".to_string();
        let mut second = chunk("p", "a", 2, "y");
        second.id = "05".to_string();
        let result = assign_record_ids(&[first.clone(), second]);
        assert!(matches!(
            result,
            Err(IndexingError::RecordIdCollision { record_id: 5, .. })
        ));

        assert!(assign_record_ids(&[first.clone(), first]).is_ok());
    }
}
