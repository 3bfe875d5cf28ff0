//! In-process vector store.
//!
//! Brute-force scoring over every record of a collection. Used by the offline
//! pipeline and by tests that should not depend on a running Qdrant.

use crate::error::StoreError;
use crate::models::{CollectionInfo, Distance, RetrievedDocument, VectorRecord};
use crate::traits::VectorStoreCapability;
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

struct MemoryCollection {
    embedding_size: usize,
    distance: Distance,
    /// Insertion order; search ties keep it.
    records: Vec<VectorRecord>,
    positions: HashMap<u64, usize>,
}

impl MemoryCollection {
    fn upsert(&mut self, record: VectorRecord) {
        match self.positions.get(&record.record_id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.positions.insert(record.record_id, self.records.len());
                self.records.push(record);
            }
        }
    }
}

pub struct MemoryVectorStore {
    distance: Distance,
    collections: RwLock<HashMap<String, MemoryCollection>>,
    connected: AtomicBool,
}

impl MemoryVectorStore {
    pub fn new(distance: Distance) -> Self {
        Self {
            distance,
            collections: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotConnected("memory".to_string()))
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new(Distance::default())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(a, b),
        Distance::Dot => dot(a, b),
    }
}

#[async_trait]
impl VectorStoreCapability for MemoryVectorStore {
    async fn connect(&self) -> Result<(), StoreError> {
        self.connected.store(true, Ordering::Release);
        debug!(distance = %self.distance, "memory vector store connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.ensure_connected()?;
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        embedding_size: usize,
        reset: bool,
    ) -> Result<bool, StoreError> {
        self.ensure_connected()?;
        let mut collections = self.collections.write().await;
        if reset {
            collections.remove(name);
        }
        if collections.contains_key(name) {
            return Ok(false);
        }
        collections.insert(
            name.to_string(),
            MemoryCollection {
                embedding_size,
                distance: self.distance,
                records: Vec::new(),
                positions: HashMap::new(),
            },
        );
        Ok(true)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        self.ensure_connected()?;
        Ok(self
            .collections
            .read()
            .await
            .get(name)
            .map(|collection| CollectionInfo {
                name: name.to_string(),
                embedding_size: collection.embedding_size,
                distance: collection.distance,
                points_count: collection.records.len() as u64,
            }))
    }

    async fn upsert_many(
        &self,
        name: &str,
        records: Vec<VectorRecord>,
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        self.ensure_connected()?;
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != collection.embedding_size)
        {
            return Err(StoreError::DimensionMismatch {
                expected: collection.embedding_size,
                actual: record.vector.len(),
            });
        }

        // A single write lock covers every slice, so batches cannot fail midway.
        let committed = records.len();
        for record in records {
            collection.upsert(record);
        }
        debug!(collection = name, committed, batch_size, "memory upsert");
        Ok(committed)
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Option<Vec<RetrievedDocument>>, StoreError> {
        self.ensure_connected()?;
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
        if vector.len() != collection.embedding_size {
            return Err(StoreError::DimensionMismatch {
                expected: collection.embedding_size,
                actual: vector.len(),
            });
        }

        let mut scored = collection
            .records
            .iter()
            .map(|record| (score(collection.distance, vector, &record.vector), record))
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(CmpOrdering::Equal));

        let hits = scored
            .into_iter()
            .take(limit)
            .map(|(score, record)| RetrievedDocument {
                text: record.payload.text.clone(),
                score: f64::from(score),
            })
            .collect::<Vec<_>>();

        if hits.is_empty() {
            return Ok(None);
        }
        Ok(Some(hits))
    }
}
