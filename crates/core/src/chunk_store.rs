use crate::error::ChunkStoreError;
use crate::models::Chunk;
use crate::stores::sanitize_identifier;
use crate::traits::ChunkStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

fn sort_by_order(chunks: &mut [Chunk]) {
    chunks.sort_by_key(|chunk| chunk.order);
}

fn group_by_project(chunks: Vec<Chunk>) -> HashMap<String, Vec<Chunk>> {
    let mut grouped: HashMap<String, Vec<Chunk>> = HashMap::new();
    for chunk in chunks {
        grouped.entry(chunk.project_id.clone()).or_default().push(chunk);
    }
    grouped
}

#[derive(Default)]
pub struct MemoryChunkStore {
    projects: RwLock<HashMap<String, Vec<Chunk>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn insert_many(&self, chunks: Vec<Chunk>) -> Result<usize, ChunkStoreError> {
        let inserted = chunks.len();
        let mut projects = self.projects.write().await;
        for (project_id, chunks) in group_by_project(chunks) {
            projects.entry(project_id).or_default().extend(chunks);
        }
        Ok(inserted)
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Chunk>, ChunkStoreError> {
        let mut chunks = self
            .projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default();
        sort_by_order(&mut chunks);
        Ok(chunks)
    }

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, ChunkStoreError> {
        Ok(self
            .projects
            .write()
            .await
            .remove(project_id)
            .map(|chunks| chunks.len())
            .unwrap_or(0))
    }

    async fn delete_by_asset(
        &self,
        project_id: &str,
        asset_id: &str,
    ) -> Result<usize, ChunkStoreError> {
        let mut projects = self.projects.write().await;
        Ok(match projects.get_mut(project_id) {
            Some(chunks) => {
                let before = chunks.len();
                chunks.retain(|chunk| chunk.asset_id != asset_id);
                before - chunks.len()
            }
            None => 0,
        })
    }
}

/// Keeps each project's chunks in `<root>/<project>.json`, so separate
/// processes share state.
pub struct JsonChunkStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn project_path(&self, project_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", sanitize_identifier(project_id)))
    }

    async fn read_project(&self, project_id: &str) -> Result<Vec<Chunk>, ChunkStoreError> {
        match tokio::fs::read(self.project_path(project_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_project(&self, project_id: &str, chunks: &[Chunk]) -> Result<(), ChunkStoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.project_path(project_id);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec_pretty(chunks)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(project_id, chunks = chunks.len(), path = %path.display(), "chunk file written");
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for JsonChunkStore {
    async fn insert_many(&self, chunks: Vec<Chunk>) -> Result<usize, ChunkStoreError> {
        let inserted = chunks.len();
        let _guard = self.write_lock.lock().await;
        for (project_id, chunks) in group_by_project(chunks) {
            let mut stored = self.read_project(&project_id).await?;
            stored.extend(chunks);
            self.write_project(&project_id, &stored).await?;
        }
        Ok(inserted)
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Chunk>, ChunkStoreError> {
        let mut chunks = self.read_project(project_id).await?;
        sort_by_order(&mut chunks);
        Ok(chunks)
    }

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, ChunkStoreError> {
        let _guard = self.write_lock.lock().await;
        let removed = self.read_project(project_id).await?.len();
        match tokio::fs::remove_file(self.project_path(project_id)).await {
            Ok(()) => Ok(removed),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(0),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_by_asset(
        &self,
        project_id: &str,
        asset_id: &str,
    ) -> Result<usize, ChunkStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read_project(project_id).await?;
        let before = stored.len();
        stored.retain(|chunk| chunk.asset_id != asset_id);
        let removed = before - stored.len();
        if removed > 0 {
            self.write_project(project_id, &stored).await?;
        }
        Ok(removed)
    }
}
