pub mod memory;
pub mod qdrant;

pub use memory::MemoryVectorStore;
pub use qdrant::QdrantStore;

use crate::config::Settings;
use crate::error::StoreError;
use crate::providers::http_client;
use crate::traits::VectorStoreCapability;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// Largest id a record may carry: the non-negative range of an `i64`.
pub const MAX_RECORD_ID: u64 = (1 << 63) - 1;

/// Maps a chunk identifier to a vector-store record id.
///
/// Identifiers that already are non-negative 63-bit integers are used as-is.
/// Anything else is hashed: the first eight bytes of its SHA-256 digest,
/// masked to 63 bits. Distinct identifiers can collide; for `n` records in one
/// collection the probability is roughly `n² / 2^64`. The indexing run rejects
/// collisions it observes, and every payload keeps its `chunk_id`.
pub fn record_id_for(source_id: &str) -> u64 {
    if let Ok(id) = source_id.parse::<i64>() {
        if id >= 0 {
            return id as u64;
        }
    }

    let digest = Sha256::digest(source_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) & MAX_RECORD_ID
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_identifier(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Name of the vector collection holding a project's chunks.
pub fn collection_name(project_id: &str) -> String {
    format!("collection_{}", sanitize_identifier(project_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorDbBackend {
    Qdrant,
    Memory,
}

impl FromStr for VectorDbBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "QDRANT" => Ok(VectorDbBackend::Qdrant),
            "MEMORY" => Ok(VectorDbBackend::Memory),
            other => Err(format!("unknown vector db backend: {other}")),
        }
    }
}

pub struct VectorStoreFactory {
    settings: Settings,
    qdrant_url: Url,
    client: Client,
}

impl VectorStoreFactory {
    pub fn new(settings: &Settings) -> Result<Self, StoreError> {
        Ok(Self {
            settings: settings.clone(),
            qdrant_url: Url::parse(&settings.qdrant_url)?,
            client: http_client(settings.request_timeout())?,
        })
    }

    /// `None` for an unknown backend name.
    pub fn create(&self, backend: &str) -> Option<Arc<dyn VectorStoreCapability>> {
        match backend.parse::<VectorDbBackend>() {
            Ok(VectorDbBackend::Qdrant) => Some(Arc::new(QdrantStore::new(
                self.client.clone(),
                self.qdrant_url.clone(),
                self.settings.qdrant_api_key.clone(),
                self.settings.vector_db_distance_method,
            ))),
            Ok(VectorDbBackend::Memory) => Some(Arc::new(MemoryVectorStore::new(
                self.settings.vector_db_distance_method,
            ))),
            Err(error) => {
                warn!(%error, "vector store factory cannot create backend");
                None
            }
        }
    }
}
