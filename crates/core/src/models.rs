use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A page or section produced by a document loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedDocument {
    pub text: String,
    pub metadata: Metadata,
}

/// Output of the chunking engine before an order and ids are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCandidate {
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// 1-based position within the asset.
    pub order: u64,
    pub project_id: String,
    pub asset_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Lowercased extension of `name`, empty when it has none.
    pub file_type: String,
}

impl Asset {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let file_type = std::path::Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name,
            file_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    Document,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMessage {
    pub role: Role,
    pub content: String,
}

impl GenerationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
}

impl Distance {
    pub fn as_qdrant(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
        }
    }
}

impl FromStr for Distance {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Distance::Cosine),
            "dot" => Ok(Distance::Dot),
            other => Err(format!("unknown distance method: {other}")),
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Cosine => f.write_str("cosine"),
            Distance::Dot => f.write_str("dot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub chunk_id: String,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub record_id: u64,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub embedding_size: usize,
    pub distance: Distance,
    pub points_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingReport {
    pub collection: String,
    pub inserted_count: usize,
    pub processed_asset_count: usize,
    pub failed_chunks: usize,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer_text: String,
    pub evidence: Vec<RetrievedDocument>,
    pub full_prompt: String,
    pub chat_history: Vec<GenerationMessage>,
}

#[derive(Debug, Clone)]
pub struct SkippedAsset {
    pub asset_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingReport {
    pub inserted_chunks: usize,
    pub processed_assets: usize,
    pub skipped_assets: Vec<SkippedAsset>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_parses_case_insensitively() {
        assert_eq!("COSINE".parse::<Distance>(), Ok(Distance::Cosine));
        assert_eq!(" dot ".parse::<Distance>(), Ok(Distance::Dot));
        assert!("euclid".parse::<Distance>().is_err());
    }

    #[test]
    fn asset_file_type_is_the_lowercased_extension() {
        assert_eq!(Asset::new("a", "p", "Report.PDF").file_type, "pdf");
        assert_eq!(Asset::new("a", "p", "README").file_type, "");
    }
}
