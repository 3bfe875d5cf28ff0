use crate::chunking::{ChunkingConfig, RecursiveSplitter};
use crate::error::{ProcessingError, ValidationError};
use crate::extractor::FileKind;
use crate::models::{Asset, Chunk, ProcessingReport, SkippedAsset};
use crate::traits::{ChunkStore, DocumentLoader};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// An asset together with its raw bytes.
#[derive(Debug, Clone)]
pub struct AssetUpload {
    pub asset: Asset,
    pub bytes: Vec<u8>,
}

/// Drops every character that is not a word character or a dot.
pub fn clean_file_name(name: &str) -> Result<String, ValidationError> {
    let unsafe_chars = Regex::new(r"[^\w.]")
        .map_err(|error| ValidationError::InvalidArgument(error.to_string()))?;
    Ok(unsafe_chars.replace_all(name.trim(), "").into_owned())
}

pub fn discover_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .file_name()
            .to_str()
            .and_then(FileKind::from_file_name)
            .is_some();

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

pub fn make_chunk_id(project_id: &str, asset_id: &str, order: u64, text: &str) -> String {
    digest(&[
        project_id.as_bytes(),
        asset_id.as_bytes(),
        &order.to_le_bytes(),
        text.as_bytes(),
    ])
}

/// Reads every supported file under `folder` as an asset of `project_id`.
/// Asset ids derive from the path relative to `folder`.
pub fn load_folder_assets(project_id: &str, folder: &Path) -> Result<Vec<AssetUpload>, ProcessingError> {
    let files = discover_files(folder);
    if files.is_empty() {
        return Err(ValidationError::InvalidArgument(format!(
            "no pdf or txt files found in {}",
            folder.display()
        ))
        .into());
    }

    files
        .into_iter()
        .map(|path| -> Result<AssetUpload, ProcessingError> {
            let relative = path.strip_prefix(folder).unwrap_or(&path);
            let name = clean_file_name(
                path.file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or_default(),
            )?;
            Ok(AssetUpload {
                asset: Asset::new(
                    digest(&[relative.to_string_lossy().as_bytes()]),
                    project_id,
                    name,
                ),
                bytes: fs::read(&path)?,
            })
        })
        .collect()
}

/// Loads, splits and persists `uploads` for one project.
///
/// Assets that cannot be loaded or that yield no text are skipped and listed
/// in the report; only chunk persistence failures abort the run. With `reset`
/// the project's existing chunks are deleted first. Without it, an asset that
/// was processed before has its old chunks replaced by the new ones.
pub async fn process_assets(
    project_id: &str,
    uploads: &[AssetUpload],
    config: ChunkingConfig,
    reset: bool,
    loader: &dyn DocumentLoader,
    chunk_store: &dyn ChunkStore,
) -> Result<ProcessingReport, ProcessingError> {
    if let Some(upload) = uploads
        .iter()
        .find(|upload| upload.asset.project_id != project_id)
    {
        return Err(ValidationError::InvalidArgument(format!(
            "asset {} belongs to project {}, not {}",
            upload.asset.name, upload.asset.project_id, project_id
        ))
        .into());
    }

    let splitter = RecursiveSplitter::new(config)?;

    if reset {
        let deleted = chunk_store.delete_by_project(project_id).await?;
        info!(project_id, deleted, "cleared project chunks");
    }

    let mut report = ProcessingReport::default();

    for upload in uploads {
        let asset = &upload.asset;
        let documents = match loader.load(&upload.bytes, &asset.name) {
            Ok(documents) => documents,
            Err(error) => {
                warn!(
                    project_id,
                    asset = %asset.name,
                    file_type = %asset.file_type,
                    %error,
                    "skipping asset"
                );
                report.skipped_assets.push(SkippedAsset {
                    asset_name: asset.name.clone(),
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let chunks = splitter
            .split(&documents)
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| {
                let order = index as u64 + 1;
                Chunk {
                    id: make_chunk_id(project_id, &asset.id, order, &candidate.text),
                    text: candidate.text,
                    metadata: candidate.metadata,
                    order,
                    project_id: project_id.to_string(),
                    asset_id: asset.id.clone(),
                }
            })
            .collect::<Vec<_>>();

        if chunks.is_empty() {
            warn!(project_id, asset = %asset.name, "asset produced no chunks");
            report.skipped_assets.push(SkippedAsset {
                asset_name: asset.name.clone(),
                reason: "no text could be extracted".to_string(),
            });
            continue;
        }

        if !reset {
            let replaced = chunk_store.delete_by_asset(project_id, &asset.id).await?;
            if replaced > 0 {
                warn!(
                    project_id,
                    asset = %asset.name,
                    replaced,
                    "replacing chunks of a processed asset"
                );
            }
        }
        report.inserted_chunks += chunk_store.insert_many(chunks).await?;
        report.processed_assets += 1;
    }

    info!(
        project_id,
        inserted_chunks = report.inserted_chunks,
        processed_assets = report.processed_assets,
        skipped_assets = report.skipped_assets.len(),
        "processing run finished"
    );
    Ok(report)
}
