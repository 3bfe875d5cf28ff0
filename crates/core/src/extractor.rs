use crate::error::LoaderError;
use crate::models::{LoadedDocument, Metadata};
use crate::traits::DocumentLoader;
use lopdf::Document;
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
}

impl FileKind {
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();
        match extension.as_str() {
            "txt" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }
}

/// Loads plain text and PDF files into page-level documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl DocumentLoader for FileLoader {
    fn load(&self, bytes: &[u8], file_name: &str) -> Result<Vec<LoadedDocument>, LoaderError> {
        match FileKind::from_file_name(file_name) {
            Some(FileKind::Text) => load_text(bytes, file_name),
            Some(FileKind::Pdf) => load_pdf(bytes, file_name),
            None => Err(LoaderError::UnsupportedType(file_name.to_string())),
        }
    }
}

fn load_text(bytes: &[u8], file_name: &str) -> Result<Vec<LoadedDocument>, LoaderError> {
    let text = String::from_utf8(bytes.to_vec())?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!(file_name));
    Ok(vec![LoadedDocument { text, metadata }])
}

fn load_pdf(bytes: &[u8], file_name: &str) -> Result<Vec<LoadedDocument>, LoaderError> {
    let document =
        Document::load_mem(bytes).map_err(|error| LoaderError::PdfParse(error.to_string()))?;

    let pages = document.get_pages();
    let total_pages = pages.len();
    let mut loaded = Vec::new();

    for (page_no, _page_id) in pages {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| LoaderError::PdfParse(error.to_string()))?;

        if text.trim().is_empty() {
            continue;
        }

        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!(file_name));
        metadata.insert("page".to_string(), json!(page_no));
        metadata.insert("total_pages".to_string(), json!(total_pages));
        loaded.push(LoadedDocument { text, metadata });
    }

    Ok(loaded)
}
