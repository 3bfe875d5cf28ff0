use crate::error::ValidationError;
use crate::models::{ChunkCandidate, LoadedDocument};
use regex::Regex;
use std::collections::VecDeque;

const SENTENCE_END: &str = r"[.!?]+\s+";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ValidationError> {
        if chunk_size == 0 {
            return Err(ValidationError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ValidationError::InvalidChunkConfig(format!(
                "overlap {overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            overlap: 20,
        }
    }
}

/// Split points in priority order. The last one always applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Whitespace,
    Character,
}

const BOUNDARIES: [Boundary; 5] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Whitespace,
    Boundary::Character,
];

/// Recursive character splitter: paragraphs, then lines, then sentences, then
/// words, then single characters. Lengths are counted in `char`s.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    config: ChunkingConfig,
    sentence_end: Regex,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, ValidationError> {
        let sentence_end = Regex::new(SENTENCE_END)
            .map_err(|error| ValidationError::InvalidChunkConfig(error.to_string()))?;
        Ok(Self {
            config,
            sentence_end,
        })
    }

    /// Splits every document and tags each chunk with its document's metadata.
    pub fn split(&self, documents: &[LoadedDocument]) -> Vec<ChunkCandidate> {
        documents
            .iter()
            .flat_map(|document| {
                self.split_text(&document.text)
                    .into_iter()
                    .map(|text| ChunkCandidate {
                        text,
                        metadata: document.metadata.clone(),
                    })
            })
            .collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_with(text, &BOUNDARIES)
    }

    fn split_with(&self, text: &str, boundaries: &[Boundary]) -> Vec<String> {
        let mut remaining = boundaries;
        let mut pieces = vec![text];

        while let Some((boundary, rest)) = remaining.split_first() {
            remaining = rest;
            let split = self.pieces(text, *boundary);
            if split.len() > 1 || rest.is_empty() {
                pieces = split;
                break;
            }
        }

        self.merge(pieces, remaining)
    }

    fn pieces<'a>(&self, text: &'a str, boundary: Boundary) -> Vec<&'a str> {
        match boundary {
            Boundary::Paragraph => text.split_inclusive("\n\n").collect(),
            Boundary::Line => text.split_inclusive('\n').collect(),
            Boundary::Sentence => split_after(text, self.sentence_end.find_iter(text).map(|m| m.end())),
            Boundary::Whitespace => text.split_inclusive(char::is_whitespace).collect(),
            Boundary::Character => text
                .char_indices()
                .map(|(start, ch)| &text[start..start + ch.len_utf8()])
                .collect(),
        }
    }

    /// Greedily packs pieces into chunks, carrying up to `overlap` characters of
    /// trailing pieces into the next chunk. Oversized pieces recurse with the
    /// remaining, finer boundaries.
    fn merge(&self, pieces: Vec<&str>, finer: &[Boundary]) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.overlap;

        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut window_len = 0usize;

        for piece in pieces {
            let piece_len = piece.chars().count();

            if piece_len > chunk_size {
                push_window(&mut chunks, &window);
                window.clear();
                window_len = 0;
                chunks.extend(self.split_with(piece, finer));
                continue;
            }

            if window_len + piece_len > chunk_size && !window.is_empty() {
                push_window(&mut chunks, &window);
                while window_len > overlap || (window_len + piece_len > chunk_size && window_len > 0)
                {
                    match window.pop_front() {
                        Some((_, len)) => window_len -= len,
                        None => break,
                    }
                }
            }

            window.push_back((piece, piece_len));
            window_len += piece_len;
        }

        push_window(&mut chunks, &window);
        chunks
    }
}

fn split_after(text: &str, cut_points: impl Iterator<Item = usize>) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for end in cut_points {
        if end > start {
            pieces.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn push_window(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined = window.iter().map(|(piece, _)| *piece).collect::<String>();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Convenience wrapper used by the processing run.
pub fn split_documents(
    documents: &[LoadedDocument],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkCandidate>, ValidationError> {
    let splitter = RecursiveSplitter::new(ChunkingConfig::new(chunk_size, overlap)?)?;
    Ok(splitter.split(documents))
}
