use crate::error::IngestError;
use crate::models::{Chunk, IngestionOptions};

pub const DEFAULT_CHUNK_MAX_CHARS: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_MAX_CHARS,
            overlap_chars: DEFAULT_CHUNK_OVERLAP_CHARS,
        }
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Splits `text` into windows of at most `max_chars` characters, each starting
/// `max_chars - overlap_chars` after the previous one.
///
/// Counts `char`s, so multi-byte Hangul is never cut mid-codepoint. Every
/// window but the last is full length; empty input yields no chunks.
pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let stride = config.max_chars - config.overlap_chars;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}

/// Joins page texts and chunks them under one document key, sequence from 0.
pub fn build_chunks<S: AsRef<str>>(
    document_key: &str,
    page_texts: &[S],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let joined = page_texts
        .iter()
        .map(|text| text.as_ref().trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(split_text(&joined, config)?
        .into_iter()
        .enumerate()
        .map(|(sequence, text)| Chunk {
            document_key: document_key.to_string(),
            sequence,
            text,
        })
        .collect())
}
