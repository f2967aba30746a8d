//! Domain types shared by the segmenter, both indexes, fusion and citations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

/// A bounded piece of a source document, the unit of retrieval.
///
/// - `chunk_id`: unique within one index build
/// - `source`: path or URL of the originating document
/// - `title`: display label (section heading or file stem)
/// - `page`: 1-based page number when the source is paginated
/// - `start_char`/`end_char`: approximate character offsets into the section
///   the chunk was cut from; informational only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub start_char: usize,
    #[serde(default)]
    pub end_char: usize,
}

impl Chunk {
    /// Untitled, unpaginated chunk spanning the whole of `text`.
    pub fn new(chunk_id: impl Into<ChunkId>, text: impl Into<String>, source: impl Into<String>) -> Self {
        let text = text.into();
        let end_char = text.chars().count();
        Self { chunk_id: chunk_id.into(), text, source: source.into(), title: None, page: None, start_char: 0, end_char }
    }

    /// Human readable label used in prompts and source footers.
    pub fn citation_label(&self) -> String {
        let mut label = display_title(self.title.as_deref(), &self.source).to_string();
        if let Some(page) = self.page {
            label.push_str(&format!(", p.{page}"));
        }
        label
    }
}

/// Title when present and non-empty, otherwise the source.
pub fn display_title<'a>(title: Option<&'a str>, source: &'a str) -> &'a str {
    match title {
        Some(t) if !t.trim().is_empty() => t,
        _ => source,
    }
}

/// Which stage produced a score. Scores are only comparable within one origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Sparse,
    Dense,
    Fused,
    Reranked,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Sparse => "sparse",
            Origin::Dense => "dense",
            Origin::Fused => "fused",
            Origin::Reranked => "reranked",
        }
    }
}

/// A chunk annotated with the score one pipeline stage gave it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub origin: Origin,
}

impl ScoredChunk {
    pub fn new(chunk: Arc<Chunk>, score: f32, origin: Origin) -> Self {
        Self { chunk, score, origin }
    }

    pub fn id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

/// One entry of a citation map. `ref_id` is the 1-based rank of the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub ref_id: usize,
    pub source: String,
    pub title: Option<String>,
    pub quote: String,
}

impl Citation {
    pub fn label(&self) -> &str {
        display_title(self.title.as_deref(), &self.source)
    }
}

/// Final answer handed back to the caller of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub chunks_used: Vec<ScoredChunk>,
    pub query: String,
}
