//! Directory ingestion: walks a document tree and segments every supported file.
//!
//! Markdown is split along its headings, PDFs page by page, everything else as
//! plain text titled by the file stem.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::segmenter::Segmenter;
use crate::types::Chunk;

pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "pdf"];

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    segmenter: Segmenter,
    extensions: Vec<String>,
}

impl DocumentLoader {
    pub fn new(segmenter: Segmenter) -> Self {
        Self { segmenter, extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect() }
    }

    /// Restrict ingestion to these extensions (without the leading dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Segment every supported file below `data_dir`. A file that fails to load
    /// is logged and skipped.
    pub fn ingest_directory(&self, data_dir: &Path) -> Result<Vec<Chunk>> {
        if !data_dir.is_dir() {
            return Err(Error::NotFound(format!("document directory {}", data_dir.display())));
        }
        let files = self.list_files(data_dir);
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no supported files found");
            return Ok(vec![]);
        }

        let mut all_chunks = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            match self.ingest_file(file_path) {
                Ok(chunks) => {
                    info!(file = file_index + 1, of = files.len(), path = %file_path.display(), chunks = chunks.len(), "ingested file");
                    all_chunks.extend(chunks);
                }
                Err(e) => error!(path = %file_path.display(), error = %e, "ingest failed, skipping file"),
            }
        }
        info!(dir = %data_dir.display(), files = files.len(), total_chunks = all_chunks.len(), "ingest complete");
        Ok(all_chunks)
    }

    pub fn ingest_file(&self, file_path: &Path) -> Result<Vec<Chunk>> {
        let source = file_path.to_string_lossy().to_string();
        if extension_of(file_path).as_deref() == Some("pdf") {
            return self.ingest_pdf(file_path, &source);
        }
        let content = self.read_file_content(file_path)?;
        if content.trim().is_empty() {
            warn!(path = %source, "empty file");
            return Ok(vec![]);
        }
        let chunks = match extension_of(file_path).as_deref() {
            Some("md") | Some("markdown") => self.segmenter.segment_structured(&content, &source),
            _ => {
                let stem = file_path.file_stem().map(|s| s.to_string_lossy().to_string());
                self.segmenter.segment(&content, &source, stem.as_deref(), None)
            }
        };
        Ok(chunks)
    }

    /// One segmentation pass per non-blank page; pages are numbered from 1.
    fn ingest_pdf(&self, file_path: &Path, source: &str) -> Result<Vec<Chunk>> {
        let stem = file_path.file_stem().map(|s| s.to_string_lossy().to_string());
        let pages = read_pdf_pages(file_path)?;
        let mut chunks = Vec::new();
        for (page, text) in &pages {
            chunks.extend(self.segmenter.segment(text, source, stem.as_deref(), Some(*page)));
        }
        if pages.is_empty() {
            warn!(path = %source, "pdf has no extractable text");
        }
        info!(path = %source, pages = pages.len(), chunks = chunks.len(), "ingested pdf");
        Ok(chunks)
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        let bytes = fs::read(file_path)?;
        match String::from_utf8(bytes) {
            Ok(content) => Ok(content),
            Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).to_string()),
        }
    }

    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| extension_of(p).is_some_and(|ext| self.extensions.contains(&ext)))
            .collect();
        files.sort();
        files
    }
}

/// Text of every page that has any, keyed by 1-based page number.
pub fn read_pdf_pages(path: &Path) -> Result<Vec<(u32, String)>> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| Error::Operation(format!("failed to open pdf {}: {e}", path.display())))?;
    let mut pages = Vec::new();
    for page in doc.get_pages().into_keys() {
        match doc.extract_text(&[page]) {
            Ok(text) if !text.trim().is_empty() => pages.push((page, text)),
            Ok(_) => debug!(path = %path.display(), page, "blank pdf page"),
            Err(e) => warn!(path = %path.display(), page, error = %e, "failed to extract pdf page text"),
        }
    }
    Ok(pages)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}
