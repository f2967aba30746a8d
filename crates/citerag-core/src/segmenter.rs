//! Recursive boundary splitting of raw text into overlapping chunks.
//!
//! Text longer than the configured size is split on the strongest separator
//! still available (paragraph, line, sentence, word, character) and the pieces
//! are packed greedily back up to the size bound. Pieces that are still too
//! large recurse with the weaker separators; character splitting always fits.
//! All lengths are counted in `char`s.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::config::ChunkingSettings;
use crate::types::Chunk;

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];
const CHAR_LEVEL: &[&str] = &[""];

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,3}[ \t]+(\S.*)$").expect("heading pattern compiles"));

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 512, chunk_overlap: 64 }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(s: &ChunkingSettings) -> Self {
        Self { chunk_size: s.size, chunk_overlap: s.overlap }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: ChunkingConfig,
}

impl Segmenter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `text` into chunks tagged with `source`, `title` and `page`.
    pub fn segment(&self, text: &str, source: &str, title: Option<&str>, page: Option<u32>) -> Vec<Chunk> {
        let size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap;
        let raw = recursive_split(text, size, SEPARATORS);

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut offset = 0usize;
        for (i, segment) in raw.iter().enumerate() {
            let body = segment.trim();
            if body.is_empty() {
                offset += char_len(segment);
                continue;
            }

            let mut text = body.to_string();
            if i > 0 && overlap > 0 && !chunks.is_empty() {
                let tail = tail_chars(raw[i - 1].trim(), overlap);
                if !tail.is_empty() {
                    text = format!("{tail} {body}");
                }
            }

            let start = if i > 0 { offset.saturating_sub(overlap) } else { 0 };
            let end = start + char_len(&text);
            chunks.push(Chunk {
                chunk_id: make_chunk_id(source, chunks.len()),
                text,
                source: source.to_string(),
                title: title.map(str::to_string),
                page,
                start_char: start,
                end_char: end,
            });
            offset += char_len(segment);
        }
        chunks
    }

    /// Split a markdown-like document by `#`, `##`, `###` headings first, then
    /// by size within each section. Each chunk carries its section heading as
    /// title; text before the first heading has no title. Without headings the
    /// whole document is split with the source as title.
    pub fn segment_structured(&self, text: &str, source: &str) -> Vec<Chunk> {
        let headings: Vec<(usize, String)> = HEADING
            .captures_iter(text)
            .filter_map(|caps| Some((caps.get(0)?.start(), caps.get(1)?.as_str().trim().to_string())))
            .collect();

        let Some(&(first_start, _)) = headings.first() else {
            return self.segment(text, source, Some(source), None);
        };

        let mut chunks = Vec::new();
        if first_start > 0 {
            chunks.extend(self.segment(&text[..first_start], source, None, None));
        }
        for (i, (start, label)) in headings.iter().enumerate() {
            let end = headings.get(i + 1).map_or(text.len(), |(next, _)| *next);
            chunks.extend(self.segment(&text[*start..end], source, Some(label), None));
        }
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    s.char_indices().nth(len - n).map_or(s, |(idx, _)| &s[idx..])
}

fn split_on<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    if sep.is_empty() {
        text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
    } else {
        text.split(sep).collect()
    }
}

fn recursive_split(text: &str, max_size: usize, separators: &[&str]) -> Vec<String> {
    if char_len(text) <= max_size {
        return vec![text.to_string()];
    }

    let (sep, weaker) = match separators.split_first() {
        Some((sep, rest)) if !rest.is_empty() => (*sep, rest),
        Some((sep, _)) => (*sep, CHAR_LEVEL),
        None => ("", CHAR_LEVEL),
    };
    let sep_len = char_len(sep);

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for part in split_on(text, sep) {
        let part_len = char_len(part);
        let candidate_len = if current.is_empty() { part_len } else { current_len + sep_len + part_len };
        if candidate_len <= max_size {
            if !current.is_empty() {
                current.push_str(sep);
            }
            current.push_str(part);
            current_len = candidate_len;
            continue;
        }

        if !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        if part_len > max_size {
            segments.extend(recursive_split(part, max_size, weaker));
            current_len = 0;
        } else {
            current = part.to_string();
            current_len = part_len;
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn make_chunk_id(source: &str, position: usize) -> String {
    let nonce = Uuid::new_v4();
    let mut id = blake3::hash(format!("{source}:{position}:{nonce}").as_bytes()).to_hex().to_string();
    id.truncate(16);
    id
}
