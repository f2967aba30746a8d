//! Citation map construction, marker extraction and validation.
//!
//! Generated text is untrusted: every `[N]` marker is checked against the
//! chunks that were actually handed to the generator, and markers pointing
//! anywhere else are removed from the answer.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::types::{Citation, ScoredChunk};

const QUOTE_CHARS: usize = 200;

static CITE_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([0-9,\s]+)\]").expect("citation pattern compiles"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("number pattern compiles"));

/// 1-based `ref_id` to citation, in rank order.
pub type CitationMap = BTreeMap<usize, Citation>;

pub fn build_citation_map(chunks: &[ScoredChunk]) -> CitationMap {
    chunks
        .iter()
        .enumerate()
        .map(|(i, sc)| {
            let ref_id = i + 1;
            let citation = Citation {
                ref_id,
                source: sc.chunk.source.clone(),
                title: sc.chunk.title.clone(),
                quote: sc.chunk.text.chars().take(QUOTE_CHARS).collect(),
            };
            (ref_id, citation)
        })
        .collect()
}

/// Every id inside `[N]` or `[N, M, ...]` markers, left to right, duplicates kept.
pub fn extract_citation_ids(text: &str) -> Vec<usize> {
    CITE_GROUP
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .flat_map(|group| NUMBER.find_iter(group.as_str()))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Strip markers that do not resolve in `citation_map` and return the cleaned
/// answer with the cited entries, deduplicated in first-use order.
///
/// A group marker keeps its valid ids; a marker left with none is removed.
pub fn validate_citations(answer: &str, citation_map: &CitationMap) -> (String, Vec<Citation>) {
    let used = extract_citation_ids(answer);
    let invalid: Vec<usize> = used.iter().copied().filter(|id| !citation_map.contains_key(id)).collect();
    if !invalid.is_empty() {
        warn!(ids = ?invalid, "invalid citations removed");
    }

    let cleaned = CITE_GROUP.replace_all(answer, |caps: &Captures| rewrite_marker(caps, citation_map));

    let mut seen = HashSet::new();
    let citations = used
        .into_iter()
        .filter(|id| seen.insert(*id))
        .filter_map(|id| citation_map.get(&id).cloned())
        .collect();
    (cleaned.trim().to_string(), citations)
}

fn rewrite_marker(caps: &Captures, citation_map: &CitationMap) -> String {
    let whole = caps.get(0).map_or("", |m| m.as_str());
    let Some(group) = caps.get(1) else { return whole.to_string() };
    let numbers: Vec<&str> = NUMBER.find_iter(group.as_str()).map(|m| m.as_str()).collect();
    if numbers.is_empty() {
        return whole.to_string();
    }
    let kept: Vec<&str> = numbers
        .iter()
        .copied()
        .filter(|n| n.parse::<usize>().is_ok_and(|id| citation_map.contains_key(&id)))
        .collect();
    if kept.len() == numbers.len() {
        whole.to_string()
    } else if kept.is_empty() {
        String::new()
    } else {
        format!("[{}]", kept.join(", "))
    }
}

/// Trailing "Sources" footer; empty input renders nothing.
pub fn format_citation_block(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut lines = vec!["\n\n---\n**Sources:**".to_string()];
    lines.extend(citations.iter().map(|c| format!("[{}] {}", c.ref_id, c.label())));
    lines.join("\n")
}

/// Fraction of `1..=num_chunks` cited at least once in `answer`.
pub fn citation_coverage(answer: &str, num_chunks: usize) -> f64 {
    if num_chunks == 0 {
        return 1.0;
    }
    let cited: HashSet<usize> = extract_citation_ids(answer).into_iter().collect();
    let hit = (1..=num_chunks).filter(|id| cited.contains(id)).count();
    hit as f64 / num_chunks as f64
}
