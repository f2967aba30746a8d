//! Prompt assembly and citation-enforced answer generation.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use citerag_core::citations::{build_citation_map, validate_citations};
use citerag_core::traits::Generator;
use citerag_core::types::{Citation, ScoredChunk};
use citerag_core::{Error, Result};

pub const SYSTEM_PROMPT: &str = "You are a research assistant that answers questions using only the numbered references provided.

Rules:
1. Every factual claim must cite at least one reference with a bracketed number such as [1] or [2, 3].
2. Every paragraph must contain at least one citation.
3. Use only information found in the references; do not rely on outside knowledge.
4. If the references do not contain enough information to answer, say so plainly.
5. Be concise and direct.";

pub const INSUFFICIENT_INFORMATION: &str = "I don't have enough information to answer this question.";

pub const MISSING_CITATIONS_NOTE: &str =
	"\n\n*Note: The model failed to produce inline citations. The answer is based on the following sources:*";

/// `[i] (Source: label)` header followed by the chunk text, one block per chunk.
pub fn build_context_block(chunks: &[ScoredChunk]) -> String {
	chunks
		.iter()
		.enumerate()
		.map(|(i, sc)| format!("[{}] (Source: {})\n{}\n", i + 1, sc.chunk.citation_label(), sc.chunk.text))
		.collect::<Vec<_>>()
		.join("\n")
}

pub fn build_user_content(question: &str, chunks: &[ScoredChunk]) -> String {
	format!("References:\n{}\n\nQuestion: {}", build_context_block(chunks), question)
}

/// Asks `generator` for an answer grounded in `chunks` and validates its citations.
///
/// No context short-circuits to a fixed answer without calling the generator.
/// An answer left with no valid citation gets a disclosure note and is
/// attributed to every chunk.
pub async fn generate_answer(
	generator: &dyn Generator,
	question: &str,
	chunks: &[ScoredChunk],
	temperature: f32,
) -> Result<(String, Vec<Citation>)> {
	if chunks.is_empty() {
		return Ok((INSUFFICIENT_INFORMATION.to_string(), Vec::new()));
	}
	let citation_map = build_citation_map(chunks);
	let raw = generator
		.generate(SYSTEM_PROMPT, &build_user_content(question, chunks), temperature)
		.await
		.map_err(|e| Error::collaborator("generation", e))?;

	let (mut answer, mut citations) = validate_citations(&raw, &citation_map);
	if citations.is_empty() {
		warn!(question, "answer carries no valid citations");
		answer.push_str(MISSING_CITATIONS_NOTE);
		citations = citation_map.into_values().collect();
	}
	info!(chunks = chunks.len(), citations = citations.len(), "answer generated");
	Ok((answer, citations))
}

static REFERENCE_HEADER: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?m)^\[([0-9]+)\] \(Source: .*\)$").expect("reference header pattern compiles"));

const LEAD_SENTENCE_CHARS: usize = 300;

/// Offline generator: answers with the leading sentence of each reference,
/// each followed by its marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
	fn references(user: &str) -> Vec<(String, &str)> {
		let body_end = user.rfind("\n\nQuestion:").unwrap_or(user.len());
		let headers: Vec<_> = REFERENCE_HEADER.captures_iter(&user[..body_end]).collect();
		headers
			.iter()
			.enumerate()
			.filter_map(|(i, caps)| {
				let whole = caps.get(0)?;
				let id = caps.get(1)?.as_str().to_string();
				let end = headers.get(i + 1).and_then(|next| next.get(0)).map_or(body_end, |m| m.start());
				Some((id, &user[whole.end()..end]))
			})
			.collect()
	}
}

fn lead_sentence(body: &str) -> String {
	let mut body = body.trim();
	while body.starts_with('#') {
		body = body.split_once('\n').map_or("", |(_, rest)| rest).trim_start();
	}
	let end = body
		.find(". ")
		.map(|i| i + 1)
		.or_else(|| body.find('\n'))
		.unwrap_or(body.len());
	let sentence: String = body[..end].chars().take(LEAD_SENTENCE_CHARS).collect();
	sentence.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Generator for ExtractiveGenerator {
	async fn generate(&self, _system: &str, user: &str, _temperature: f32) -> anyhow::Result<String> {
		let paragraphs: Vec<String> = Self::references(user)
			.into_iter()
			.filter_map(|(id, body)| {
				let sentence = lead_sentence(body);
				(!sentence.is_empty()).then(|| format!("{sentence} [{id}]"))
			})
			.collect();
		if paragraphs.is_empty() {
			return Ok(INSUFFICIENT_INFORMATION.to_string());
		}
		Ok(paragraphs.join("\n\n"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use citerag_core::types::{Chunk, Origin};
	use std::sync::Arc;

	fn chunk(id: &str, text: &str, title: Option<&str>) -> ScoredChunk {
		let mut c = Chunk::new(id, text, format!("docs/{id}.md"));
		c.title = title.map(str::to_string);
		ScoredChunk::new(Arc::new(c), 1.0, Origin::Reranked)
	}

	#[test]
	fn context_block_numbers_chunks_from_one() {
		let chunks = vec![chunk("a", "Alpha text.", Some("Alpha")), chunk("b", "Beta text.", None)];
		let block = build_context_block(&chunks);
		assert_eq!(block, "[1] (Source: Alpha)\nAlpha text.\n\n[2] (Source: docs/b.md)\nBeta text.\n");
		let user = build_user_content("What?", &chunks);
		assert!(user.starts_with("References:\n[1] (Source: Alpha)"));
		assert!(user.ends_with("\n\nQuestion: What?"));
	}

	#[test]
	fn lead_sentence_stops_at_first_sentence() {
		assert_eq!(lead_sentence("  Water boils at 100C. It also freezes. "), "Water boils at 100C.");
		assert_eq!(lead_sentence("single line\nsecond line"), "single line");
		assert_eq!(lead_sentence("no terminator"), "no terminator");
		assert_eq!(lead_sentence("# Heading\n## Sub\nBody text. More."), "Body text.");
		assert_eq!(lead_sentence("# Only a heading"), "");
	}

	#[tokio::test]
	async fn extractive_generator_cites_each_reference() {
		let chunks = vec![
			chunk("a", "Flint makes sparks. Steel helps too.", None),
			chunk("b", "Tinder must be dry.", None),
		];
		let user = build_user_content("How do I start a fire?", &chunks);
		let answer = ExtractiveGenerator.generate(SYSTEM_PROMPT, &user, 0.1).await.expect("generate");
		assert_eq!(answer, "Flint makes sparks. [1]\n\nTinder must be dry. [2]");
	}

	#[tokio::test]
	async fn extractive_generator_without_references_declines() {
		let answer = ExtractiveGenerator.generate(SYSTEM_PROMPT, "Question: anything", 0.1).await.expect("generate");
		assert_eq!(answer, INSUFFICIENT_INFORMATION);
	}
}
