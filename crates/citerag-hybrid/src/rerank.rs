//! Cross-encoder reranking of fused candidates.
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use citerag_core::text::tokenize;
use citerag_core::traits::CrossEncoder;
use citerag_core::types::{Origin, ScoredChunk};
use citerag_core::{Error, Result};

#[derive(Clone)]
pub struct Reranker {
	encoder: Arc<dyn CrossEncoder>,
}

impl Reranker {
	pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
		Self { encoder }
	}

	/// Rescores every candidate against `query` and keeps the best `top_k`.
	pub fn rerank(&self, query: &str, candidates: Vec<ScoredChunk>, top_k: usize) -> Result<Vec<ScoredChunk>> {
		if candidates.is_empty() || top_k == 0 {
			return Ok(Vec::new());
		}
		let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
		let scores = self.encoder.score(query, &texts).map_err(|e| Error::collaborator("reranker", e))?;
		if scores.len() != candidates.len() {
			return Err(Error::Collaborator {
				stage: "reranker",
				message: format!("{} scores returned for {} candidates", scores.len(), candidates.len()),
			});
		}
		let input = candidates.len();
		let mut reranked: Vec<ScoredChunk> = candidates
			.into_iter()
			.zip(scores)
			.map(|(candidate, score)| ScoredChunk::new(candidate.chunk, score, Origin::Reranked))
			.collect();
		reranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
		reranked.truncate(top_k);
		debug!(input, output = reranked.len(), "reranked");
		Ok(reranked)
	}
}

/// Offline relevance scorer: the fraction of distinct query words that occur in
/// the candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapScorer;

impl CrossEncoder for TermOverlapScorer {
	fn score(&self, query: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>> {
		let terms: HashSet<String> = tokenize(query).into_iter().collect();
		if terms.is_empty() {
			return Ok(vec![0.0; candidates.len()]);
		}
		Ok(candidates
			.iter()
			.map(|text| {
				let words: HashSet<String> = tokenize(text).into_iter().collect();
				terms.iter().filter(|t| words.contains(*t)).count() as f32 / terms.len() as f32
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use citerag_core::types::Chunk;

	struct WrongLength;

	impl CrossEncoder for WrongLength {
		fn score(&self, _query: &str, _candidates: &[String]) -> anyhow::Result<Vec<f32>> {
			Ok(vec![1.0])
		}
	}

	fn candidate(id: &str, text: &str) -> ScoredChunk {
		ScoredChunk::new(Arc::new(Chunk::new(id, text, "s.txt")), 0.01, Origin::Fused)
	}

	#[test]
	fn reorders_by_encoder_score_and_truncates() {
		let reranker = Reranker::new(Arc::new(TermOverlapScorer));
		let candidates = vec![
			candidate("a", "nothing relevant here"),
			candidate("b", "solar panel wiring guide"),
			candidate("c", "solar cooking"),
		];
		let out = reranker.rerank("solar panel wiring", candidates, 2).expect("rerank");
		assert_eq!(out.iter().map(|r| r.id()).collect::<Vec<_>>(), vec!["b", "c"]);
		assert!((out[0].score - 1.0).abs() < 1e-6);
		assert!(out.iter().all(|r| r.origin == Origin::Reranked));
	}

	#[test]
	fn equal_scores_keep_fused_order() {
		let reranker = Reranker::new(Arc::new(TermOverlapScorer));
		let out = reranker
			.rerank("zebra", vec![candidate("first", "alpha"), candidate("second", "beta")], 5)
			.expect("rerank");
		assert_eq!(out.iter().map(|r| r.id()).collect::<Vec<_>>(), vec!["first", "second"]);
	}

	#[test]
	fn empty_candidates_or_zero_k_yield_nothing() {
		let reranker = Reranker::new(Arc::new(TermOverlapScorer));
		assert!(reranker.rerank("q", Vec::new(), 5).expect("empty").is_empty());
		assert!(reranker.rerank("q", vec![candidate("a", "q")], 0).expect("k=0").is_empty());
	}

	#[test]
	fn score_count_mismatch_is_a_collaborator_failure() {
		let reranker = Reranker::new(Arc::new(WrongLength));
		let err = reranker
			.rerank("q", vec![candidate("a", "x"), candidate("b", "y")], 2)
			.expect_err("mismatch");
		assert!(matches!(err, Error::Collaborator { stage: "reranker", .. }));
	}
}
