//! Reciprocal Rank Fusion over the sparse and dense result lists.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use citerag_core::types::{Origin, ScoredChunk};
use citerag_core::{Error, Result};
use citerag_text::SparseIndex;
use citerag_vector::DenseIndex;

pub const DEFAULT_RRF_K: f32 = 60.0;

/// Merges ranked lists by summing `1 / (k + rank + 1)` (0-based rank) per id.
///
/// The payload kept for an id is the one with the highest score in any single
/// input list. Output is ordered by fused score descending; ties keep the
/// order in which ids were first seen.
pub fn reciprocal_rank_fusion(result_lists: &[Vec<ScoredChunk>], k: f32) -> Vec<ScoredChunk> {
	let mut entries: Vec<(ScoredChunk, f32)> = Vec::new();
	let mut position: HashMap<&str, usize> = HashMap::new();
	for results in result_lists {
		for (rank, hit) in results.iter().enumerate() {
			let contribution = 1.0 / (k + rank as f32 + 1.0);
			match position.get(hit.id()) {
				Some(&i) => {
					let (best, fused) = &mut entries[i];
					*fused += contribution;
					if hit.score > best.score {
						*best = hit.clone();
					}
				}
				None => {
					position.insert(hit.id(), entries.len());
					entries.push((hit.clone(), contribution));
				}
			}
		}
	}
	// sort_by is stable: equal fused scores stay in first-seen order.
	entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
	entries
		.into_iter()
		.map(|(best, fused)| ScoredChunk::new(best.chunk, fused, Origin::Fused))
		.collect()
}

/// Hybrid retrieval: sparse and dense lookups issued concurrently, then fused.
pub struct FusionRetriever {
	sparse: Arc<SparseIndex>,
	dense: Arc<DenseIndex>,
	rrf_k: f32,
}

impl FusionRetriever {
	pub fn new(sparse: Arc<SparseIndex>, dense: Arc<DenseIndex>) -> Self {
		Self { sparse, dense, rrf_k: DEFAULT_RRF_K }
	}

	pub fn with_rrf_k(mut self, rrf_k: f32) -> Self {
		self.rrf_k = rrf_k;
		self
	}

	pub fn sparse(&self) -> &SparseIndex {
		&self.sparse
	}

	pub fn dense(&self) -> &DenseIndex {
		&self.dense
	}

	pub async fn retrieve(&self, query: &str, sparse_k: usize, dense_k: usize, final_k: usize) -> Result<Vec<ScoredChunk>> {
		if query.trim().is_empty() || final_k == 0 {
			return Ok(Vec::new());
		}
		let sparse = Arc::clone(&self.sparse);
		let sparse_query = query.to_string();
		let sparse_task = tokio::task::spawn_blocking(move || sparse.search(&sparse_query, sparse_k));
		let (sparse_hits, dense_hits) = tokio::join!(sparse_task, self.dense.search(query, dense_k));
		let sparse_hits = sparse_hits.map_err(|e| Error::Operation(format!("sparse search task failed: {e}")))??;
		let dense_hits = dense_hits?;

		let (n_sparse, n_dense) = (sparse_hits.len(), dense_hits.len());
		let mut fused = reciprocal_rank_fusion(&[sparse_hits, dense_hits], self.rrf_k);
		fused.truncate(final_k);
		debug!(sparse = n_sparse, dense = n_dense, fused = fused.len(), "hybrid retrieval");
		Ok(fused)
	}
}
