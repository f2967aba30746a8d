//! Semantic index: chunk embeddings kept in a [`VectorCollection`].
use std::sync::Arc;
use tracing::{debug, info};

use citerag_core::traits::{Embedder, VectorCollection, VectorMatch, VectorRecord};
use citerag_core::types::{Chunk, Meta, Origin, ScoredChunk};
use citerag_core::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 128;

const META_SOURCE: &str = "source";
const META_TITLE: &str = "title";
const META_PAGE: &str = "page";
const META_START: &str = "start_char";
const META_END: &str = "end_char";

pub struct DenseIndex {
	collection: Arc<dyn VectorCollection>,
	embedder: Arc<dyn Embedder>,
	batch_size: usize,
}

impl DenseIndex {
	pub fn new(collection: Arc<dyn VectorCollection>, embedder: Arc<dyn Embedder>) -> Self {
		Self { collection, embedder, batch_size: DEFAULT_BATCH_SIZE }
	}

	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size.max(1);
		self
	}

	pub fn collection_name(&self) -> &str {
		self.collection.name()
	}

	/// Embeds and upserts chunks in batches; re-adding an id replaces its row.
	pub async fn add_chunks(&self, chunks: &[Arc<Chunk>]) -> Result<()> {
		for batch in chunks.chunks(self.batch_size) {
			let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
			let vectors = self.embed(texts).await?;
			let records: Vec<VectorRecord> = batch
				.iter()
				.zip(vectors)
				.map(|(chunk, vector)| VectorRecord {
					id: chunk.chunk_id.clone(),
					vector,
					text: chunk.text.clone(),
					metadata: chunk_metadata(chunk),
				})
				.collect();
			self.collection
				.upsert(&records)
				.await
				.map_err(|e| Error::collaborator("vector store", e))?;
			debug!(collection = self.collection.name(), batch = records.len(), "upserted embeddings");
		}
		info!(collection = self.collection.name(), chunks = chunks.len(), "dense index populated");
		Ok(())
	}

	/// Up to `k` nearest chunks; score is cosine similarity (1 - distance).
	pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
		if k == 0 || query.trim().is_empty() {
			return Ok(Vec::new());
		}
		let vector = self
			.embed(vec![query.to_string()])
			.await?
			.pop()
			.ok_or_else(|| Error::Collaborator { stage: "embedding", message: "no vector returned for query".to_string() })?;
		let matches = self
			.collection
			.query(&vector, k)
			.await
			.map_err(|e| Error::collaborator("vector store", e))?;
		Ok(matches
			.into_iter()
			.take(k)
			.map(|m| {
				let score = 1.0 - m.distance;
				ScoredChunk::new(Arc::new(chunk_from_match(m)), score, Origin::Dense)
			})
			.collect())
	}

	pub async fn count(&self) -> Result<usize> {
		self.collection.count().await.map_err(|e| Error::collaborator("vector store", e))
	}

	// Model inference is CPU-bound; it runs on the blocking pool.
	async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
		let expected = texts.len();
		let embedder = Arc::clone(&self.embedder);
		let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
			.await
			.map_err(|e| Error::Operation(format!("embedding task failed: {e}")))?
			.map_err(|e| Error::collaborator("embedding", e))?;
		if vectors.len() != expected {
			return Err(Error::Collaborator {
				stage: "embedding",
				message: format!("{} vectors returned for {expected} texts", vectors.len()),
			});
		}
		Ok(vectors)
	}
}

fn chunk_metadata(chunk: &Chunk) -> Meta {
	let mut meta = Meta::new();
	meta.insert(META_SOURCE.to_string(), chunk.source.clone());
	if let Some(title) = &chunk.title {
		meta.insert(META_TITLE.to_string(), title.clone());
	}
	if let Some(page) = chunk.page {
		meta.insert(META_PAGE.to_string(), page.to_string());
	}
	meta.insert(META_START.to_string(), chunk.start_char.to_string());
	meta.insert(META_END.to_string(), chunk.end_char.to_string());
	meta
}

fn chunk_from_match(m: VectorMatch) -> Chunk {
	let VectorMatch { id, text, mut metadata, .. } = m;
	let number = |meta: &Meta, key: &str| meta.get(key).and_then(|v| v.parse::<usize>().ok());
	let start_char = number(&metadata, META_START).unwrap_or(0);
	let end_char = number(&metadata, META_END).unwrap_or(start_char + text.chars().count());
	let page = metadata.get(META_PAGE).and_then(|v| v.parse::<u32>().ok());
	Chunk {
		chunk_id: id,
		source: metadata.remove(META_SOURCE).unwrap_or_default(),
		title: metadata.remove(META_TITLE),
		page,
		start_char,
		end_char,
		text,
	}
}
