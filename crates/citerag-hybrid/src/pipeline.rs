//! Pipeline orchestrator: ingest → index → retrieve → rerank → generate → cite.
//!
//! The pipeline is `EMPTY` until an ingest or load publishes a snapshot, after
//! which it is `READY`. A snapshot bundles one sparse index with the dense
//! collection built from the same chunks. Rebuilds construct a fresh snapshot
//! off to the side and swap it in under a short write lock, so queries always
//! see one consistent generation. Ingests are serialized by a writer lock.
//!
//! On disk every generation owns its sparse artifact (`<collection>.json`) and
//! its vector collection; the manifest names both. Replacing the manifest is
//! the commit point, so a failed rebuild leaves the previous generation intact.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use citerag_core::config::{resolve_with_base, RetrievalSettings, Settings};
use citerag_core::ingest::{DocumentLoader, DEFAULT_EXTENSIONS};
use citerag_core::persist::{read_json, remove_file_if_exists, write_json_atomic};
use citerag_core::segmenter::{ChunkingConfig, Segmenter};
use citerag_core::traits::{CrossEncoder, Embedder, Generator, VectorStore};
use citerag_core::types::{Chunk, RagResponse};
use citerag_core::{Error, Result};
use citerag_text::SparseIndex;
use citerag_vector::DenseIndex;

use crate::fusion::FusionRetriever;
use crate::generation::generate_answer;
use crate::rerank::Reranker;

pub const MAX_TOP_K: usize = 20;
pub const MAX_QUESTION_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
	pub chunking: ChunkingConfig,
	pub retrieval: RetrievalSettings,
	pub embedding_batch_size: usize,
	pub temperature: f32,
	pub extensions: Vec<String>,
	pub sparse_index_dir: PathBuf,
	pub manifest_path: PathBuf,
	pub collection_prefix: String,
}

impl PipelineConfig {
	/// Data paths in `settings` are resolved against `base`.
	pub fn from_settings(settings: &Settings, base: &Path) -> Self {
		Self {
			chunking: ChunkingConfig::from(&settings.chunking),
			retrieval: settings.retrieval.clone(),
			embedding_batch_size: settings.embedding.batch_size,
			temperature: settings.generation.temperature,
			extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
			sparse_index_dir: resolve_with_base(base, &settings.data.sparse_index_dir),
			manifest_path: resolve_with_base(base, &settings.data.manifest_path),
			collection_prefix: settings.data.collection_prefix.clone(),
		}
	}

	/// Defaults with every artifact placed under `data_dir`.
	pub fn in_dir(data_dir: &Path) -> Self {
		Self::from_settings(&Settings::default(), data_dir)
			.with_paths(data_dir.join("sparse"), data_dir.join("manifest.json"))
	}

	pub fn with_paths(mut self, sparse_index_dir: PathBuf, manifest_path: PathBuf) -> Self {
		self.sparse_index_dir = sparse_index_dir;
		self.manifest_path = manifest_path;
		self
	}
}

/// The external engines the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
	pub embedder: Arc<dyn Embedder>,
	pub vector_store: Arc<dyn VectorStore>,
	pub cross_encoder: Arc<dyn CrossEncoder>,
	pub generator: Arc<dyn Generator>,
}

/// Pointer to the published generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
	pub collection: String,
	/// Sparse artifact built from the same chunks as `collection`.
	pub sparse_index: PathBuf,
	pub chunk_count: usize,
	pub built_at: DateTime<Utc>,
}

struct Snapshot {
	retriever: FusionRetriever,
	manifest: Manifest,
}

enum PipelineState {
	Empty,
	Ready(Arc<Snapshot>),
}

pub struct RagPipeline {
	config: PipelineConfig,
	loader: DocumentLoader,
	collaborators: Collaborators,
	reranker: Reranker,
	state: RwLock<PipelineState>,
	// Writer lock; holds the generation unpublished by the last swap, retired
	// by the next one so in-flight queries can finish against it.
	writer: Mutex<Option<Manifest>>,
}

impl RagPipeline {
	pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
		let loader = DocumentLoader::new(Segmenter::new(config.chunking.clone())).with_extensions(&config.extensions);
		let reranker = Reranker::new(Arc::clone(&collaborators.cross_encoder));
		Self {
			config,
			loader,
			collaborators,
			reranker,
			state: RwLock::new(PipelineState::Empty),
			writer: Mutex::new(None),
		}
	}

	pub fn config(&self) -> &PipelineConfig {
		&self.config
	}

	pub fn is_ready(&self) -> bool {
		self.snapshot().is_ok()
	}

	/// Chunks in the published generation; zero while `EMPTY`.
	pub fn chunk_count(&self) -> usize {
		self.snapshot().map_or(0, |s| s.manifest.chunk_count)
	}

	pub fn manifest(&self) -> Option<Manifest> {
		self.snapshot().ok().map(|s| s.manifest.clone())
	}

	/// Segments every supported file below `dir` and publishes a new generation.
	/// Returns the number of chunks indexed.
	pub async fn ingest(&self, dir: &Path) -> Result<usize> {
		let mut retired = self.writer.lock().await;
		let loader = self.loader.clone();
		let dir = dir.to_path_buf();
		let chunks = tokio::task::spawn_blocking(move || loader.ingest_directory(&dir))
			.await
			.map_err(|e| Error::Operation(format!("ingest task failed: {e}")))??;
		self.publish_chunks(chunks, &mut retired).await
	}

	/// Indexes already segmented chunks as a new generation.
	pub async fn index_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
		let mut retired = self.writer.lock().await;
		self.publish_chunks(chunks, &mut retired).await
	}

	/// Publishes the generation recorded in the manifest.
	pub async fn load_indexes(&self) -> Result<()> {
		let mut retired = self.writer.lock().await;
		let manifest: Manifest = read_json(&self.config.manifest_path)?;
		let sparse_path = manifest.sparse_index.clone();
		let sparse = tokio::task::spawn_blocking(move || SparseIndex::open(&sparse_path))
			.await
			.map_err(|e| Error::Operation(format!("sparse load task failed: {e}")))??;
		if sparse.len() != manifest.chunk_count {
			return Err(Error::Operation(format!(
				"sparse artifact {} holds {} chunks but the manifest records {}",
				manifest.sparse_index.display(),
				sparse.len(),
				manifest.chunk_count
			)));
		}
		let collection = self
			.collaborators
			.vector_store
			.open_collection(&manifest.collection)
			.await
			.map_err(|e| Error::collaborator("vector store", e))?;
		let dense = DenseIndex::new(collection, Arc::clone(&self.collaborators.embedder))
			.with_batch_size(self.config.embedding_batch_size);
		info!(collection = %manifest.collection, chunks = manifest.chunk_count, "indexes loaded");
		self.publish(sparse, dense, manifest, &mut retired).await
	}

	pub async fn query(&self, question: &str) -> Result<RagResponse> {
		self.query_with(question, self.config.retrieval.rerank_top_k).await
	}

	pub async fn query_with(&self, question: &str, top_k: usize) -> Result<RagResponse> {
		let snapshot = self.snapshot()?;
		if !(1..=MAX_TOP_K).contains(&top_k) {
			return Err(Error::InvalidConfig(format!("top_k must be between 1 and {MAX_TOP_K}, got {top_k}")));
		}
		if question.chars().count() > MAX_QUESTION_CHARS {
			return Err(Error::InvalidConfig(format!("question exceeds {MAX_QUESTION_CHARS} characters")));
		}

		let r = &self.config.retrieval;
		let candidates = snapshot
			.retriever
			.retrieve(question, r.sparse_top_k, r.dense_top_k, r.final_top_k)
			.await?;

		let reranker = self.reranker.clone();
		let rerank_question = question.to_string();
		let chunks_used = tokio::task::spawn_blocking(move || reranker.rerank(&rerank_question, candidates, top_k))
			.await
			.map_err(|e| Error::Operation(format!("rerank task failed: {e}")))??;

		let (answer, citations) = generate_answer(
			self.collaborators.generator.as_ref(),
			question,
			&chunks_used,
			self.config.temperature,
		)
		.await?;

		Ok(RagResponse { answer, citations, chunks_used, query: question.to_string() })
	}

	fn snapshot(&self) -> Result<Arc<Snapshot>> {
		let state = self.state.read().map_err(|_| poisoned())?;
		match &*state {
			PipelineState::Empty => Err(Error::NotReady),
			PipelineState::Ready(snapshot) => Ok(Arc::clone(snapshot)),
		}
	}

	async fn publish_chunks(&self, chunks: Vec<Chunk>, retired: &mut Option<Manifest>) -> Result<usize> {
		if chunks.is_empty() {
			warn!("no chunks to index; keeping the current indexes");
			return Ok(0);
		}
		// A generation left on disk by an earlier process is replaced below and
		// has no readers here.
		let orphaned = if self.is_ready() || retired.is_some() { None } else { self.manifest_on_disk() };
		let chunks: Vec<Arc<Chunk>> = chunks.into_iter().map(Arc::new).collect();
		let mut sparse = SparseIndex::new();
		sparse.build(chunks.iter().cloned())?;

		let name = self.next_collection_name();
		let collection = self
			.collaborators
			.vector_store
			.create_collection(&name)
			.await
			.map_err(|e| Error::collaborator("vector store", e))?;
		let dense = DenseIndex::new(collection, Arc::clone(&self.collaborators.embedder))
			.with_batch_size(self.config.embedding_batch_size);

		let manifest = Manifest {
			sparse_index: self.config.sparse_index_dir.join(format!("{name}.json")),
			collection: name,
			chunk_count: chunks.len(),
			built_at: Utc::now(),
		};
		let persisted = match dense.add_chunks(&chunks).await {
			Ok(()) => self.persist(&sparse, &manifest),
			Err(e) => Err(e),
		};
		if let Err(e) = persisted {
			self.retire(&manifest).await;
			return Err(e);
		}

		let count = manifest.chunk_count;
		let collection = manifest.collection.clone();
		self.publish(sparse, dense, manifest, retired).await?;
		if let Some(stale) = orphaned.filter(|m| m.collection != collection) {
			self.retire(&stale).await;
		}
		Ok(count)
	}

	fn persist(&self, sparse: &SparseIndex, manifest: &Manifest) -> Result<()> {
		sparse.save(&manifest.sparse_index)?;
		write_json_atomic(&self.config.manifest_path, manifest)
	}

	fn manifest_on_disk(&self) -> Option<Manifest> {
		match read_json(&self.config.manifest_path) {
			Ok(manifest) => Some(manifest),
			Err(Error::NotFound(_)) => None,
			Err(e) => {
				warn!(path = %self.config.manifest_path.display(), error = %e, "ignoring unreadable manifest");
				None
			}
		}
	}

	async fn publish(
		&self,
		sparse: SparseIndex,
		dense: DenseIndex,
		manifest: Manifest,
		retired: &mut Option<Manifest>,
	) -> Result<()> {
		let retriever = FusionRetriever::new(Arc::new(sparse), Arc::new(dense)).with_rrf_k(self.config.retrieval.rrf_k);
		let collection = manifest.collection.clone();
		let chunks = manifest.chunk_count;
		let snapshot = Arc::new(Snapshot { retriever, manifest });
		let previous = {
			let mut state = self.state.write().map_err(|_| poisoned())?;
			match std::mem::replace(&mut *state, PipelineState::Ready(snapshot)) {
				PipelineState::Ready(old) => Some(old.manifest.clone()),
				PipelineState::Empty => None,
			}
		};
		info!(collection = %collection, chunks, "index generation published");

		if let Some(stale) = retired.take() {
			if stale.collection != collection {
				self.retire(&stale).await;
			}
		}
		*retired = previous.filter(|p| p.collection != collection);
		Ok(())
	}

	/// Drops a generation's collection and sparse artifact. Failures are logged.
	async fn retire(&self, generation: &Manifest) {
		let name = generation.collection.as_str();
		match self.collaborators.vector_store.retire_collection(name).await {
			Ok(()) => info!(collection = name, "collection retired"),
			Err(e) => warn!(collection = name, error = %e, "failed to retire collection"),
		}
		if let Err(e) = remove_file_if_exists(&generation.sparse_index) {
			warn!(path = %generation.sparse_index.display(), error = %e, "failed to remove sparse artifact");
		}
	}

	fn next_collection_name(&self) -> String {
		let suffix = Uuid::new_v4().simple().to_string();
		format!("{}-{}-{}", self.config.collection_prefix, Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
	}
}

fn poisoned() -> Error {
	Error::Operation("pipeline state lock poisoned".to_string())
}
