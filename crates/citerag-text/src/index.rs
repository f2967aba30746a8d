use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, TantivyError, Term};
use tracing::{debug, info};

use citerag_core::persist::{read_json, write_json_atomic};
use citerag_core::types::{Chunk, Origin, ScoredChunk};
use citerag_core::{Error, Result};

use crate::tantivy_utils::{analyze, build_schema, register_tokenizer, ORD_FIELD, TEXT_FIELD};

const ARTIFACT_VERSION: u32 = 1;
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Serialize)]
struct ArtifactOut<'a> {
	version: u32,
	chunks: &'a [Arc<Chunk>],
}

#[derive(Deserialize)]
struct ArtifactIn {
	version: u32,
	chunks: Vec<Chunk>,
}

struct BuiltIndex {
	chunks: Vec<Arc<Chunk>>,
	reader: IndexReader,
	text_field: Field,
	ord_field: Field,
	// Keeps the in-RAM directory alive alongside the reader.
	_index: Index,
}

/// BM25 keyword index over a fixed chunk list.
///
/// `build` replaces the whole index; a failed build leaves the previous one
/// in place. The persisted artifact is the chunk list, from which the index is
/// rebuilt deterministically on `load`.
#[derive(Default)]
pub struct SparseIndex {
	built: Option<BuiltIndex>,
}

fn index_err(err: TantivyError) -> Error {
	Error::Operation(format!("sparse index: {err}"))
}

impl SparseIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_built(&self) -> bool {
		self.built.is_some()
	}

	pub fn len(&self) -> usize {
		self.built.as_ref().map_or(0, |b| b.chunks.len())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn chunks(&self) -> &[Arc<Chunk>] {
		match &self.built {
			Some(built) => &built.chunks,
			None => &[],
		}
	}

	pub fn build<I, C>(&mut self, chunks: I) -> Result<()>
	where
		I: IntoIterator<Item = C>,
		C: Into<Arc<Chunk>>,
	{
		let chunks: Vec<Arc<Chunk>> = chunks.into_iter().map(Into::into).collect();
		let mut seen = HashSet::with_capacity(chunks.len());
		for chunk in &chunks {
			if !seen.insert(chunk.chunk_id.as_str()) {
				return Err(Error::DuplicateChunkId(chunk.chunk_id.clone()));
			}
		}

		let schema = build_schema();
		let text_field = schema.get_field(TEXT_FIELD).map_err(index_err)?;
		let ord_field = schema.get_field(ORD_FIELD).map_err(index_err)?;
		let index = Index::create_in_ram(schema);
		register_tokenizer(&index);

		let mut writer: IndexWriter = index
			.writer_with_num_threads(1, WRITER_HEAP_BYTES)
			.map_err(index_err)?;
		for (ord, chunk) in chunks.iter().enumerate() {
			writer
				.add_document(doc!(
					text_field => chunk.text.as_str(),
					ord_field => ord as u64,
				))
				.map_err(index_err)?;
		}
		writer.commit().map_err(index_err)?;

		let reader: IndexReader = index
			.reader_builder()
			.reload_policy(ReloadPolicy::Manual)
			.try_into()
			.map_err(index_err)?;

		info!(chunks = chunks.len(), "sparse index built");
		self.built = Some(BuiltIndex { chunks, reader, text_field, ord_field, _index: index });
		Ok(())
	}

	/// Up to `k` chunks with a strictly positive BM25 score, best first.
	pub fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
		let built = self
			.built
			.as_ref()
			.ok_or_else(|| Error::NotInitialized("sparse index".to_string()))?;
		if k == 0 {
			return Ok(Vec::new());
		}
		let tokens = analyze(query);
		if tokens.is_empty() {
			return Ok(Vec::new());
		}

		let clauses: Vec<(Occur, Box<dyn Query>)> = tokens
			.iter()
			.map(|token| {
				let term = Term::from_field_text(built.text_field, token);
				let query: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
				(Occur::Should, query)
			})
			.collect();
		let query = BooleanQuery::new(clauses);

		let searcher = built.reader.searcher();
		let top_docs = searcher.search(&query, &TopDocs::with_limit(k)).map_err(index_err)?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			if score <= 0.0 {
				continue;
			}
			let doc: TantivyDocument = searcher.doc(addr).map_err(index_err)?;
			let Some(ord) = doc.get_first(built.ord_field).and_then(|v| v.as_u64()) else { continue };
			let Some(chunk) = built.chunks.get(ord as usize) else { continue };
			hits.push(ScoredChunk::new(Arc::clone(chunk), score, Origin::Sparse));
		}
		debug!(tokens = tokens.len(), hits = hits.len(), "sparse search");
		Ok(hits)
	}

	/// Writes the chunk list to `path` through a temporary sibling file and a rename.
	pub fn save(&self, path: &Path) -> Result<()> {
		let built = self
			.built
			.as_ref()
			.ok_or_else(|| Error::NotInitialized("sparse index".to_string()))?;
		write_json_atomic(path, &ArtifactOut { version: ARTIFACT_VERSION, chunks: &built.chunks })?;
		info!(path = %path.display(), chunks = built.chunks.len(), "sparse index saved");
		Ok(())
	}

	pub fn load(&mut self, path: &Path) -> Result<()> {
		let artifact: ArtifactIn = read_json(path).map_err(|e| match e {
			Error::NotFound(p) => Error::NotFound(format!("sparse index artifact {p}")),
			other => other,
		})?;
		if artifact.version != ARTIFACT_VERSION {
			return Err(Error::Operation(format!(
				"sparse index artifact {} has version {}, expected {}",
				path.display(),
				artifact.version,
				ARTIFACT_VERSION
			)));
		}
		self.build(artifact.chunks)?;
		info!(path = %path.display(), chunks = self.len(), "sparse index loaded");
		Ok(())
	}

	pub fn open(path: &Path) -> Result<Self> {
		let mut index = Self::new();
		index.load(path)?;
		Ok(index)
	}
}
