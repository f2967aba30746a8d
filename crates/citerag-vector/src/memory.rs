//! In-process [`VectorStore`] with exact cosine search.
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use citerag_core::traits::{VectorCollection, VectorMatch, VectorRecord, VectorStore};

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	let mut dot = 0.0f32;
	let mut norm_a = 0.0f32;
	let mut norm_b = 0.0f32;
	for (x, y) in a.iter().zip(b) {
		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}
	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}
	dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn poisoned() -> anyhow::Error {
	anyhow!("memory vector store lock poisoned")
}

#[derive(Default)]
pub struct MemoryStore {
	collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn collection_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.collections.read().map(|c| c.keys().cloned().collect()).unwrap_or_default();
		names.sort();
		names
	}
}

#[async_trait]
impl VectorStore for MemoryStore {
	async fn create_collection(&self, name: &str) -> Result<Arc<dyn VectorCollection>> {
		let mut collections = self.collections.write().map_err(|_| poisoned())?;
		if collections.contains_key(name) {
			bail!("collection {name} already exists");
		}
		let collection = Arc::new(MemoryCollection::new(name));
		collections.insert(name.to_string(), Arc::clone(&collection));
		Ok(collection)
	}

	async fn open_collection(&self, name: &str) -> Result<Arc<dyn VectorCollection>> {
		let collections = self.collections.read().map_err(|_| poisoned())?;
		let collection = collections.get(name).ok_or_else(|| anyhow!("collection {name} not found"))?;
		Ok(Arc::clone(collection) as Arc<dyn VectorCollection>)
	}

	async fn retire_collection(&self, name: &str) -> Result<()> {
		self.collections.write().map_err(|_| poisoned())?.remove(name);
		Ok(())
	}
}

#[derive(Default)]
struct Rows {
	records: Vec<VectorRecord>,
	// id -> position in `records`
	positions: HashMap<String, usize>,
}

pub struct MemoryCollection {
	name: String,
	rows: RwLock<Rows>,
}

impl MemoryCollection {
	fn new(name: &str) -> Self {
		Self { name: name.to_string(), rows: RwLock::new(Rows::default()) }
	}
}

#[async_trait]
impl VectorCollection for MemoryCollection {
	fn name(&self) -> &str {
		&self.name
	}

	async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
		let mut guard = self.rows.write().map_err(|_| poisoned())?;
		let rows = &mut *guard;
		for record in records {
			match rows.positions.get(&record.id) {
				Some(&at) => rows.records[at] = record.clone(),
				None => {
					rows.positions.insert(record.id.clone(), rows.records.len());
					rows.records.push(record.clone());
				}
			}
		}
		Ok(())
	}

	async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
		let rows = self.rows.read().map_err(|_| poisoned())?;
		let mut matches: Vec<VectorMatch> = rows
			.records
			.iter()
			.map(|r| VectorMatch {
				id: r.id.clone(),
				text: r.text.clone(),
				metadata: r.metadata.clone(),
				distance: 1.0 - cosine_similarity(vector, &r.vector),
			})
			.collect();
		matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
		matches.truncate(k);
		Ok(matches)
	}

	async fn count(&self) -> Result<usize> {
		Ok(self.rows.read().map_err(|_| poisoned())?.records.len())
	}
}
