//! LanceDB-backed [`VectorStore`].
//!
//! Each index generation lives in its own table. Upserts go through
//! `merge_insert` keyed on `id`; queries use cosine distance.
use anyhow::{bail, Result};
use arrow_array::RecordBatchIterator;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::sync::Arc;
use tracing::{debug, info};

use citerag_core::traits::{VectorCollection, VectorMatch, VectorRecord, VectorStore};

use crate::schema::build_arrow_schema;
use crate::search::batch_to_matches;
use crate::table::{ensure_table, open_db, table_exists};
use crate::writer::records_to_batch;

pub struct LanceStore {
	db: Connection,
	dim: usize,
}

impl LanceStore {
	pub async fn open(uri: &str, dim: usize) -> Result<Self> {
		let db = open_db(uri).await?;
		info!(uri, dim, "opened lancedb");
		Ok(Self { db, dim })
	}

	pub fn dim(&self) -> usize {
		self.dim
	}
}

#[async_trait]
impl VectorStore for LanceStore {
	async fn create_collection(&self, name: &str) -> Result<Arc<dyn VectorCollection>> {
		if table_exists(&self.db, name).await? {
			bail!("collection {name} already exists");
		}
		ensure_table(&self.db, name, build_arrow_schema(i32::try_from(self.dim)?)).await?;
		debug!(collection = name, "created lancedb table");
		self.open_collection(name).await
	}

	async fn open_collection(&self, name: &str) -> Result<Arc<dyn VectorCollection>> {
		let table = self.db.open_table(name).execute().await?;
		Ok(Arc::new(LanceCollection { name: name.to_string(), table, dim: self.dim }))
	}

	async fn retire_collection(&self, name: &str) -> Result<()> {
		if !table_exists(&self.db, name).await? {
			return Ok(());
		}
		self.db.drop_table(name, &[]).await?;
		info!(collection = name, "dropped lancedb table");
		Ok(())
	}
}

pub struct LanceCollection {
	name: String,
	table: Table,
	dim: usize,
}

#[async_trait]
impl VectorCollection for LanceCollection {
	fn name(&self) -> &str {
		&self.name
	}

	async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
		if records.is_empty() {
			return Ok(());
		}
		let record_batch = records_to_batch(records, self.dim)?;
		let schema = record_batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
		let mut mi = self.table.merge_insert(&["id"]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		mi.execute(reader).await?;
		Ok(())
	}

	async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		if vector.len() != self.dim {
			bail!("query vector has dimension {}, expected {}", vector.len(), self.dim);
		}
		let mut results = self
			.table
			.vector_search(vector.to_vec())?
			.distance_type(DistanceType::Cosine)
			.limit(k)
			.execute()
			.await?;
		let mut matches = Vec::new();
		while let Some(batch) = results.try_next().await? {
			matches.extend(batch_to_matches(&batch)?);
		}
		matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
		matches.truncate(k);
		Ok(matches)
	}

	async fn count(&self) -> Result<usize> {
		Ok(self.table.count_rows(None).await?)
	}
}
