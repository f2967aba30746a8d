//! Collaborator seams. Every model or external engine the pipeline talks to is
//! injected through one of these traits.

use async_trait::async_trait;
use std::sync::Arc;

use crate::types::Meta;

/// Dense text encoder: one fixed-length vector per input, order preserving.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Query-aware relevance model: one score per candidate, higher is better.
pub trait CrossEncoder: Send + Sync {
    fn score(&self, query: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// Text generation model.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, user: &str, temperature: f32) -> anyhow::Result<String>;
}

/// A row written into a vector collection.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Meta,
}

/// A nearest-neighbour hit. `distance` is cosine distance.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub metadata: Meta,
    pub distance: f32,
}

/// One named set of vectors inside a store.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;
    async fn upsert(&self, records: &[VectorRecord]) -> anyhow::Result<()>;
    async fn query(&self, vector: &[f32], k: usize) -> anyhow::Result<Vec<VectorMatch>>;
    async fn count(&self) -> anyhow::Result<usize>;
}

/// Vector database holding named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, name: &str) -> anyhow::Result<Arc<dyn VectorCollection>>;
    async fn open_collection(&self, name: &str) -> anyhow::Result<Arc<dyn VectorCollection>>;
    /// Release a collection that is no longer published.
    async fn retire_collection(&self, name: &str) -> anyhow::Result<()>;
}
