use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use citerag_core::traits::{Embedder, VectorRecord, VectorStore};
use citerag_core::types::{Chunk, Meta};
use citerag_core::Error;
use citerag_embed::HashEmbedder;
use citerag_vector::memory::cosine_similarity;
use citerag_vector::{DenseIndex, MemoryStore};

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn dim(&self) -> usize {
        4
    }
    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("model offline")
    }
}

/// Blocks inside `embed_batch` until the test releases it from another task.
struct GatedEmbedder {
    gate: Mutex<mpsc::Receiver<()>>,
}

impl Embedder for GatedEmbedder {
    fn dim(&self) -> usize {
        2
    }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.gate
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| anyhow::anyhow!("embedding blocked the async worker"))?;
        Ok(vec![vec![1.0, 0.0]; texts.len()])
    }
}

fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord { id: id.to_string(), vector, text: id.to_string(), metadata: Meta::new() }
}

#[test]
fn cosine_similarity_basics() {
    assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
}

#[tokio::test]
async fn memory_collection_orders_by_distance_and_upserts() {
    let store = MemoryStore::new();
    let collection = store.create_collection("a").await.expect("create");
    collection
        .upsert(&[record("x", vec![1.0, 0.0]), record("y", vec![0.0, 1.0]), record("z", vec![0.7, 0.7])])
        .await
        .expect("upsert");
    let hits = collection.query(&[1.0, 0.1], 2).await.expect("query");
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["x", "z"]);
    assert!(hits[0].distance <= hits[1].distance);

    collection.upsert(&[record("x", vec![0.0, 1.0])]).await.expect("replace");
    assert_eq!(collection.count().await.expect("count"), 3);
    assert_eq!(collection.query(&[1.0, 0.1], 1).await.expect("query")[0].id, "z");
}

#[tokio::test]
async fn memory_collection_upsert_replaces_by_id_in_large_batches() {
    let store = MemoryStore::new();
    let collection = store.create_collection("bulk").await.expect("create");
    let batch: Vec<VectorRecord> = (0..2000).map(|i| record(&format!("r{i}"), vec![1.0, i as f32])).collect();
    collection.upsert(&batch).await.expect("insert");

    let replaced: Vec<VectorRecord> = (0..1000).map(|i| record(&format!("r{i}"), vec![-1.0, 0.0])).collect();
    collection.upsert(&replaced).await.expect("replace");
    assert_eq!(collection.count().await.expect("count"), 2000);

    let hits = collection.query(&[-1.0, 0.0], 1000).await.expect("query");
    assert!(hits.iter().all(|h| h.distance < 1e-6), "replaced rows carry the new vector");

    // Later duplicates in one batch win.
    collection
        .upsert(&[record("dup", vec![1.0, 0.0]), record("dup", vec![0.0, 1.0])])
        .await
        .expect("dup");
    assert_eq!(collection.count().await.expect("count"), 2001);
    let top = collection.query(&[0.0, 1.0], 1).await.expect("query");
    assert_eq!(top[0].id, "dup");
}

#[tokio::test]
async fn memory_store_lifecycle() {
    let store = MemoryStore::new();
    store.create_collection("gen-1").await.expect("create");
    assert!(store.create_collection("gen-1").await.is_err());
    assert!(store.open_collection("gen-1").await.is_ok());
    store.retire_collection("gen-1").await.expect("retire");
    assert!(store.open_collection("gen-1").await.is_err());
    assert!(store.collection_names().is_empty());
}

#[tokio::test]
async fn dense_index_search_and_edge_cases() {
    let store = MemoryStore::new();
    let collection = store.create_collection("gen").await.expect("create");
    let index = DenseIndex::new(collection, Arc::new(HashEmbedder::new(128)));
    let chunks: Vec<Arc<Chunk>> = vec![
        Arc::new(Chunk::new("a", "solar panels charge batteries", "energy.txt")),
        Arc::new(Chunk::new("b", "sourdough bread needs a starter", "food.txt")),
    ];
    index.add_chunks(&chunks).await.expect("add");

    let hits = index.search("charge the batteries", 5).await.expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id(), "a");
    assert!(hits[0].score > hits[1].score);

    assert!(index.search("anything", 0).await.expect("k=0").is_empty());
    assert!(index.search("   ", 3).await.expect("blank").is_empty());
}

#[tokio::test]
async fn embedder_failure_is_a_collaborator_error() {
    let store = MemoryStore::new();
    let collection = store.create_collection("gen").await.expect("create");
    let index = DenseIndex::new(collection, Arc::new(FailingEmbedder));
    let err = index.search("query", 3).await.expect_err("embedder fails");
    match err {
        Error::Collaborator { stage, message } => {
            assert_eq!(stage, "embedding");
            assert!(message.contains("model offline"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn embedding_does_not_block_the_async_worker() {
    // Single-threaded runtime: the releasing task can only run if embedding
    // happens off the worker thread.
    let (tx, rx) = mpsc::channel();
    let store = MemoryStore::new();
    let collection = store.create_collection("gated").await.expect("create");
    let index = DenseIndex::new(collection, Arc::new(GatedEmbedder { gate: Mutex::new(rx) }));

    let release = tokio::spawn(async move {
        tx.send(()).expect("send");
        tx
    });
    index.add_chunks(&[Arc::new(Chunk::new("a", "text", "s.txt"))]).await.expect("add");
    let tx = release.await.expect("release task");

    tx.send(()).expect("send");
    let hits = index.search("text", 1).await.expect("search");
    assert_eq!(hits[0].id(), "a");
}
