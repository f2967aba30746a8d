use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use citerag_core::persist::{read_json, tmp_path, write_json_atomic};
use citerag_core::traits::Generator;
use citerag_core::Error;
use citerag_embed::HashEmbedder;
use citerag_hybrid::generation::{INSUFFICIENT_INFORMATION, MISSING_CITATIONS_NOTE};
use citerag_hybrid::{Collaborators, ExtractiveGenerator, Manifest, PipelineConfig, RagPipeline, TermOverlapScorer};
use citerag_vector::MemoryStore;
use tempfile::TempDir;

struct FixedGenerator {
    reply: String,
    calls: AtomicUsize,
}

impl FixedGenerator {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self { reply: reply.to_string(), calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FixedGenerator {
    async fn generate(&self, _system: &str, user: &str, _temperature: f32) -> Result<String> {
        assert!(user.contains("[1] (Source: "), "context block is passed to the generator");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _system: &str, _user: &str, _temperature: f32) -> Result<String> {
        anyhow::bail!("rate limited")
    }
}

fn collaborators(store: Arc<MemoryStore>, generator: Arc<dyn Generator>) -> Collaborators {
    Collaborators {
        embedder: Arc::new(HashEmbedder::new(128)),
        vector_store: store,
        cross_encoder: Arc::new(TermOverlapScorer),
        generator,
    }
}

fn write_corpus(dir: &Path) {
    fs::write(
        dir.join("fire.md"),
        "# Fire\nStrike flint against steel to make sparks. Dry tinder catches the sparks.\n\n## Safety\nClear a ring around the fire pit before lighting.\n",
    )
    .expect("write fire.md");
    fs::write(dir.join("water.txt"), "Boil water for one minute to make it safe to drink.").expect("write water.txt");
    fs::write(dir.join("garden.txt"), "Tomatoes need full sun and regular watering.").expect("write garden.txt");
}

fn sparse_artifacts(data: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(data.join("sparse"))
        .expect("sparse dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn setup(generator: Arc<dyn Generator>) -> (TempDir, TempDir, Arc<MemoryStore>, RagPipeline) {
    let docs = TempDir::new().expect("docs");
    write_corpus(docs.path());
    let data = TempDir::new().expect("data");
    let store = Arc::new(MemoryStore::new());
    let pipeline = RagPipeline::new(PipelineConfig::in_dir(data.path()), collaborators(Arc::clone(&store), generator));
    (docs, data, store, pipeline)
}

#[tokio::test]
async fn query_before_ingest_is_not_ready() {
    let (_docs, _data, _store, pipeline) = setup(FixedGenerator::new("x [1]"));
    assert!(!pipeline.is_ready());
    assert_eq!(pipeline.chunk_count(), 0);
    assert!(matches!(pipeline.query("anything").await, Err(Error::NotReady)));
}

#[tokio::test]
async fn ingest_then_query_returns_validated_citations() {
    let generator = FixedGenerator::new("Use flint and steel [1]. Also see [9] and [1, 7].");
    let (docs, _data, _store, pipeline) = setup(generator.clone());

    let count = pipeline.ingest(docs.path()).await.expect("ingest");
    assert_eq!(count, 4);
    assert!(pipeline.is_ready());
    assert_eq!(pipeline.chunk_count(), 4);

    let response = pipeline.query("How do I make sparks with flint?").await.expect("query");
    assert_eq!(generator.calls(), 1);
    assert_eq!(response.query, "How do I make sparks with flint?");
    assert!(!response.chunks_used.is_empty() && response.chunks_used.len() <= 5);
    assert!(response.chunks_used[0].chunk.text.contains("flint"));
    assert!(!response.answer.contains("[9]"));
    assert!(!response.answer.contains('7'));
    assert!(response.answer.contains("[1]"));
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].ref_id, 1);
}

#[tokio::test]
async fn answer_without_citations_gets_disclosure_and_all_sources() {
    let (docs, _data, _store, pipeline) = setup(FixedGenerator::new(""));
    pipeline.ingest(docs.path()).await.expect("ingest");

    let response = pipeline.query_with("boil water safe drink", 3).await.expect("query");
    assert!(response.answer.ends_with(MISSING_CITATIONS_NOTE.trim_start()));
    assert_eq!(response.citations.len(), response.chunks_used.len());
    let ids: Vec<usize> = response.citations.iter().map(|c| c.ref_id).collect();
    assert_eq!(ids, (1..=response.chunks_used.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn blank_question_short_circuits_generation() {
    let generator = FixedGenerator::new("unused [1]");
    let (docs, _data, _store, pipeline) = setup(generator.clone());
    pipeline.ingest(docs.path()).await.expect("ingest");

    let response = pipeline.query("   ").await.expect("query");
    assert_eq!(response.answer, INSUFFICIENT_INFORMATION);
    assert!(response.citations.is_empty());
    assert!(response.chunks_used.is_empty());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn query_options_are_validated() {
    let (docs, _data, _store, pipeline) = setup(FixedGenerator::new("a [1]"));
    pipeline.ingest(docs.path()).await.expect("ingest");
    assert!(matches!(pipeline.query_with("fire", 0).await, Err(Error::InvalidConfig(_))));
    assert!(matches!(pipeline.query_with("fire", 21).await, Err(Error::InvalidConfig(_))));
    let long = "fire ".repeat(401);
    assert!(matches!(pipeline.query_with(&long, 5).await, Err(Error::InvalidConfig(_))));
    assert_eq!(pipeline.query_with("fire", 1).await.expect("k=1").chunks_used.len(), 1);
}

#[tokio::test]
async fn generation_failure_surfaces_as_collaborator_error() {
    let (docs, _data, _store, pipeline) = setup(Arc::new(FailingGenerator));
    pipeline.ingest(docs.path()).await.expect("ingest");
    match pipeline.query("fire safety").await {
        Err(Error::Collaborator { stage, message }) => {
            assert_eq!(stage, "generation");
            assert!(message.contains("rate limited"));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn empty_ingest_keeps_current_state() {
    let (docs, _data, _store, pipeline) = setup(FixedGenerator::new("a [1]"));
    let empty = TempDir::new().expect("empty");
    assert_eq!(pipeline.ingest(empty.path()).await.expect("empty ingest"), 0);
    assert!(!pipeline.is_ready());

    pipeline.ingest(docs.path()).await.expect("ingest");
    let before = pipeline.manifest().expect("manifest");
    assert_eq!(pipeline.ingest(empty.path()).await.expect("empty ingest"), 0);
    assert_eq!(pipeline.manifest().expect("manifest"), before);
}

#[tokio::test]
async fn reingest_publishes_a_new_generation_and_retires_old_ones() {
    let (docs, data, store, pipeline) = setup(FixedGenerator::new("a [1]"));
    pipeline.ingest(docs.path()).await.expect("first");
    let first = pipeline.manifest().expect("manifest").collection;

    let other = TempDir::new().expect("other");
    fs::write(other.path().join("rust.txt"), "Ownership moves values between bindings.").expect("write");
    assert_eq!(pipeline.ingest(other.path()).await.expect("second"), 1);
    let second = pipeline.manifest().expect("manifest").collection;
    assert_ne!(first, second);
    assert_eq!(pipeline.chunk_count(), 1);
    // The previous generation stays readable until the next publish.
    assert_eq!(store.collection_names().len(), 2);

    let response = pipeline.query("flint sparks").await.expect("query");
    assert!(response.chunks_used.iter().all(|c| c.chunk.source.ends_with("rust.txt")));

    pipeline.ingest(docs.path()).await.expect("third");
    let names = store.collection_names();
    assert_eq!(names.len(), 2);
    assert!(!names.contains(&first));
    assert!(names.contains(&second));
    let artifacts = sparse_artifacts(data.path());
    assert_eq!(artifacts.len(), 2, "retired generations lose their sparse artifact too");
    assert!(!artifacts.contains(&format!("{first}.json")));
}

#[tokio::test]
async fn failed_manifest_write_keeps_previous_generation_loadable() {
    let (docs, data, store, pipeline) = setup(FixedGenerator::new("a [1]"));
    pipeline.ingest(docs.path()).await.expect("first");
    let first = pipeline.manifest().expect("manifest");

    // A directory squatting on the manifest's temporary name breaks the commit.
    let manifest_path = data.path().join("manifest.json");
    fs::create_dir(tmp_path(&manifest_path)).expect("block manifest write");
    let other = TempDir::new().expect("other");
    fs::write(other.path().join("rust.txt"), "Ownership moves values between bindings.").expect("write");
    assert!(pipeline.ingest(other.path()).await.is_err());

    assert_eq!(pipeline.manifest().expect("manifest"), first, "serving state is untouched");
    assert_eq!(store.collection_names(), vec![first.collection.clone()]);
    assert_eq!(sparse_artifacts(data.path()), vec![format!("{}.json", first.collection)]);

    let restored = RagPipeline::new(
        PipelineConfig::in_dir(data.path()),
        collaborators(Arc::clone(&store), Arc::new(ExtractiveGenerator)),
    );
    restored.load_indexes().await.expect("load previous generation");
    assert_eq!(restored.chunk_count(), 4);
    assert_eq!(restored.manifest().expect("manifest").collection, first.collection);
    let response = restored.query("How long should I boil water?").await.expect("query");
    assert!(response.chunks_used.iter().all(|c| !c.chunk.source.ends_with("rust.txt")));
}

#[tokio::test]
async fn load_rejects_sparse_artifact_that_disagrees_with_manifest() {
    let (docs, data, store, pipeline) = setup(FixedGenerator::new("a [1]"));
    pipeline.ingest(docs.path()).await.expect("ingest");
    let manifest_path = data.path().join("manifest.json");
    let mut manifest: Manifest = read_json(&manifest_path).expect("read manifest");
    manifest.chunk_count = 99;
    write_json_atomic(&manifest_path, &manifest).expect("rewrite manifest");

    let restored = RagPipeline::new(
        PipelineConfig::in_dir(data.path()),
        collaborators(Arc::clone(&store), Arc::new(ExtractiveGenerator)),
    );
    assert!(matches!(restored.load_indexes().await, Err(Error::Operation(_))));
    assert!(!restored.is_ready());
}

#[tokio::test]
async fn fresh_pipeline_ingest_retires_generation_left_on_disk() {
    let (docs, data, store, pipeline) = setup(FixedGenerator::new("a [1]"));
    pipeline.ingest(docs.path()).await.expect("first process");
    let first = pipeline.manifest().expect("manifest").collection;
    drop(pipeline);

    // A second process starts EMPTY and rebuilds without loading first.
    let next = RagPipeline::new(
        PipelineConfig::in_dir(data.path()),
        collaborators(Arc::clone(&store), Arc::new(ExtractiveGenerator)),
    );
    next.ingest(docs.path()).await.expect("second process");
    let second = next.manifest().expect("manifest").collection;

    assert_ne!(first, second);
    assert_eq!(store.collection_names(), vec![second.clone()]);
    assert_eq!(sparse_artifacts(data.path()), vec![format!("{second}.json")]);
}

#[tokio::test]
async fn load_indexes_restores_a_published_generation() {
    let (docs, data, store, pipeline) = setup(FixedGenerator::new("a [1]"));
    pipeline.ingest(docs.path()).await.expect("ingest");
    let manifest = pipeline.manifest().expect("manifest");

    let restored = RagPipeline::new(
        PipelineConfig::in_dir(data.path()),
        collaborators(Arc::clone(&store), Arc::new(ExtractiveGenerator)),
    );
    assert!(!restored.is_ready());
    restored.load_indexes().await.expect("load");
    assert_eq!(restored.manifest().expect("manifest").collection, manifest.collection);
    assert_eq!(restored.chunk_count(), 4);

    let response = restored.query("How long should I boil water?").await.expect("query");
    assert!(response.answer.contains("[1]"));
    assert!(!response.citations.is_empty());
    assert!(response.citations[0].source.ends_with("water.txt"));
}

#[tokio::test]
async fn load_without_manifest_is_not_found() {
    let data = TempDir::new().expect("data");
    let store = Arc::new(MemoryStore::new());
    let pipeline = RagPipeline::new(PipelineConfig::in_dir(data.path()), collaborators(store, Arc::new(ExtractiveGenerator)));
    assert!(matches!(pipeline.load_indexes().await, Err(Error::NotFound(_))));
    assert!(!pipeline.is_ready());
}

#[tokio::test]
async fn index_chunks_rejects_duplicate_ids() {
    let (_docs, _data, store, pipeline) = setup(FixedGenerator::new("a [1]"));
    let chunks = vec![
        citerag_core::types::Chunk::new("same", "one", "a.txt"),
        citerag_core::types::Chunk::new("same", "two", "b.txt"),
    ];
    assert!(matches!(pipeline.index_chunks(chunks).await, Err(Error::DuplicateChunkId(_))));
    assert!(!pipeline.is_ready());
    assert!(store.collection_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_share_one_snapshot() {
    let (docs, _data, _store, pipeline) = setup(Arc::new(ExtractiveGenerator));
    pipeline.ingest(docs.path()).await.expect("ingest");
    let pipeline = Arc::new(pipeline);

    let questions = ["flint sparks", "boil water", "tomatoes sun", "fire pit safety"];
    let handles: Vec<_> = questions
        .iter()
        .map(|q| {
            let pipeline = Arc::clone(&pipeline);
            let q = q.to_string();
            tokio::spawn(async move { pipeline.query(&q).await })
        })
        .collect();
    for (question, result) in questions.iter().zip(futures::future::join_all(handles).await) {
        let response = result.expect("join").expect("query");
        assert_eq!(response.query, *question);
        assert!(!response.citations.is_empty());
    }
}
