//! citerag-hybrid
//!
//! Hybrid retrieval (sparse + dense fused with RRF), reranking, cited answer
//! generation and the [`RagPipeline`] that ties them together.
pub mod fusion;
pub mod generation;
pub mod openai;
pub mod pipeline;
pub mod rerank;

pub use fusion::{reciprocal_rank_fusion, FusionRetriever};
pub use generation::ExtractiveGenerator;
pub use openai::OpenAiGenerator;
pub use pipeline::{Collaborators, Manifest, PipelineConfig, RagPipeline};
pub use rerank::{Reranker, TermOverlapScorer};
