//! citerag-core
//!
//! Domain types, error taxonomy, collaborator traits, configuration, the text
//! segmenter, directory ingestion, artifact persistence and the citation
//! engine.

pub mod citations;
pub mod config;
pub mod error;
pub mod ingest;
pub mod persist;
pub mod segmenter;
pub mod text;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
