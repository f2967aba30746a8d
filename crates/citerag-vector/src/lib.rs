//! Dense retrieval: the [`DenseIndex`] over pluggable vector stores, with a
//! LanceDB store for persistent use and an in-memory store for tests.
pub mod dense;
pub mod memory;
pub mod schema;
pub mod search;
pub mod store;
pub mod table;
pub mod writer;

pub use dense::DenseIndex;
pub use memory::MemoryStore;
pub use store::{LanceCollection, LanceStore};
