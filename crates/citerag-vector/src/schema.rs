use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const ID_COLUMN: &str = "id";
pub const TEXT_COLUMN: &str = "text";
pub const METADATA_COLUMN: &str = "metadata";
pub const VECTOR_COLUMN: &str = "vector";
/// Added by LanceDB to vector search results.
pub const DISTANCE_COLUMN: &str = "_distance";

/// One row per chunk; `metadata` is the chunk's metadata map as a JSON object.
pub fn build_arrow_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new(ID_COLUMN, DataType::Utf8, false),
		Field::new(TEXT_COLUMN, DataType::Utf8, false),
		Field::new(METADATA_COLUMN, DataType::Utf8, false),
		Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}
