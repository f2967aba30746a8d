use anyhow::{bail, Result};
use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, RecordBatch, StringArray};
use std::sync::Arc;

use citerag_core::traits::VectorRecord;

use crate::schema::build_arrow_schema;

/// Converts records into one Arrow batch, rejecting vectors of the wrong width.
pub(crate) fn records_to_batch(records: &[VectorRecord], dim: usize) -> Result<RecordBatch> {
	let width = i32::try_from(dim)?;
	let mut ids = Vec::with_capacity(records.len());
	let mut texts = Vec::with_capacity(records.len());
	let mut metadata = Vec::with_capacity(records.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
	for record in records {
		if record.vector.len() != dim {
			bail!("vector for {} has dimension {}, expected {}", record.id, record.vector.len(), dim);
		}
		ids.push(record.id.as_str());
		texts.push(record.text.as_str());
		metadata.push(serde_json::to_string(&record.metadata)?);
		vectors.push(Some(record.vector.iter().map(|&x| Some(x)).collect()));
	}
	let batch = RecordBatch::try_new(
		build_arrow_schema(width),
		vec![
			Arc::new(StringArray::from(ids)),
			Arc::new(StringArray::from(texts)),
			Arc::new(StringArray::from(metadata)),
			Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, width)),
		],
	)?;
	Ok(batch)
}
