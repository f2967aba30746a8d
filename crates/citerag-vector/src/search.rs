use anyhow::{anyhow, Result};
use arrow_array::{Array, Float32Array, RecordBatch, StringArray};

use citerag_core::traits::VectorMatch;
use citerag_core::types::Meta;

use crate::schema::{DISTANCE_COLUMN, ID_COLUMN, METADATA_COLUMN, TEXT_COLUMN};

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| anyhow!("{name} column missing from search results"))
}

/// Reads the rows of one vector-search result batch.
pub(crate) fn batch_to_matches(batch: &RecordBatch) -> Result<Vec<VectorMatch>> {
	let ids = string_column(batch, ID_COLUMN)?;
	let texts = string_column(batch, TEXT_COLUMN)?;
	let metadata = string_column(batch, METADATA_COLUMN)?;
	let distances = batch
		.column_by_name(DISTANCE_COLUMN)
		.and_then(|c| c.as_any().downcast_ref::<Float32Array>())
		.ok_or_else(|| anyhow!("{DISTANCE_COLUMN} column missing from search results"))?;

	let mut matches = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let meta: Meta = if metadata.is_null(i) { Meta::new() } else { serde_json::from_str(metadata.value(i))? };
		matches.push(VectorMatch {
			id: ids.value(i).to_string(),
			text: texts.value(i).to_string(),
			metadata: meta,
			distance: distances.value(i),
		});
	}
	Ok(matches)
}
