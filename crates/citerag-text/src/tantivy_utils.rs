use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};
use tantivy::Index;

pub const TEXT_FIELD: &str = "text";
pub const ORD_FIELD: &str = "ord";
pub const TOKENIZER_NAME: &str = "alnum_lower";

/// `text` is indexed with term frequencies for BM25 and not stored; `ord` is
/// the chunk's position in the owning chunk list.
pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	let text_field_indexing = TextFieldIndexing::default()
		.set_tokenizer(TOKENIZER_NAME)
		.set_index_option(IndexRecordOption::WithFreqs);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing);
	let _text_field = schema_builder.add_text_field(TEXT_FIELD, text_options);
	let _ord_field = schema_builder.add_u64_field(ORD_FIELD, STORED);
	schema_builder.build()
}

/// Lowercased maximal alphanumeric runs; the same analyzer serves documents and queries.
pub fn text_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build()
}

pub fn register_tokenizer(index: &Index) {
	index.tokenizers().register(TOKENIZER_NAME, text_analyzer());
}

pub fn analyze(text: &str) -> Vec<String> {
	let mut analyzer = text_analyzer();
	let mut stream = analyzer.token_stream(text);
	let mut tokens = Vec::new();
	while stream.advance() {
		tokens.push(stream.token().text.clone());
	}
	tokens
}
