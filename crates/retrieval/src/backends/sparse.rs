//! Sparse search over Tantivy (BM25)
//!
//! Keyword arm of the hybrid retriever. Indexes chunk text under a
//! lowercasing, stemming analyzer and scores with Tantivy's BM25.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

use lantern_core::{DocumentChunk, Error, Result, SparseIndex};

/// Sparse index configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Index directory; in RAM when `None`
    pub index_path: Option<String>,
    /// Enable English stemming
    pub stemming: bool,
    /// Writer heap budget in bytes
    pub writer_heap: usize,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            stemming: true,
            writer_heap: 50_000_000,
        }
    }
}

/// Tantivy-backed `SparseIndex`
pub struct TantivySparseIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    id_field: Field,
    text_field: Field,
}

impl TantivySparseIndex {
    pub fn new(config: SparseConfig) -> Result<Self> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("chunk_text")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", text_options);
        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                .map_err(|e| Error::Backend(e.to_string()))?;
            Index::open_or_create(dir, schema).map_err(|e| Error::Backend(e.to_string()))?
        } else {
            Index::create_in_ram(schema)
        };

        index
            .tokenizers()
            .register("chunk_text", Self::build_tokenizer(&config));

        let reader = index.reader().map_err(|e| Error::Backend(e.to_string()))?;
        let writer = index
            .writer(config.writer_heap)
            .map_err(|e| Error::Backend(e.to_string()))?;

        tracing::info!(stemming = config.stemming, "sparse index ready");

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            id_field,
            text_field,
        })
    }

    fn build_tokenizer(config: &SparseConfig) -> TextAnalyzer {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);

        if config.stemming {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        }
    }

    /// Index chunks and make them visible to searches
    pub fn index_chunks(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| Error::Backend("index writer not available".to_string()))?;

        for chunk in chunks {
            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, &chunk.chunk_id);
            doc.add_text(self.text_field, &chunk.text);
            writer
                .add_document(doc)
                .map_err(|e| Error::Backend(e.to_string()))?;
        }

        writer.commit().map_err(|e| Error::Backend(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| Error::Backend(e.to_string()))?;

        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn search_sync(
        index: &Index,
        reader: &IndexReader,
        id_field: Field,
        text_field: Field,
        query: &str,
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let searcher = reader.searcher();
        let parser = QueryParser::for_index(index, vec![text_field]);

        // Lenient parse: a stray "AND" or quote in user text should cost
        // recall, not fail the arm
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(k.max(1)))
            .map_err(|e| Error::Backend(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::Backend(e.to_string()))?;
            let id = doc
                .get_first(id_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .unwrap_or("")
                .to_string();
            if !id.is_empty() {
                hits.push((id, score));
            }
        }

        Ok(hits)
    }
}

#[async_trait]
impl SparseIndex for TantivySparseIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let index = self.index.clone();
        let reader = self.reader.clone();
        let id_field = self.id_field;
        let text_field = self.text_field;
        let query = query.to_string();

        // Tantivy search is CPU work; keep it off the async executor
        tokio::task::spawn_blocking(move || {
            Self::search_sync(&index, &reader, id_field, text_field, &query, k)
        })
        .await
        .map_err(|e| Error::Backend(format!("sparse search task failed: {e}")))?
    }
}
