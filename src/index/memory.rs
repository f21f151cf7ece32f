use super::{Embedder, IndexError, IndexHit, SemanticIndex};
use crate::catalog::FunctionCatalog;
use crate::pipeline::model::ModulePathRef;
use crate::pipeline::prompts::truncate_chars;
use async_trait::async_trait;
use std::sync::Arc;

/// Texts embedded per request while building.
const EMBED_BATCH_SIZE: usize = 32;

/// A document to index, with the metadata returned on a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub content: String,
    pub module_path: ModulePathRef,
    pub file: String,
}

struct Entry {
    document: IndexDocument,
    vector: Vec<f32>,
}

/// In-memory cosine-similarity index.
#[derive(Default)]
pub struct MemoryIndex {
    embedder: Option<Arc<dyn Embedder>>,
    entries: Vec<Entry>,
}

impl MemoryIndex {
    /// An index that answers every query with zero hits.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Embed every document. A failed batch fails the whole build.
    pub async fn build(
        embedder: Arc<dyn Embedder>,
        documents: Vec<IndexDocument>,
    ) -> Result<Self, IndexError> {
        let mut entries = Vec::with_capacity(documents.len());

        for batch in documents.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(IndexError::Unavailable(format!(
                    "embedder returned {} vector(s) for {} document(s)",
                    vectors.len(),
                    batch.len()
                )));
            }
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(document, vector)| Entry { document, vector }),
            );
        }

        Ok(Self {
            embedder: Some(embedder),
            entries,
        })
    }

    /// Build from the catalogue, falling back to an empty index on failure.
    pub async fn build_or_empty(
        embedder: Arc<dyn Embedder>,
        catalog: &FunctionCatalog,
        max_chars: usize,
    ) -> Self {
        let documents = Self::documents_from_catalog(catalog, max_chars);
        match Self::build(embedder, documents).await {
            Ok(index) => {
                tracing::info!("Semantic index built with {} documents", index.len());
                index
            }
            Err(e) => {
                tracing::warn!("Semantic index unavailable, retrieval will find nothing: {}", e);
                Self::empty()
            }
        }
    }

    /// One document per catalogued function.
    pub fn documents_from_catalog(catalog: &FunctionCatalog, max_chars: usize) -> Vec<IndexDocument> {
        catalog
            .functions()
            .iter()
            .map(|function| IndexDocument {
                content: format!(
                    "# {}\n{}",
                    function.path,
                    truncate_chars(&function.source, max_chars)
                ),
                module_path: function.path.clone(),
                file: function.file_display(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SemanticIndex for MemoryIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let Some(embedder) = self.embedder.as_ref().filter(|_| !self.is_empty()) else {
            return Ok(Vec::new());
        };

        let query = embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Unavailable("no embedding returned for query".into()))?;

        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .map(|entry| IndexHit {
                snippet: entry.document.content.clone(),
                score: cosine_similarity(&query, &entry.vector),
                module_path: Some(entry.document.module_path.clone()),
                file: Some(entry.document.file.clone()),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.module_path.cmp(&b.module_path))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Cosine similarity; 0 for mismatched or zero-length vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
