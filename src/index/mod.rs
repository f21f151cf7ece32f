//! Semantic index over project source.
//!
//! The retrieval stage only sees the [`SemanticIndex`] trait. The bundled
//! implementation is an in-memory cosine index built once per run from the
//! catalogue; nothing is persisted.

mod memory;

pub use memory::MemoryIndex;

use crate::pipeline::model::ModulePathRef;
use async_trait::async_trait;
use thiserror::Error;

/// One scored snippet returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub snippet: String,
    pub score: f32,
    pub module_path: Option<ModulePathRef>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("semantic index unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// At most `k` hits, best first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError>;
}

/// Turns text into vectors for [`MemoryIndex`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;
}
