//! Retrieval augmentation through the semantic index.
//!
//! The oracle writes a query, the index returns the K nearest snippets, and
//! the oracle extracts facts from them. Retrieval is an enrichment: any error
//! yields no results plus a `RetrievalFailed` note, and zero hits skip the
//! extraction round trip.

use super::error::PipelineError;
use super::facts::{Fact, Provenance};
use super::model::{FunctionInfo, RetrievalResult};
use super::prompts::{self, FactsResponse, RetrievalQueryResponse};
use super::selector::facts_from_response;
use crate::catalog::FunctionCatalog;
use crate::index::SemanticIndex;
use crate::oracle::{ask, LanguageOracle};

/// What retrieval contributed for one function.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub query: Option<String>,
    pub results: Vec<RetrievalResult>,
    pub facts: Vec<Fact>,
    pub failure: Option<PipelineError>,
}

impl Retrieval {
    fn failed(query: Option<String>, failure: PipelineError) -> Self {
        Self {
            query,
            failure: Some(failure),
            ..Default::default()
        }
    }
}

pub struct RetrievalAugmenter<'a> {
    oracle: &'a dyn LanguageOracle,
    index: &'a dyn SemanticIndex,
    catalog: &'a FunctionCatalog,
    k: usize,
    max_chars: usize,
}

impl<'a> RetrievalAugmenter<'a> {
    pub fn new(
        oracle: &'a dyn LanguageOracle,
        index: &'a dyn SemanticIndex,
        catalog: &'a FunctionCatalog,
        k: usize,
        max_chars: usize,
    ) -> Self {
        Self {
            oracle,
            index,
            catalog,
            k,
            max_chars,
        }
    }

    pub async fn augment(&self, function: &FunctionInfo) -> Retrieval {
        let request = prompts::retrieval_query(function, self.max_chars);
        let query = match ask::<RetrievalQueryResponse>(self.oracle, &request).await {
            Ok(response) if !response.retrieval_query.trim().is_empty() => {
                response.retrieval_query.trim().to_string()
            }
            Ok(_) => return self.degrade(function, None, "oracle returned an empty query".into()),
            Err(e) => return self.degrade(function, None, format!("query generation: {}", e)),
        };
        tracing::debug!(function = %function.path, "Retrieval query: {}", query);

        let hits = match self.index.query(&query, self.k).await {
            Ok(hits) => hits,
            Err(e) => return self.degrade(function, Some(query), e.to_string()),
        };

        // The target's own source is already in every prompt.
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|hit| hit.module_path.as_ref() != Some(&function.path))
            .map(|hit| RetrievalResult {
                snippet: hit.snippet,
                module_path: hit.module_path,
                file: hit.file,
                score: hit.score,
            })
            .collect();

        if results.is_empty() {
            tracing::info!(function = %function.path, "Semantic index returned no related snippets");
            return Retrieval {
                query: Some(query),
                ..Default::default()
            };
        }

        let request = prompts::extract_retrieval_facts(function, &results, self.max_chars);
        let response: FactsResponse = match ask(self.oracle, &request).await {
            Ok(response) => response,
            Err(e) => {
                return self.degrade(function, Some(query), format!("fact extraction: {}", e))
            }
        };

        let facts = weight_by_score(
            facts_from_response(&response, function, self.catalog, Provenance::Retrieval),
            &results,
        );
        tracing::debug!(
            function = %function.path,
            "Retrieval produced {} snippet(s) and {} fact(s)",
            results.len(),
            facts.len()
        );

        Retrieval {
            query: Some(query),
            results,
            facts,
            failure: None,
        }
    }

    fn degrade(&self, function: &FunctionInfo, query: Option<String>, reason: String) -> Retrieval {
        let failure = PipelineError::RetrievalFailed(reason);
        tracing::warn!(function = %function.path, "{}", failure);
        Retrieval::failed(query, failure)
    }
}

/// Scale the confidence of facts about a retrieved symbol by the best
/// similarity score among the snippets that name it.
fn weight_by_score(facts: Vec<Fact>, results: &[RetrievalResult]) -> Vec<Fact> {
    facts
        .into_iter()
        .map(|fact| {
            let best = fact.path.resolved().and_then(|path| {
                results
                    .iter()
                    .filter(|r| {
                        r.module_path
                            .as_ref()
                            .is_some_and(|m| path.starts_with(m) || m.starts_with(path))
                    })
                    .map(|r| r.score)
                    .max_by(f32::total_cmp)
            });
            match best {
                Some(score) => {
                    let weighted = fact.confidence * score;
                    fact.with_confidence(weighted)
                }
                None => fact,
            }
        })
        .collect()
}
