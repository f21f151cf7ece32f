//! The per-function test generation pipeline.
//!
//! `process_function` runs selection and retrieval side by side, merges their
//! facts, and drives synthesis through the bounded repair loop. It touches no
//! state shared with other functions except the read-only catalogue, so the
//! runner can dispatch it to any number of workers.

pub mod aggregator;
pub mod error;
pub mod facts;
pub mod model;
pub mod prompts;
pub mod repair;
pub mod retrieval;
pub mod selector;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod fakes;

use crate::catalog::FunctionCatalog;
use crate::checker::StaticChecker;
use crate::config::PipelineConfig;
use crate::index::SemanticIndex;
use crate::oracle::LanguageOracle;
use crate::project::TreeDescription;
use crate::runner::CancelFlag;
use aggregator::aggregate;
use anyhow::{Context, Result};
use error::PipelineError;
use model::{FunctionInfo, TestArtifact, ValidationReport};
use repair::{RepairLoop, RepairOutcome, RepairPolicy, StaticValidator};
use retrieval::RetrievalAugmenter;
use selector::RelevanceSelector;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use synthesizer::TestSynthesizer;

/// Read-only knobs shared by every pipeline of a run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub top_n: NonZeroUsize,
    pub retrieval_k: usize,
    pub max_source_snippet_chars: usize,
    pub policy: RepairPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let top_n = NonZeroUsize::new(config.top_n).context("pipeline.top_n must be at least 1")?;
        Ok(Self {
            top_n,
            retrieval_k: config.retrieval_k,
            max_source_snippet_chars: config.max_source_snippet_chars,
            policy: RepairPolicy::from(config),
        })
    }
}

/// Everything a pipeline needs. Cheap to clone; one clone per worker.
#[derive(Clone)]
pub struct PipelineEnv {
    pub oracle: Arc<dyn LanguageOracle>,
    pub index: Arc<dyn SemanticIndex>,
    pub checker: Arc<dyn StaticChecker>,
    pub catalog: Arc<FunctionCatalog>,
    pub tree: Arc<TreeDescription>,
    pub project_root: PathBuf,
    pub settings: PipelineSettings,
    pub cancel: CancelFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionStatus {
    Final,
    Failed,
    Cancelled,
}

impl fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Final => write!(f, "FINAL"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// What one pipeline produced.
#[derive(Debug, Clone)]
pub struct FunctionOutcome {
    pub function: FunctionInfo,
    pub status: FunctionStatus,
    /// The FINAL artifact, the FAILED one kept for inspection, or the last
    /// draft of a cancelled pipeline.
    pub artifact: Option<TestArtifact>,
    pub report: Option<ValidationReport>,
    /// Stage failures and repair history, in the order they happened.
    pub notes: Vec<PipelineError>,
    pub attempts: u32,
    pub selected_files: Vec<String>,
    /// The query the oracle wrote for the semantic index, if any.
    pub retrieval_query: Option<String>,
    pub retrieval_hits: usize,
    /// Where the artifact was written, once the runner has written it.
    pub output: Option<PathBuf>,
}

impl FunctionOutcome {
    /// Why the pipeline did not reach FINAL.
    pub fn reason(&self) -> Option<&PipelineError> {
        match self.status {
            FunctionStatus::Final => None,
            _ => self
                .notes
                .iter()
                .rev()
                .find(|n| matches!(n, PipelineError::BudgetExhausted { .. } | PipelineError::Cancelled { .. })),
        }
    }

    /// Whether a context-gathering stage failed along the way.
    pub fn degraded(&self) -> bool {
        self.notes.iter().any(PipelineError::is_degradation)
    }

    fn cancelled(function: &FunctionInfo, stage: &str) -> Self {
        Self {
            function: function.clone(),
            status: FunctionStatus::Cancelled,
            artifact: None,
            report: None,
            notes: vec![PipelineError::Cancelled {
                stage: stage.to_string(),
            }],
            attempts: 0,
            selected_files: Vec::new(),
            retrieval_query: None,
            retrieval_hits: 0,
            output: None,
        }
    }
}

/// Run one function through selection, retrieval, aggregation, and repair.
pub async fn process_function(function: &FunctionInfo, env: &PipelineEnv) -> FunctionOutcome {
    if env.cancel.is_cancelled() {
        return FunctionOutcome::cancelled(function, "selection");
    }
    tracing::info!(function = %function.path, "Processing {}", function.file_display());

    let settings = &env.settings;
    let chars = settings.max_source_snippet_chars;
    let selector = RelevanceSelector::new(
        env.oracle.as_ref(),
        &env.catalog,
        &env.project_root,
        chars,
    );
    let augmenter = RetrievalAugmenter::new(
        env.oracle.as_ref(),
        env.index.as_ref(),
        &env.catalog,
        settings.retrieval_k,
        chars,
    );

    let (selected, retrieval) = tokio::join!(
        selector.gather(function, &env.tree, settings.top_n),
        augmenter.augment(function)
    );

    let mut notes = selected.notes;
    notes.extend(retrieval.failure);

    let context = aggregate(&selected.facts, &retrieval.facts);
    for entry in context.needs_review() {
        notes.push(PipelineError::MetadataMissing(format!(
            "{} for {} flagged for review",
            entry.kind, entry.path
        )));
    }
    tracing::debug!(
        function = %function.path,
        "Context: {} entries with {} evidence text(s) ({} need review) from {} file(s) and {} snippet(s)",
        context.len(),
        context.evidence_count(),
        context.needs_review().len(),
        selected.candidates.len(),
        retrieval.results.len()
    );

    let synthesizer = TestSynthesizer::new(env.oracle.as_ref(), &env.catalog, chars);
    let validator = StaticValidator::new(env.checker.as_ref(), &env.catalog);
    let run = RepairLoop::new(&synthesizer, &validator, settings.policy, &env.cancel)
        .run(function, &context)
        .await;
    notes.extend(run.notes);

    let (status, artifact, report) = match run.outcome {
        RepairOutcome::Final { artifact, report } => (FunctionStatus::Final, Some(artifact), Some(report)),
        RepairOutcome::Failed {
            artifact,
            report,
            error,
        } => {
            notes.push(error);
            (FunctionStatus::Failed, Some(artifact), Some(report))
        }
        RepairOutcome::Cancelled { artifact, error } => {
            notes.push(error);
            (FunctionStatus::Cancelled, artifact, None)
        }
    };

    FunctionOutcome {
        function: function.clone(),
        status,
        artifact,
        report,
        notes,
        attempts: run.synthesis_calls,
        selected_files: selected
            .candidates
            .into_iter()
            .map(|c| c.rel_path)
            .collect(),
        retrieval_query: retrieval.query,
        retrieval_hits: retrieval.results.len(),
        output: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckerError;
    use crate::oracle::{BoundedOracle, OracleError};
    use crate::pipeline::fakes::{
        clean_report, decoder_hit, error_report, sample_env, sample_project, scenario_a_oracle,
        FixedIndex, ScriptedChecker, ScriptedOracle, SCENARIO_A_TEST,
    };
    use crate::pipeline::prompts::PromptKind;
    use serde_json::json;
    use std::time::Duration;

    // =========================================================================
    // Scenario tests
    // =========================================================================

    #[tokio::test]
    async fn test_scenario_a_cross_module_inverse() {
        let project = sample_project();
        let oracle = Arc::new(scenario_a_oracle());
        let checker = Arc::new(ScriptedChecker::new(vec![Ok(clean_report())]));
        let env = sample_env(
            &project,
            oracle.clone(),
            Arc::new(FixedIndex::new(vec![decoder_hit()])),
            checker,
            3,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Final);
        // The decoder's file is ranked above the unrelated utility module.
        assert_eq!(
            outcome.selected_files,
            vec!["pkg/codec/decoder.py".to_string(), "pkg/util.py".to_string()]
        );
        let artifact = outcome.artifact.unwrap();
        assert!(artifact
            .source
            .contains("from pkg.codec.decoder import decode"));
        assert!(outcome.notes.iter().all(|n| n.is_degradation()));

        // The synthesis prompt carried the verified import for the inverse.
        let generate = &oracle.requests_of(PromptKind::GenerateTest)[0];
        assert!(generate.prompt.contains("from pkg.codec.decoder import decode"));
    }

    #[tokio::test]
    async fn test_scenario_b_one_repair() {
        let project = sample_project();
        let checker = Arc::new(ScriptedChecker::new(vec![
            Ok(error_report("E0602")),
            Ok(clean_report()),
        ]));
        let env = sample_env(
            &project,
            Arc::new(scenario_a_oracle()),
            Arc::new(FixedIndex::new(vec![decoder_hit()])),
            checker.clone(),
            3,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Final);
        assert_eq!(outcome.artifact.unwrap().version, 1);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(checker.calls(), 2);
    }

    #[tokio::test]
    async fn test_scenario_c_no_retrieval_hits() {
        let project = sample_project();
        let oracle = Arc::new(scenario_a_oracle());
        let env = sample_env(
            &project,
            oracle.clone(),
            Arc::new(FixedIndex::new(vec![])),
            Arc::new(ScriptedChecker::new(vec![Ok(clean_report())])),
            3,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Final);
        assert_eq!(outcome.retrieval_hits, 0);
        assert!(!outcome
            .notes
            .iter()
            .any(|n| matches!(n, PipelineError::RetrievalFailed(_))));
        assert_eq!(oracle.calls(PromptKind::ExtractRetrievalFacts), 0);
        assert_eq!(outcome.report.unwrap().error_count(), 0);
    }

    #[tokio::test]
    async fn test_scenario_d_budget_exhausted() {
        let project = sample_project();
        let checker = Arc::new(ScriptedChecker::new(vec![Ok(error_report("E0602"))]));
        let env = sample_env(
            &project,
            Arc::new(scenario_a_oracle()),
            Arc::new(FixedIndex::new(vec![decoder_hit()])),
            checker.clone(),
            2,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Failed);
        assert_eq!(outcome.artifact.as_ref().unwrap().version, 2);
        assert_eq!(outcome.report.as_ref().unwrap().version, 2);
        assert_eq!(outcome.report.as_ref().unwrap().error_count(), 1);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(checker.calls(), 3);
        assert_eq!(
            outcome.reason(),
            Some(&PipelineError::BudgetExhausted { attempts: 3 })
        );
    }

    // =========================================================================
    // Degradation tests
    // =========================================================================

    #[tokio::test]
    async fn test_oracle_failures_before_synthesis_degrade() {
        let project = sample_project();
        // Only synthesis is scripted: selection and retrieval both fail.
        let oracle = Arc::new(ScriptedOracle::new().with(
            PromptKind::GenerateTest,
            json!({"test_code": "from pkg.codec.encoder import encode\n"}),
        ));
        let env = sample_env(
            &project,
            oracle,
            Arc::new(FixedIndex::failing()),
            Arc::new(ScriptedChecker::new(vec![Ok(clean_report())])),
            3,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Final);
        assert!(outcome
            .notes
            .iter()
            .any(|n| matches!(n, PipelineError::SelectionFailed(_))));
        assert!(outcome
            .notes
            .iter()
            .any(|n| matches!(n, PipelineError::RetrievalFailed(_))));
    }

    #[tokio::test]
    async fn test_selection_timeout_degrades_to_retrieval_only() {
        let project = sample_project();
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_error(
                    PromptKind::SelectFiles,
                    OracleError::Timeout(Duration::from_secs(30)),
                )
                .with(
                    PromptKind::RetrievalQuery,
                    json!({"retrieval_query": "decoding counterpart of encode"}),
                )
                .with(
                    PromptKind::ExtractRetrievalFacts,
                    json!({"relationships": [{
                        "description": "decode inverts encode",
                        "related_symbol_module_path": "pkg.codec.decoder.decode",
                        "kind": "inverse"
                    }]}),
                )
                .with(
                    PromptKind::GenerateTest,
                    json!({"test_code": SCENARIO_A_TEST}),
                ),
        );
        let env = sample_env(
            &project,
            oracle.clone(),
            Arc::new(FixedIndex::new(vec![decoder_hit()])),
            Arc::new(ScriptedChecker::new(vec![Ok(clean_report())])),
            3,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Final);
        assert!(outcome.degraded());
        assert!(outcome.selected_files.is_empty());
        assert!(outcome.notes.iter().any(
            |n| matches!(n, PipelineError::SelectionFailed(msg) if msg.contains("timed out after 30s"))
        ));
        assert_eq!(outcome.retrieval_hits, 1);
        assert_eq!(
            outcome.retrieval_query.as_deref(),
            Some("decoding counterpart of encode")
        );
        assert_eq!(oracle.calls(PromptKind::ExtractFileFacts), 0);
        // The retrieved inverse still reaches the synthesis prompt.
        let generate = &oracle.requests_of(PromptKind::GenerateTest)[0];
        assert!(generate.prompt.contains("from pkg.codec.decoder import decode"));
    }

    #[tokio::test]
    async fn test_single_oracle_permit_completes_pipeline() {
        let project = sample_project();
        let scripted = Arc::new(scenario_a_oracle());
        let env = sample_env(
            &project,
            Arc::new(BoundedOracle::new(scripted.clone(), 1)),
            Arc::new(FixedIndex::new(vec![decoder_hit()])),
            Arc::new(ScriptedChecker::new(vec![Ok(clean_report())])),
            3,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Final);
        assert_eq!(outcome.selected_files.len(), 2);
        assert_eq!(outcome.retrieval_hits, 1);
        assert_eq!(scripted.calls(PromptKind::GenerateTest), 1);
    }

    #[tokio::test]
    async fn test_checker_crash_every_time_fails() {
        let project = sample_project();
        let env = sample_env(
            &project,
            Arc::new(scenario_a_oracle()),
            Arc::new(FixedIndex::new(vec![])),
            Arc::new(ScriptedChecker::new(vec![Err(CheckerError::Crashed(
                "pylint not installed".into(),
            ))])),
            1,
        );

        let outcome = process_function(&project.encode(), &env).await;

        assert_eq!(outcome.status, FunctionStatus::Failed);
        assert!(outcome.report.unwrap().checker_crashed());
        assert_eq!(
            outcome
                .notes
                .iter()
                .filter(|n| matches!(n, PipelineError::CheckerCrashed { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let project = sample_project();
        let env = sample_env(
            &project,
            Arc::new(scenario_a_oracle()),
            Arc::new(FixedIndex::new(vec![])),
            Arc::new(ScriptedChecker::new(vec![Ok(clean_report())])),
            3,
        );
        env.cancel.cancel();

        let outcome = process_function(&project.encode(), &env).await;
        assert_eq!(outcome.status, FunctionStatus::Cancelled);
        assert!(outcome.artifact.is_none());
    }

    // =========================================================================
    // Determinism tests
    // =========================================================================

    #[tokio::test]
    async fn test_rerun_is_byte_identical() {
        let project = sample_project();
        let mut sources = Vec::new();
        for _ in 0..2 {
            let env = sample_env(
                &project,
                Arc::new(scenario_a_oracle()),
                Arc::new(FixedIndex::new(vec![decoder_hit()])),
                Arc::new(ScriptedChecker::new(vec![Ok(clean_report())])),
                3,
            );
            let outcome = process_function(&project.encode(), &env).await;
            sources.push(outcome.artifact.unwrap().source);
        }
        assert_eq!(sources[0], sources[1]);
    }

    #[tokio::test]
    async fn test_prompts_are_identical_across_runs() {
        let project = sample_project();
        let mut prompts = Vec::new();
        for _ in 0..2 {
            let oracle = Arc::new(scenario_a_oracle());
            let env = sample_env(
                &project,
                oracle.clone(),
                Arc::new(FixedIndex::new(vec![decoder_hit()])),
                Arc::new(ScriptedChecker::new(vec![Ok(clean_report())])),
                3,
            );
            process_function(&project.encode(), &env).await;
            prompts.push(oracle.requests_of(PromptKind::GenerateTest)[0].prompt.clone());
        }
        assert_eq!(prompts[0], prompts[1]);
    }

    #[test]
    fn test_settings_reject_zero_top_n() {
        let config = PipelineConfig {
            top_n: 0,
            ..Default::default()
        };
        assert!(PipelineSettings::from_config(&config).is_err());
        assert!(PipelineSettings::from_config(&PipelineConfig::default()).is_ok());
    }
}
