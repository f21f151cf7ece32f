//! Static validation and the bounded repair loop.
//!
//! ```text
//! DRAFT(v) -> VALIDATING -> ACCEPTED -> FINAL
//!                        -> NEEDS_REPAIR -> DRAFT(v+1)   while v < max_attempts
//!                        -> FAILED                       once v == max_attempts
//! ```
//!
//! At most `max_attempts + 1` synthesis calls are made per function.

use super::aggregator::AggregatedContext;
use super::error::PipelineError;
use super::model::{
    ArtifactState, Diagnostic, FunctionInfo, Severity, TestArtifact, ValidationReport,
    CHECKER_CRASHED_CODE, SYNTHESIS_FAILED_CODE,
};
use super::synthesizer::TestSynthesizer;
use crate::catalog::FunctionCatalog;
use crate::checker::{check_imports, CheckerError, StaticChecker, IMPORT_CHECK_SOURCE};
use crate::config::PipelineConfig;
use crate::runner::CancelFlag;

/// When a report is good enough, and how many repairs to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    pub max_attempts: u32,
    pub tolerate_warnings: bool,
    pub accept_on_checker_crash: bool,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RepairPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            tolerate_warnings: config.tolerate_warnings,
            accept_on_checker_crash: config.accept_on_checker_crash,
        }
    }
}

impl RepairPolicy {
    pub fn accepts(&self, report: &ValidationReport) -> bool {
        if report.error_count() > 0 || report.synthesis_failed() {
            return false;
        }
        if report.checker_crashed() && !self.accept_on_checker_crash {
            return false;
        }
        !report.has_warnings() || self.tolerate_warnings
    }
}

/// Runs the import check and the external checker on one artifact.
pub struct StaticValidator<'a> {
    checker: &'a dyn StaticChecker,
    catalog: &'a FunctionCatalog,
}

impl<'a> StaticValidator<'a> {
    pub fn new(checker: &'a dyn StaticChecker, catalog: &'a FunctionCatalog) -> Self {
        Self { checker, catalog }
    }

    /// Never fails: a crashed checker becomes a warning diagnostic of its own.
    pub async fn validate(&self, artifact: &TestArtifact) -> ValidationReport {
        let mut diagnostics = check_imports(&artifact.source, self.catalog);

        let raw_output = match self.checker.check(&artifact.source).await {
            Ok(report) => {
                diagnostics.extend(report.diagnostics);
                report.raw_output
            }
            Err(CheckerError::Crashed(reason)) => {
                tracing::warn!(
                    function = %artifact.target.path,
                    "Static checker crashed on version {}: {}",
                    artifact.version,
                    reason
                );
                diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    CHECKER_CRASHED_CODE,
                    reason,
                    IMPORT_CHECK_SOURCE,
                ));
                None
            }
        };

        ValidationReport {
            version: artifact.version,
            diagnostics,
            raw_output,
        }
    }
}

/// How a function's repair loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    Final {
        artifact: TestArtifact,
        report: ValidationReport,
    },
    Failed {
        artifact: TestArtifact,
        report: ValidationReport,
        error: PipelineError,
    },
    Cancelled {
        artifact: Option<TestArtifact>,
        error: PipelineError,
    },
}

/// The outcome plus everything observed on the way there.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairRun {
    pub outcome: RepairOutcome,
    /// Every state visited, with the artifact version at that point.
    pub trace: Vec<(u32, ArtifactState)>,
    pub notes: Vec<PipelineError>,
    pub synthesis_calls: u32,
}

pub struct RepairLoop<'a> {
    synthesizer: &'a TestSynthesizer<'a>,
    validator: &'a StaticValidator<'a>,
    policy: RepairPolicy,
    cancel: &'a CancelFlag,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        synthesizer: &'a TestSynthesizer<'a>,
        validator: &'a StaticValidator<'a>,
        policy: RepairPolicy,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            synthesizer,
            validator,
            policy,
            cancel,
        }
    }

    pub async fn run(&self, function: &FunctionInfo, context: &AggregatedContext) -> RepairRun {
        let mut trace = Vec::new();
        let mut notes = Vec::new();
        let mut synthesis_calls = 0;
        let mut prior: Option<(TestArtifact, ValidationReport)> = None;

        loop {
            if self.cancel.is_cancelled() {
                let latest = prior.map(|(artifact, _)| artifact);
                return self.cancelled(latest, "synthesis", trace, notes, synthesis_calls);
            }

            let attempt = self
                .synthesizer
                .synthesize(context, function, prior.as_ref().map(|(a, r)| (a, r)))
                .await;
            synthesis_calls += 1;

            let (artifact, report, drafted) = match attempt {
                Ok(artifact) => {
                    trace.push((artifact.version, ArtifactState::Draft));
                    if self.cancel.is_cancelled() {
                        return self.cancelled(Some(artifact), "validation", trace, notes, synthesis_calls);
                    }
                    trace.push((artifact.version, ArtifactState::Validating));
                    let report = self.validator.validate(&artifact).await;
                    if self.cancel.is_cancelled() {
                        return self.cancelled(Some(artifact), "acceptance", trace, notes, synthesis_calls);
                    }
                    (artifact, report, true)
                }
                Err(error) => {
                    let (artifact, report) = failed_synthesis(function, prior.as_ref(), &error);
                    tracing::warn!(function = %function.path, "{}", error);
                    notes.push(error);
                    (artifact, report, false)
                }
            };
            let version = artifact.version;

            if drafted && self.policy.accepts(&report) {
                trace.push((version, ArtifactState::Accepted));
                trace.push((version, ArtifactState::Final));
                tracing::info!(function = %function.path, "FINAL at version {}", version);
                return RepairRun {
                    outcome: RepairOutcome::Final { artifact, report },
                    trace,
                    notes,
                    synthesis_calls,
                };
            }

            if report.checker_crashed() {
                notes.push(PipelineError::CheckerCrashed {
                    version,
                    reason: crash_reason(&report),
                });
            } else if drafted {
                notes.push(PipelineError::ValidationError {
                    version,
                    errors: report.error_count(),
                });
            }

            if version >= self.policy.max_attempts {
                trace.push((version, ArtifactState::Failed));
                let error = PipelineError::BudgetExhausted {
                    attempts: version + 1,
                };
                tracing::warn!(
                    function = %function.path,
                    "FAILED at version {}: {} error(s) remain",
                    version,
                    report.error_count()
                );
                return RepairRun {
                    outcome: RepairOutcome::Failed {
                        artifact,
                        report,
                        error,
                    },
                    trace,
                    notes,
                    synthesis_calls,
                };
            }

            trace.push((version, ArtifactState::NeedsRepair));
            tracing::info!(
                function = %function.path,
                "Repair attempt {} of {} ({} error(s) at version {})",
                version + 1,
                self.policy.max_attempts,
                report.error_count(),
                version
            );
            prior = Some((artifact, report));
        }
    }

    fn cancelled(
        &self,
        artifact: Option<TestArtifact>,
        stage: &str,
        trace: Vec<(u32, ArtifactState)>,
        notes: Vec<PipelineError>,
        synthesis_calls: u32,
    ) -> RepairRun {
        tracing::info!("Cancelled before {}", stage);
        RepairRun {
            outcome: RepairOutcome::Cancelled {
                artifact,
                error: PipelineError::Cancelled {
                    stage: stage.to_string(),
                },
            },
            trace,
            notes,
            synthesis_calls,
        }
    }
}

/// A synthesis failure still consumes a version: carry the previous source
/// forward with a report that says what went wrong.
fn failed_synthesis(
    function: &FunctionInfo,
    prior: Option<&(TestArtifact, ValidationReport)>,
    error: &PipelineError,
) -> (TestArtifact, ValidationReport) {
    let version = prior.map_or(0, |(artifact, _)| artifact.version + 1);
    let source = prior.map(|(artifact, _)| artifact.source.clone()).unwrap_or_default();

    let mut diagnostics = vec![Diagnostic::new(
        Severity::Error,
        SYNTHESIS_FAILED_CODE,
        error.to_string(),
        IMPORT_CHECK_SOURCE,
    )];
    if let Some((_, report)) = prior {
        diagnostics.extend(
            report
                .diagnostics
                .iter()
                .filter(|d| d.code != SYNTHESIS_FAILED_CODE)
                .cloned(),
        );
    }

    (
        TestArtifact {
            target: function.clone(),
            source,
            version,
        },
        ValidationReport {
            version,
            diagnostics,
            raw_output: None,
        },
    )
}

fn crash_reason(report: &ValidationReport) -> String {
    report
        .diagnostics
        .iter()
        .find(|d| d.code == CHECKER_CRASHED_CODE)
        .map(|d| d.message.clone())
        .unwrap_or_default()
}
