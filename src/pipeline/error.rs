use serde::Serialize;
use thiserror::Error;

/// Per-function pipeline conditions. Stage failures degrade the context; only
/// `BudgetExhausted` and `Cancelled` end a function's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("metadata missing: {0}")]
    MetadataMissing(String),

    #[error("file selection failed: {0}")]
    SelectionFailed(String),

    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("synthesis failed at version {version}: {reason}")]
    SynthesisFailed { version: u32, reason: String },

    #[error("checker reported {errors} error(s) at version {version}")]
    ValidationError { version: u32, errors: usize },

    #[error("static checker crashed at version {version}: {reason}")]
    CheckerCrashed { version: u32, reason: String },

    #[error("repair budget exhausted after {attempts} synthesis attempt(s)")]
    BudgetExhausted { attempts: u32 },

    #[error("cancelled before {stage}")]
    Cancelled { stage: String },
}

impl PipelineError {
    /// Stage failures that reduce context but let the pipeline continue.
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            Self::MetadataMissing(_) | Self::SelectionFailed(_) | Self::RetrievalFailed(_)
        )
    }
}
