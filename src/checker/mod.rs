//! Static checking of generated test source.
//!
//! [`CommandChecker`] runs an external linter over a temporary copy of the
//! draft. [`check_imports`] is a built-in pass that rejects imports of project
//! symbols that do not exist.

mod command;
mod imports;

pub use command::CommandChecker;
pub use imports::{check_imports, IMPORT_CHECK_SOURCE};

use crate::pipeline::model::ValidationReport;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckerError {
    #[error("static checker crashed: {0}")]
    Crashed(String),
}

#[async_trait]
pub trait StaticChecker: Send + Sync {
    /// Check one draft. The report's version is left for the caller to stamp.
    async fn check(&self, source: &str) -> Result<ValidationReport, CheckerError>;
}
