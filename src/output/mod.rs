//! Persisted run output: one test module per function plus a JSON run report.

use crate::pipeline::model::{ModulePathRef, ValidationReport};
use crate::pipeline::{FunctionOutcome, FunctionStatus};
use crate::runner::RunResults;
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "pbtgen-report.json";
const FAILED_DIR: &str = "failed";

/// Deterministic artifact file name for a function. The hash suffix keeps
/// names unique when two paths flatten to the same string.
pub fn artifact_file_name(path: &ModulePathRef) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("test_{}_{}.py", path.as_str().replace('.', "_"), &digest[..8])
}

pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the output directories and the package marker.
    pub fn prepare(&self) -> Result<()> {
        let failed = self.dir.join(FAILED_DIR);
        std::fs::create_dir_all(&failed)
            .with_context(|| format!("Failed to create output directory {:?}", failed))?;
        let init = self.dir.join("__init__.py");
        if !init.exists() {
            std::fs::write(&init, "").with_context(|| format!("Failed to write {:?}", init))?;
        }
        Ok(())
    }

    /// Write the artifact of a FINAL or FAILED outcome. Cancelled pipelines
    /// write nothing.
    pub fn write_outcome(&self, outcome: &FunctionOutcome) -> Result<Option<PathBuf>> {
        let Some(artifact) = &outcome.artifact else {
            return Ok(None);
        };
        let name = artifact_file_name(&outcome.function.path);
        let path = match outcome.status {
            FunctionStatus::Final => self.dir.join(name),
            FunctionStatus::Failed => self.dir.join(FAILED_DIR).join(name),
            FunctionStatus::Cancelled => return Ok(None),
        };

        std::fs::write(&path, &artifact.source)
            .with_context(|| format!("Failed to write artifact {:?}", path))?;

        if outcome.status == FunctionStatus::Failed {
            if let Some(report) = &outcome.report {
                let diagnostics = path.with_extension("diagnostics.txt");
                std::fs::write(&diagnostics, format!("{}\n", report.render()))
                    .with_context(|| format!("Failed to write diagnostics {:?}", diagnostics))?;
            }
        }

        tracing::debug!(function = %outcome.function.path, "Wrote {}", path.display());
        Ok(Some(path))
    }

    pub fn write_report(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(summary).context("Failed to serialize run report")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write report {:?}", path))?;
        Ok(path)
    }
}

#[derive(Debug, Serialize)]
pub struct FunctionSummary {
    pub function: String,
    pub file: String,
    pub status: FunctionStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub notes: Vec<String>,
    /// Selection or retrieval failed and the test was built from less context.
    pub degraded: bool,
    pub selected_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_query: Option<String>,
    pub retrieval_hits: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Kept for FAILED functions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<ValidationReport>,
}

impl From<&FunctionOutcome> for FunctionSummary {
    fn from(outcome: &FunctionOutcome) -> Self {
        Self {
            function: outcome.function.path.to_string(),
            file: outcome.function.file_display(),
            status: outcome.status,
            attempts: outcome.attempts,
            final_version: outcome.artifact.as_ref().map(|a| a.version),
            reason: outcome.reason().map(|r| r.to_string()),
            notes: outcome.notes.iter().map(|n| n.to_string()).collect(),
            degraded: outcome.degraded(),
            selected_files: outcome.selected_files.clone(),
            retrieval_query: outcome.retrieval_query.clone(),
            retrieval_hits: outcome.retrieval_hits,
            output: outcome.output.as_ref().map(|p| p.display().to_string()),
            last_report: match outcome.status {
                FunctionStatus::Failed => outcome.report.clone(),
                _ => None,
            },
        }
    }
}

/// Exit code for a run cut short by Ctrl-C (128 + SIGINT).
pub const INTERRUPTED_EXIT: i32 = 130;

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub generated_at: String,
    pub total: usize,
    pub final_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    /// Functions whose selection or retrieval stage failed.
    pub degraded_count: usize,
    /// `--functions` entries that matched nothing in the catalogue.
    pub skipped_targets: Vec<String>,
    /// Functions left undispatched by cancellation.
    pub not_dispatched: Vec<String>,
    pub functions: Vec<FunctionSummary>,
}

impl RunSummary {
    pub fn new(results: &RunResults, skipped: &[ModulePathRef]) -> Self {
        let count = |status| {
            results
                .outcomes
                .iter()
                .filter(|o| o.status == status)
                .count()
        };
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            total: results.outcomes.len() + results.not_dispatched.len(),
            final_count: count(FunctionStatus::Final),
            failed_count: count(FunctionStatus::Failed),
            cancelled_count: count(FunctionStatus::Cancelled),
            degraded_count: results.outcomes.iter().filter(|o| o.degraded()).count(),
            skipped_targets: skipped.iter().map(|p| p.to_string()).collect(),
            not_dispatched: results
                .not_dispatched
                .iter()
                .map(|f| f.path.to_string())
                .collect(),
            functions: results.outcomes.iter().map(FunctionSummary::from).collect(),
        }
    }

    /// Whether cancellation left any function without an outcome.
    pub fn interrupted(&self) -> bool {
        self.cancelled_count > 0 || !self.not_dispatched.is_empty()
    }

    /// 130 when the run was interrupted, whatever the strictness; 1 when
    /// strict and any function ended FAILED; else 0.
    pub fn exit_code(&self, strict: bool) -> i32 {
        if self.interrupted() {
            INTERRUPTED_EXIT
        } else if strict && self.failed_count > 0 {
            1
        } else {
            0
        }
    }

    /// Human-readable summary for stdout.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} function(s): {} FINAL, {} FAILED, {} cancelled, {} not dispatched\n",
            self.total,
            self.final_count,
            self.failed_count,
            self.cancelled_count,
            self.not_dispatched.len()
        );
        if self.degraded_count > 0 {
            out.push_str(&format!(
                "{} function(s) were generated from degraded context\n",
                self.degraded_count
            ));
        }
        for function in &self.functions {
            let status = function.status.to_string();
            match &function.reason {
                Some(reason) => out.push_str(&format!(
                    "  {:<9} {} ({})\n",
                    status, function.function, reason
                )),
                None => out.push_str(&format!("  {:<9} {}\n", status, function.function)),
            }
        }
        for target in &self.skipped_targets {
            out.push_str(&format!("  skipped   {} (no matching function)\n", target));
        }
        out
    }
}
