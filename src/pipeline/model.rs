//! Core records passed between pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Dotted path locating a module, class, or callable inside the target project
/// (e.g. `pkg.sub.module.Class.method`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModulePathRef(String);

impl ModulePathRef {
    /// Parse a dotted path. Surrounding whitespace and backticks are ignored;
    /// every segment must be a valid identifier.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_matches('`').trim();
        if trimmed.is_empty() || !trimmed.split('.').all(is_identifier) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment (the symbol name).
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// First segment (the top-level package).
    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn parent(&self) -> Option<ModulePathRef> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// Append one identifier segment.
    pub fn child(&self, segment: &str) -> Option<ModulePathRef> {
        is_identifier(segment).then(|| Self(format!("{}.{}", self.0, segment)))
    }

    /// Whether `prefix` names this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &ModulePathRef) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0[prefix.0.len()..].starts_with('.'))
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl fmt::Display for ModulePathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModulePathRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid module path: {:?}", value))
    }
}

impl From<ModulePathRef> for String {
    fn from(value: ModulePathRef) -> Self {
        value.0
    }
}

/// One catalogued callable. Immutable once the catalogue is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub path: ModulePathRef,
    /// Source file, relative to the project root.
    pub file: PathBuf,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub source: String,
    /// Defined inside a class body.
    pub in_class: bool,
}

impl FunctionInfo {
    pub fn file_display(&self) -> String {
        self.file.to_string_lossy().replace('\\', "/")
    }
}

/// A file nominated by the relevance selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFile {
    /// Project-relative path, `/`-separated.
    pub rel_path: String,
    /// The oracle's guess at the file's module path.
    pub module_path: Option<ModulePathRef>,
    /// 1-based position in the oracle's ranking.
    pub rank: usize,
    pub rationale: String,
    pub symbols: Vec<NotableSymbol>,
}

/// A symbol the selector called out inside a candidate file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotableSymbol {
    pub name: String,
    pub kind: String,
    pub path: super::facts::SymbolPath,
    pub role: String,
}

/// A scored snippet returned by the semantic index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub snippet: String,
    pub module_path: Option<ModulePathRef>,
    pub file: Option<String>,
    pub score: f32,
}

/// Generated test source for one function at one repair version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestArtifact {
    pub target: FunctionInfo,
    pub source: String,
    /// 0 for the first draft, incremented on every repair attempt.
    pub version: u32,
}

/// Lifecycle of a test artifact inside the repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Draft,
    Validating,
    Accepted,
    NeedsRepair,
    Final,
    Failed,
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Validating => write!(f, "validating"),
            Self::Accepted => write!(f, "accepted"),
            Self::NeedsRepair => write!(f, "needs_repair"),
            Self::Final => write!(f, "final"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Diagnostic severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Checker-specific code (`E0401`, `unresolved-import`, ...).
    pub code: String,
    pub message: String,
    pub location: Option<Location>,
    /// Which tool produced this diagnostic.
    pub source: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: &str, message: impl Into<String>, source: &str) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message: message.into(),
            location: None,
            source: source.to_string(),
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.location = Some(Location { line, column });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{}:{}: {} [{}] {}",
                loc.line, loc.column, self.severity, self.code, self.message
            ),
            None => write!(f, "{} [{}] {}", self.severity, self.code, self.message),
        }
    }
}

/// Code used for the diagnostic recorded when the external checker crashes.
pub const CHECKER_CRASHED_CODE: &str = "checker-crashed";

/// Code used for the diagnostic recorded when synthesis produced nothing usable.
pub const SYNTHESIS_FAILED_CODE: &str = "synthesis-failed";

/// Ordered diagnostics for one artifact version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub version: u32,
    pub diagnostics: Vec<Diagnostic>,
    /// Raw checker output, truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl ValidationReport {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            version: 0,
            diagnostics,
            raw_output: None,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Warnings reported by the checker, not counting a crash marker.
    pub fn has_warnings(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.code != CHECKER_CRASHED_CODE)
    }

    pub fn checker_crashed(&self) -> bool {
        self.diagnostics.iter().any(|d| d.code == CHECKER_CRASHED_CODE)
    }

    pub fn synthesis_failed(&self) -> bool {
        self.diagnostics.iter().any(|d| d.code == SYNTHESIS_FAILED_CODE)
    }

    /// Render diagnostics one per line, for prompts and logs.
    pub fn render(&self) -> String {
        if self.diagnostics.is_empty() {
            return "(no diagnostics)".to_string();
        }
        self.diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // ModulePathRef tests
    // =========================================================================

    #[test]
    fn test_parse_valid_paths() {
        let path = ModulePathRef::parse("pkg.sub.module.Class.method").unwrap();
        assert_eq!(path.as_str(), "pkg.sub.module.Class.method");
        assert_eq!(path.name(), "method");
        assert_eq!(path.root(), "pkg");
        assert_eq!(path.segments().count(), 5);
    }

    #[test]
    fn test_parse_strips_backticks_and_whitespace() {
        let path = ModulePathRef::parse("  `pkg.codec.decode` ").unwrap();
        assert_eq!(path.as_str(), "pkg.codec.decode");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ModulePathRef::parse("").is_none());
        assert!(ModulePathRef::parse("pkg..mod").is_none());
        assert!(ModulePathRef::parse("pkg/mod.py").is_none());
        assert!(ModulePathRef::parse("1pkg.mod").is_none());
        assert!(ModulePathRef::parse("<unknown>").is_none());
        assert!(ModulePathRef::parse(".relative").is_none());
    }

    #[test]
    fn test_parent_and_child() {
        let path = ModulePathRef::parse("pkg.mod.fn").unwrap();
        assert_eq!(path.parent().unwrap().as_str(), "pkg.mod");
        assert!(ModulePathRef::parse("pkg").unwrap().parent().is_none());

        let child = path.parent().unwrap().child("other").unwrap();
        assert_eq!(child.as_str(), "pkg.mod.other");
        assert!(path.child("not valid").is_none());
    }

    #[test]
    fn test_starts_with_respects_segments() {
        let path = ModulePathRef::parse("pkg.codec.decode").unwrap();
        assert!(path.starts_with(&ModulePathRef::parse("pkg.codec").unwrap()));
        assert!(path.starts_with(&path));
        assert!(!path.starts_with(&ModulePathRef::parse("pkg.co").unwrap()));
    }

    #[test]
    fn test_serde_rejects_invalid_path() {
        let ok: ModulePathRef = serde_json::from_str("\"pkg.mod\"").unwrap();
        assert_eq!(ok.as_str(), "pkg.mod");
        assert!(serde_json::from_str::<ModulePathRef>("\"pkg mod\"").is_err());
    }

    // =========================================================================
    // ValidationReport tests
    // =========================================================================

    #[test]
    fn test_report_counts_errors_only() {
        let report = ValidationReport::new(vec![
            Diagnostic::new(Severity::Error, "E0602", "undefined name", "pylint"),
            Diagnostic::new(Severity::Warning, "W0611", "unused import", "pylint"),
            Diagnostic::new(Severity::Info, "C0114", "missing docstring", "pylint"),
        ]);
        assert_eq!(report.error_count(), 1);
        assert!(report.has_warnings());
        assert!(!report.checker_crashed());

        let crashed = ValidationReport::new(vec![Diagnostic::new(
            Severity::Warning,
            CHECKER_CRASHED_CODE,
            "pylint exited with signal 9",
            "pylint",
        )]);
        assert!(crashed.checker_crashed());
        assert!(!crashed.has_warnings());
    }

    #[test]
    fn test_report_render() {
        let report = ValidationReport::new(vec![Diagnostic::new(
            Severity::Error,
            "E0401",
            "Unable to import 'pkg.missing'",
            "pylint",
        )
        .at(3, 0)]);
        assert_eq!(
            report.render(),
            "3:0: error [E0401] Unable to import 'pkg.missing'"
        );
        assert_eq!(ValidationReport::default().render(), "(no diagnostics)");
    }

    #[test]
    fn test_artifact_state_display() {
        assert_eq!(ArtifactState::NeedsRepair.to_string(), "needs_repair");
        assert_eq!(ArtifactState::Final.to_string(), "final");
    }
}
