//! The typed fact record carried through every stage.
//!
//! Every fact names the symbol it describes through a [`SymbolPath`]. A path is
//! either resolved against the catalogue, an unresolved guess kept verbatim, or
//! missing entirely. Only resolved paths may be rendered as import targets.

use super::model::ModulePathRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a fact's symbol lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "path", rename_all = "snake_case")]
pub enum SymbolPath {
    /// Resolves against the catalogue or the file tree.
    Resolved(ModulePathRef),
    /// The oracle supplied a path that does not resolve.
    Unresolved(String),
    /// No path was supplied at all.
    Missing,
}

impl SymbolPath {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&ModulePathRef> {
        match self {
            Self::Resolved(path) => Some(path),
            _ => None,
        }
    }

    /// Last dotted segment of the path, when there is one.
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Self::Resolved(path) => Some(path.name()),
            Self::Unresolved(raw) => raw.rsplit('.').next().filter(|s| !s.is_empty()),
            Self::Missing => None,
        }
    }
}

impl fmt::Display for SymbolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(path) => write!(f, "{}", path),
            Self::Unresolved(raw) => write!(f, "{} (unresolved)", raw),
            Self::Missing => write!(f, "path unknown"),
        }
    }
}

/// What a fact says about its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Description,
    Symbol,
    Relationship,
    Invariant,
    Precondition,
    Postcondition,
    Example,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Symbol => "symbol",
            Self::Relationship => "relationship",
            Self::Invariant => "invariant",
            Self::Precondition => "precondition",
            Self::Postcondition => "postcondition",
            Self::Example => "example",
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage produced a fact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Provenance {
    /// Named by the relevance selector for one candidate file.
    Candidate { file: String, rank: usize },
    /// Extracted from the contents of the Top-N candidate files.
    FileExtraction,
    /// Extracted from semantic index hits.
    Retrieval,
}

impl Provenance {
    fn base_confidence(&self) -> f32 {
        match self {
            Self::Candidate { .. } => 0.8,
            Self::FileExtraction => 0.7,
            Self::Retrieval => 0.6,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Candidate { file, rank } => write!(f, "selector #{} {}", rank, file),
            Self::FileExtraction => write!(f, "file extraction"),
            Self::Retrieval => write!(f, "retrieval"),
        }
    }
}

/// One piece of evidence about one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub kind: FactKind,
    pub content: String,
    pub path: SymbolPath,
    pub provenance: Provenance,
    /// In `0.0..=1.0`.
    pub confidence: f32,
}

impl Fact {
    /// Build a fact with the provenance's default confidence, halved when the
    /// path does not resolve.
    pub fn new(
        kind: FactKind,
        content: impl Into<String>,
        path: SymbolPath,
        provenance: Provenance,
    ) -> Self {
        let base = provenance.base_confidence();
        let confidence = if path.is_resolved() { base } else { base / 2.0 };
        Self {
            kind,
            content: content.into(),
            path,
            provenance,
            confidence,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> ModulePathRef {
        ModulePathRef::parse(raw).unwrap()
    }

    #[test]
    fn test_symbol_name() {
        assert_eq!(
            SymbolPath::Resolved(path("pkg.codec.decode")).symbol_name(),
            Some("decode")
        );
        assert_eq!(
            SymbolPath::Unresolved("codec.decode".into()).symbol_name(),
            Some("decode")
        );
        assert_eq!(SymbolPath::Missing.symbol_name(), None);
    }

    #[test]
    fn test_display_marks_gaps() {
        assert_eq!(SymbolPath::Missing.to_string(), "path unknown");
        assert_eq!(
            SymbolPath::Unresolved("codec.decode".into()).to_string(),
            "codec.decode (unresolved)"
        );
    }

    #[test]
    fn test_unresolved_facts_get_lower_confidence() {
        let resolved = Fact::new(
            FactKind::Invariant,
            "round trips",
            SymbolPath::Resolved(path("pkg.codec.encode")),
            Provenance::FileExtraction,
        );
        let unresolved = Fact::new(
            FactKind::Invariant,
            "round trips",
            SymbolPath::Unresolved("codec.encode".into()),
            Provenance::FileExtraction,
        );
        assert!(resolved.confidence > unresolved.confidence);
    }

    #[test]
    fn test_with_confidence_clamps() {
        let fact = Fact::new(
            FactKind::Example,
            "x",
            SymbolPath::Missing,
            Provenance::Retrieval,
        );
        assert_eq!(fact.clone().with_confidence(3.0).confidence, 1.0);
        assert_eq!(fact.clone().with_confidence(-1.0).confidence, 0.0);
        assert_eq!(fact.with_confidence(f32::NAN).confidence, 0.0);
    }

    #[test]
    fn test_symbol_path_serializes_with_status() {
        let json = serde_json::to_value(SymbolPath::Resolved(path("pkg.mod"))).unwrap();
        assert_eq!(json["status"], "resolved");
        assert_eq!(json["path"], "pkg.mod");
        let json = serde_json::to_value(SymbolPath::Missing).unwrap();
        assert_eq!(json["status"], "missing");
    }
}
