//! Test synthesis: context bundle in, draft test module out.
//!
//! The synthesizer only packages oracle output. It strips Markdown fences and
//! gathers top-level imports into one sorted block; it never judges the code.

use super::aggregator::AggregatedContext;
use super::error::PipelineError;
use super::model::{FunctionInfo, TestArtifact, ValidationReport};
use super::prompts::{self, TestCodeResponse};
use crate::catalog::FunctionCatalog;
use crate::oracle::{ask, LanguageOracle};
use std::collections::BTreeSet;

pub struct TestSynthesizer<'a> {
    oracle: &'a dyn LanguageOracle,
    catalog: &'a FunctionCatalog,
    max_chars: usize,
}

impl<'a> TestSynthesizer<'a> {
    pub fn new(oracle: &'a dyn LanguageOracle, catalog: &'a FunctionCatalog, max_chars: usize) -> Self {
        Self {
            oracle,
            catalog,
            max_chars,
        }
    }

    /// Import lines for the target and every resolved symbol in the context.
    pub fn import_hints(&self, function: &FunctionInfo, context: &AggregatedContext) -> Vec<String> {
        std::iter::once(&function.path)
            .chain(context.resolved_paths())
            .filter_map(|path| self.catalog.import_line(path))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Draft version 0, or repair `prior` into `prior.version + 1`.
    pub async fn synthesize(
        &self,
        context: &AggregatedContext,
        function: &FunctionInfo,
        prior: Option<(&TestArtifact, &ValidationReport)>,
    ) -> Result<TestArtifact, PipelineError> {
        let version = prior.map_or(0, |(artifact, _)| artifact.version + 1);
        let imports = self.import_hints(function, context);

        let request = match prior {
            // Nothing usable to repair yet; draft again under the next version.
            Some((artifact, _)) if artifact.source.trim().is_empty() => {
                prompts::generate_test(function, context, &imports, self.max_chars)
            }
            Some((artifact, report)) => {
                prompts::repair_test(function, context, &imports, artifact, report, self.max_chars)
            }
            None => prompts::generate_test(function, context, &imports, self.max_chars),
        };

        let response: TestCodeResponse = ask(self.oracle, &request)
            .await
            .map_err(|e| PipelineError::SynthesisFailed {
                version,
                reason: e.to_string(),
            })?;

        let source = extract_code(&response.test_code).ok_or_else(|| PipelineError::SynthesisFailed {
            version,
            reason: "oracle returned no test code".to_string(),
        })?;

        tracing::debug!(
            function = %function.path,
            "Synthesized version {} ({} lines)",
            version,
            source.lines().count()
        );

        Ok(TestArtifact {
            target: function.clone(),
            source: normalize_imports(&source),
            version,
        })
    }
}

/// Pull Python source out of a response that may be wrapped in Markdown fences.
pub fn extract_code(response: &str) -> Option<String> {
    let trimmed = response.trim();
    let code = if let Some(start) = trimmed.find("```python") {
        fenced_body(&trimmed[start + "```python".len()..])
    } else if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip a language tag on the fence line.
        let body = after.split_once('\n').map_or(after, |(_, rest)| rest);
        fenced_body(body)
    } else {
        trimmed
    };

    let code = code.trim_matches('\n').trim_end();
    if code.trim().is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

fn fenced_body(text: &str) -> &str {
    match text.find("```") {
        Some(end) => &text[..end],
        None => text,
    }
}

/// Move single-line top-level imports into one deduplicated, sorted block at
/// the top of the module, `__future__` imports first. The rest is kept as is.
pub fn normalize_imports(source: &str) -> String {
    let mut future = BTreeSet::new();
    let mut imports = BTreeSet::new();
    let mut body = Vec::new();

    for line in source.lines() {
        let statement = line.trim_end();
        if is_simple_import(statement) {
            if statement.starts_with("from __future__ ") {
                future.insert(statement.to_string());
            } else {
                imports.insert(statement.to_string());
            }
        } else {
            body.push(statement);
        }
    }

    while body.first().is_some_and(|l| l.is_empty()) {
        body.remove(0);
    }
    while body.last().is_some_and(|l| l.is_empty()) {
        body.pop();
    }

    let header: Vec<String> = future.into_iter().chain(imports).collect();
    let mut out = String::new();
    if !header.is_empty() {
        out.push_str(&header.join("\n"));
        out.push('\n');
        if !body.is_empty() {
            out.push_str("\n\n");
        }
    }
    if !body.is_empty() {
        out.push_str(&body.join("\n"));
        out.push('\n');
    }
    out
}

/// A top-level `import x` / `from x import y` that fits on one line.
fn is_simple_import(line: &str) -> bool {
    let top_level = !line.starts_with(char::is_whitespace);
    let single_line = !line.ends_with('\\') && !line.contains('(') && !line.contains('#');
    top_level
        && single_line
        && (line.starts_with("import ") || (line.starts_with("from ") && line.contains(" import ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::aggregator::aggregate;
    use crate::pipeline::facts::{Fact, FactKind, Provenance, SymbolPath};
    use crate::pipeline::fakes::{sample_project, ScriptedOracle};
    use crate::pipeline::model::{Diagnostic, Severity};
    use crate::pipeline::prompts::PromptKind;
    use serde_json::json;

    // =========================================================================
    // extract_code tests
    // =========================================================================

    #[test]
    fn test_extract_python_fence() {
        let raw = "Here you go:\n```python\nimport x\n\ndef test_a():\n    pass\n```\nDone.";
        assert_eq!(
            extract_code(raw).unwrap(),
            "import x\n\ndef test_a():\n    pass"
        );
    }

    #[test]
    fn test_extract_generic_fence() {
        let raw = "```py\nimport x\n```";
        assert_eq!(extract_code(raw).unwrap(), "import x");
        assert_eq!(extract_code("```\nimport y\n```").unwrap(), "import y");
    }

    #[test]
    fn test_extract_plain_and_empty() {
        assert_eq!(extract_code("  import x\n").unwrap(), "import x");
        assert!(extract_code("   ").is_none());
        assert!(extract_code("```python\n\n```").is_none());
    }

    // =========================================================================
    // normalize_imports tests
    // =========================================================================

    #[test]
    fn test_normalize_imports_dedupes_and_sorts() {
        let source = "\
from pkg.codec.encoder import encode
import hypothesis

from pkg.codec.decoder import decode
from __future__ import annotations
from pkg.codec.encoder import encode

def test_round_trip():
    import json
    assert True
";
        assert_eq!(
            normalize_imports(source),
            "\
from __future__ import annotations
from pkg.codec.decoder import decode
from pkg.codec.encoder import encode
import hypothesis


def test_round_trip():
    import json
    assert True
"
        );
    }

    #[test]
    fn test_normalize_keeps_multiline_imports_in_body() {
        let source = "from a import (\n    b,\n)\nimport c\n";
        assert_eq!(normalize_imports(source), "import c\n\n\nfrom a import (\n    b,\n)\n");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let source = "import b\nimport a\n\nx = 1\n";
        let once = normalize_imports(source);
        assert_eq!(normalize_imports(&once), once);
    }

    // =========================================================================
    // synthesize tests
    // =========================================================================

    #[tokio::test]
    async fn test_first_draft_is_version_zero() {
        let project = sample_project();
        let oracle = ScriptedOracle::new().with(
            PromptKind::GenerateTest,
            json!({"test_code": "```python\nfrom pkg.codec.encoder import encode\n\ndef test_x():\n    assert encode([]) == b''\n```"}),
        );
        let synthesizer = TestSynthesizer::new(&oracle, &project.catalog, 4000);
        let artifact = synthesizer
            .synthesize(&aggregate(&[], &[]), &project.encode(), None)
            .await
            .unwrap();

        assert_eq!(artifact.version, 0);
        assert!(artifact.source.starts_with("from pkg.codec.encoder import encode\n"));
        assert_eq!(oracle.calls(PromptKind::GenerateTest), 1);
    }

    #[tokio::test]
    async fn test_repair_includes_prior_diagnostics() {
        let project = sample_project();
        let oracle = ScriptedOracle::new().with(
            PromptKind::RepairTest,
            json!({"test_code": "import pkg\n"}),
        );
        let synthesizer = TestSynthesizer::new(&oracle, &project.catalog, 4000);
        let prior = TestArtifact {
            target: project.encode(),
            source: "from pkg.codec import decode\n".to_string(),
            version: 1,
        };
        let report = ValidationReport::new(vec![Diagnostic::new(
            Severity::Error,
            "unresolved-import",
            "`decode` is not defined in `pkg.codec`",
            "pbtgen",
        )]);

        let artifact = synthesizer
            .synthesize(&aggregate(&[], &[]), &project.encode(), Some((&prior, &report)))
            .await
            .unwrap();

        assert_eq!(artifact.version, 2);
        let request = &oracle.requests_of(PromptKind::RepairTest)[0];
        assert!(request.prompt.contains("`decode` is not defined in `pkg.codec`"));
        assert!(request.prompt.contains("from pkg.codec import decode"));
    }

    #[tokio::test]
    async fn test_blank_output_is_synthesis_failure() {
        let project = sample_project();
        let oracle = ScriptedOracle::new().with(PromptKind::GenerateTest, json!({"test_code": "  "}));
        let synthesizer = TestSynthesizer::new(&oracle, &project.catalog, 4000);
        let err = synthesizer
            .synthesize(&aggregate(&[], &[]), &project.encode(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SynthesisFailed { version: 0, .. }));
    }

    #[test]
    fn test_import_hints_cover_resolved_context() {
        let project = sample_project();
        let oracle = ScriptedOracle::new();
        let synthesizer = TestSynthesizer::new(&oracle, &project.catalog, 4000);
        let facts = vec![
            Fact::new(
                FactKind::Relationship,
                "inverse",
                SymbolPath::Resolved(project.decode().path),
                Provenance::Retrieval,
            ),
            Fact::new(
                FactKind::Relationship,
                "guess",
                SymbolPath::Unresolved("codec.thing".into()),
                Provenance::Retrieval,
            ),
        ];
        let hints = synthesizer.import_hints(&project.encode(), &aggregate(&facts, &[]));
        assert_eq!(
            hints,
            vec![
                "from pkg.codec.decoder import decode".to_string(),
                "from pkg.codec.encoder import encode".to_string(),
            ]
        );
    }
}
