//! Prompt kinds.
//!
//! Every oracle call is one [`PromptKind`] built by a pure function from its
//! structured input into an [`OracleRequest`]: the prompt text plus the JSON
//! schema the answer must follow. Response shapes live next to their builders.

use super::aggregator::AggregatedContext;
use super::model::{CandidateFile, FunctionInfo, RetrievalResult, TestArtifact, ValidationReport};
use crate::oracle::OracleRequest;
use crate::project::TreeDescription;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Restated in every prompt.
const METADATA_RULE: &str = "Refer to every symbol by its FULL dotted module path as it would be imported \
(for example `pkg.codec.decoder.decode` or `pkg.codec.decoder.Decoder.decode`). \
Never abbreviate a path and never invent one: if you do not know a symbol's path, leave it empty.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    SelectFiles,
    ExtractFileFacts,
    RetrievalQuery,
    ExtractRetrievalFacts,
    GenerateTest,
    RepairTest,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectFiles => "select_files",
            Self::ExtractFileFacts => "extract_file_facts",
            Self::RetrievalQuery => "retrieval_query",
            Self::ExtractRetrievalFacts => "extract_retrieval_facts",
            Self::GenerateTest => "generate_test",
            Self::RepairTest => "repair_test",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Response shapes
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectFilesResponse {
    #[serde(default)]
    pub selected_files: Vec<SelectedFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectedFile {
    pub rel_path: String,
    #[serde(default)]
    pub module_path: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notable_symbols: Vec<RawSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSymbol {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub module_path: Option<String>,
    #[serde(default)]
    pub role_for_pbt: String,
}

/// Signals extracted for property-based testing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactsResponse {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub invariants: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRelationship {
    pub description: String,
    #[serde(default)]
    pub related_symbol_module_path: Option<String>,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalQueryResponse {
    pub retrieval_query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestCodeResponse {
    pub test_code: String,
}

// =============================================================================
// Schemas
// =============================================================================

fn select_files_schema(top_n: usize) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "selected_files": {
                "type": "array",
                "maxItems": top_n,
                "description": "Most relevant first",
                "items": {
                    "type": "object",
                    "properties": {
                        "rel_path": {
                            "type": "string",
                            "description": "File path exactly as shown in the tree, relative to the project root"
                        },
                        "module_path": {
                            "type": "string",
                            "description": "Full dotted module path of the file (e.g. 'pkg.codec.decoder')"
                        },
                        "reason": {
                            "type": "string",
                            "description": "Why this file matters for testing the target's properties"
                        },
                        "notable_symbols": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": { "type": "string" },
                                    "kind": {
                                        "type": "string",
                                        "description": "function, method, class, or constant"
                                    },
                                    "module_path": {
                                        "type": "string",
                                        "description": "Full dotted path of the symbol (e.g. 'pkg.codec.decoder.decode')"
                                    },
                                    "role_for_pbt": {
                                        "type": "string",
                                        "description": "e.g. inverse operation, validator, serializer, oracle"
                                    }
                                },
                                "required": ["name", "kind", "module_path", "role_for_pbt"]
                            }
                        }
                    },
                    "required": ["rel_path", "module_path", "reason", "notable_symbols"]
                }
            }
        },
        "required": ["selected_files"]
    })
}

fn facts_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "description": {
                "type": "string",
                "description": "What the target function does, in one or two sentences"
            },
            "invariants": { "type": "array", "items": { "type": "string" } },
            "preconditions": { "type": "array", "items": { "type": "string" } },
            "postconditions": { "type": "array", "items": { "type": "string" } },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": {
                            "type": "string",
                            "description": "How the related symbol relates to the target (e.g. decode(encode(x)) == x)"
                        },
                        "related_symbol_module_path": {
                            "type": "string",
                            "description": "Full dotted path of the related symbol, or empty if unknown"
                        },
                        "kind": {
                            "type": "string",
                            "description": "inverse, validator, oracle, equivalent, or other"
                        }
                    },
                    "required": ["description", "related_symbol_module_path", "kind"]
                }
            },
            "examples": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Concrete input/output examples"
            }
        },
        "required": ["description", "invariants", "preconditions", "postconditions", "relationships", "examples"]
    })
}

fn retrieval_query_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "retrieval_query": {
                "type": "string",
                "description": "One short search query for code related to the target's properties"
            }
        },
        "required": ["retrieval_query"]
    })
}

fn test_code_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "test_code": {
                "type": "string",
                "description": "The complete Python test module"
            }
        },
        "required": ["test_code"]
    })
}

// =============================================================================
// Builders
// =============================================================================

/// Rank project files by likely relevance to the target's properties.
pub fn select_files(
    function: &FunctionInfo,
    tree: &TreeDescription,
    top_n: usize,
    max_chars: usize,
) -> OracleRequest {
    let prompt = format!(
        r#"You are an expert in property-based testing. A property of the target function below may depend on logic defined in OTHER files: an inverse operation, a validator, a serializer, a reference implementation.

Target function: {path}
Defined in: {file} (lines {start}-{end})

```python
{source}
```

Project file tree:
```
{tree}
```

Select at most {top_n} files from the tree, most relevant first, whose contents would help write property-based tests for the target. Do not select the target's own file unless it holds other relevant symbols.

For each file give its path exactly as shown in the tree, its module path, why it matters, and the notable symbols it defines with their role for property-based testing.

{rule}"#,
        path = function.path,
        file = function.file_display(),
        start = function.start_line,
        end = function.end_line,
        source = number_lines(&truncate_chars(&function.source, max_chars), function.start_line),
        tree = tree.rendered,
        rule = METADATA_RULE,
    );

    OracleRequest {
        kind: PromptKind::SelectFiles,
        prompt,
        schema: select_files_schema(top_n),
    }
}

/// Extract property-relevant facts from the selected files' contents.
pub fn extract_file_facts(
    function: &FunctionInfo,
    files: &[(CandidateFile, String)],
    max_chars: usize,
) -> OracleRequest {
    let per_file = max_chars / files.len().max(1);
    let excerpts = files
        .iter()
        .map(|(candidate, content)| {
            let module = candidate
                .module_path
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "module path unknown".to_string());
            format!(
                "### {} ({})\n```python\n{}\n```",
                candidate.rel_path,
                module,
                number_lines(&truncate_chars(content, per_file), 1)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        r#"You are an expert in property-based testing. Extract the information needed to write property-based tests for the target function, using the related files below.

Target function: {path}

```python
{source}
```

Related files:

{excerpts}

Report: a short description of the target; invariants that must always hold; preconditions on its inputs; postconditions on its outputs; relationships with symbols in the related files (inverse operations, validators, equivalent implementations); and concrete examples.

{rule}"#,
        path = function.path,
        source = number_lines(&truncate_chars(&function.source, max_chars), function.start_line),
        rule = METADATA_RULE,
    );

    OracleRequest {
        kind: PromptKind::ExtractFileFacts,
        prompt,
        schema: facts_schema(),
    }
}

/// Ask for a semantic search query describing the target's property-bearing behavior.
pub fn retrieval_query(function: &FunctionInfo, max_chars: usize) -> OracleRequest {
    let prompt = format!(
        r#"You are searching a code base for code related to the function below, to help write property-based tests for it.

Target function: {path}

```python
{source}
```

Write ONE short search query (under 30 words) describing the code that would reveal its properties: its inverse or counterpart operation, validation logic, round-trip behavior, or an equivalent implementation. Example: "decoding counterpart of this encode routine, including round-trip and validation logic".

{rule}"#,
        path = function.path,
        source = truncate_chars(&function.source, max_chars),
        rule = METADATA_RULE,
    );

    OracleRequest {
        kind: PromptKind::RetrievalQuery,
        prompt,
        schema: retrieval_query_schema(),
    }
}

/// Extract property-relevant facts from semantic index hits.
pub fn extract_retrieval_facts(
    function: &FunctionInfo,
    results: &[RetrievalResult],
    max_chars: usize,
) -> OracleRequest {
    let per_hit = max_chars / results.len().max(1);
    let snippets = results
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let origin = match (&hit.module_path, &hit.file) {
                (Some(path), Some(file)) => format!("{} in {}", path, file),
                (Some(path), None) => path.to_string(),
                (None, Some(file)) => format!("{} (module path unknown)", file),
                (None, None) => "origin unknown".to_string(),
            };
            format!(
                "### Snippet {} (score {:.3}): {}\n```python\n{}\n```",
                i + 1,
                hit.score,
                origin,
                truncate_chars(&hit.snippet, per_hit)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        r#"You are an expert in property-based testing. A semantic search returned the snippets below as related to the target function. Extract what helps write property-based tests for the target.

Target function: {path}

```python
{source}
```

Search results:

{snippets}

Report: a short description of the target; invariants; preconditions; postconditions; relationships with symbols from the snippets (give each related symbol's full module path exactly as shown in the snippet header); and concrete examples. Ignore snippets that are unrelated.

{rule}"#,
        path = function.path,
        source = truncate_chars(&function.source, max_chars),
        rule = METADATA_RULE,
    );

    OracleRequest {
        kind: PromptKind::ExtractRetrievalFacts,
        prompt,
        schema: facts_schema(),
    }
}

/// First synthesis of a test module.
pub fn generate_test(
    function: &FunctionInfo,
    context: &AggregatedContext,
    imports: &[String],
    max_chars: usize,
) -> OracleRequest {
    let prompt = format!(
        r#"You are an expert in Python property-based testing with Hypothesis. Write a complete pytest module of property-based tests for the target function.

Target function: {path}
Defined in: {file}

```python
{source}
```

{guidance}

Requirements:
- Use `from hypothesis import given, strategies as st` and `@given` strategies that respect the preconditions.
- Prefer cross-function properties from the context (round trips through an inverse, agreement with a validator) over restating the implementation.
- Import the target and every project symbol by its FULL module path. No relative imports. Do not import symbols marked "path unknown" or "(unresolved)".
- Test functions are named `test_...` and take no fixtures besides Hypothesis arguments.
- Return only Python source in `test_code`, no explanations.

{rule}"#,
        path = function.path,
        file = function.file_display(),
        source = truncate_chars(&function.source, max_chars),
        guidance = synthesis_guidance(context, imports),
        rule = METADATA_RULE,
    );

    OracleRequest {
        kind: PromptKind::GenerateTest,
        prompt,
        schema: test_code_schema(),
    }
}

/// Repair a draft against the checker's diagnostics.
pub fn repair_test(
    function: &FunctionInfo,
    context: &AggregatedContext,
    imports: &[String],
    prior: &TestArtifact,
    report: &ValidationReport,
    max_chars: usize,
) -> OracleRequest {
    let prompt = format!(
        r#"The property-based test module below (version {version}) for {path} failed static checking. Fix the reported problems and keep every test that is not affected. Do not regenerate from scratch.

Target function source:

```python
{source}
```

Previous test module:

```python
{prior}
```

Diagnostics:
```
{diagnostics}
```

{guidance}

Import the target and every project symbol by its FULL module path. No relative imports. Return the complete corrected module in `test_code`.

{rule}"#,
        version = prior.version,
        path = function.path,
        source = truncate_chars(&function.source, max_chars),
        prior = number_lines(&prior.source, 1),
        diagnostics = report.render(),
        guidance = synthesis_guidance(context, imports),
        rule = METADATA_RULE,
    );

    OracleRequest {
        kind: PromptKind::RepairTest,
        prompt,
        schema: test_code_schema(),
    }
}

fn synthesis_guidance(context: &AggregatedContext, imports: &[String]) -> String {
    let mut out = String::from("Context gathered for the target:\n");
    out.push_str(&context.render());

    let review = context.needs_review();
    if !review.is_empty() {
        out.push_str(
            "\nThe entries marked needs-review have no resolvable module path. \
Resolve them against the imports below if you can; otherwise do not import them.\n",
        );
    }

    out.push_str("\nVerified imports (use these exact lines):\n```python\n");
    for line in imports {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("```");
    out
}

/// Prefix each line with its number for better alignment with diagnostics.
fn number_lines(code: &str, first_line: usize) -> String {
    code.lines()
        .enumerate()
        .map(|(i, line)| format!("{:4} | {}", i + first_line, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// At most `max_chars` characters of `text`, marked when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((end, _)) => format!("{}\n...(truncated)", &text[..end]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::aggregator::aggregate;
    use crate::pipeline::facts::{Fact, FactKind, Provenance, SymbolPath};
    use crate::pipeline::model::{Diagnostic, ModulePathRef, Severity};
    use std::path::PathBuf;

    fn function() -> FunctionInfo {
        FunctionInfo {
            path: ModulePathRef::parse("pkg.codec.encoder.encode").unwrap(),
            file: PathBuf::from("pkg/codec/encoder.py"),
            start_line: 3,
            end_line: 4,
            source: "def encode(data):\n    return bytes(data)".to_string(),
            in_class: false,
        }
    }

    fn tree() -> TreeDescription {
        TreeDescription {
            rendered: "proj/\n└── pkg/\n".to_string(),
            entries: 2,
            truncated: false,
        }
    }

    // =========================================================================
    // truncate_chars tests
    // =========================================================================

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc\n...(truncated)");
        assert_eq!(truncate_chars("ééé", 2), "éé\n...(truncated)");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn test_number_lines_uses_offset() {
        assert_eq!(number_lines("a\nb", 3), "   3 | a\n   4 | b");
    }

    // =========================================================================
    // Builder tests
    // =========================================================================

    #[test]
    fn test_every_prompt_restates_metadata_rule() {
        let context = aggregate(&[], &[]);
        let artifact = TestArtifact {
            target: function(),
            source: "import x\n".to_string(),
            version: 0,
        };
        let report = ValidationReport::new(vec![]);
        let requests = vec![
            select_files(&function(), &tree(), 3, 100),
            extract_file_facts(&function(), &[], 100),
            retrieval_query(&function(), 100),
            extract_retrieval_facts(&function(), &[], 100),
            generate_test(&function(), &context, &[], 100),
            repair_test(&function(), &context, &[], &artifact, &report, 100),
        ];
        let kinds: Vec<_> = requests.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PromptKind::SelectFiles,
                PromptKind::ExtractFileFacts,
                PromptKind::RetrievalQuery,
                PromptKind::ExtractRetrievalFacts,
                PromptKind::GenerateTest,
                PromptKind::RepairTest,
            ]
        );
        for request in &requests {
            assert!(request.prompt.contains("FULL dotted module path"), "{}", request.kind);
            assert!(request.prompt.contains("pkg.codec.encoder.encode"), "{}", request.kind);
            assert_eq!(request.schema["type"], "object");
        }
    }

    #[test]
    fn test_select_files_bounds_schema_and_numbers_source() {
        let request = select_files(&function(), &tree(), 5, 1000);
        assert_eq!(request.schema["properties"]["selected_files"]["maxItems"], 5);
        assert!(request.prompt.contains("   3 | def encode(data):"));
        assert!(request.prompt.contains("└── pkg/"));
    }

    #[test]
    fn test_generate_test_lists_imports_and_gaps() {
        let selector = vec![Fact::new(
            FactKind::Relationship,
            "decode inverts encode",
            SymbolPath::Unresolved("codec.decode".to_string()),
            Provenance::FileExtraction,
        )];
        let context = aggregate(&selector, &[]);
        let imports = vec!["from pkg.codec.encoder import encode".to_string()];
        let request = generate_test(&function(), &context, &imports, 1000);
        assert!(request.prompt.contains("from pkg.codec.encoder import encode"));
        assert!(request.prompt.contains("codec.decode (unresolved)"));
        assert!(request.prompt.contains("needs-review"));
    }

    #[test]
    fn test_repair_includes_prior_and_diagnostics() {
        let artifact = TestArtifact {
            target: function(),
            source: "from pkg.codec import decode\n".to_string(),
            version: 1,
        };
        let report = ValidationReport::new(vec![Diagnostic::new(
            Severity::Error,
            "E0611",
            "No name 'decode' in module 'pkg.codec'",
            "pylint",
        )
        .at(1, 0)]);
        let request = repair_test(&function(), &aggregate(&[], &[]), &[], &artifact, &report, 1000);
        assert!(request.prompt.contains("version 1"));
        assert!(request.prompt.contains("   1 | from pkg.codec import decode"));
        assert!(request.prompt.contains("No name 'decode' in module 'pkg.codec'"));
    }

    #[test]
    fn test_extract_retrieval_facts_labels_snippets() {
        let hits = vec![RetrievalResult {
            snippet: "def decode(raw): ...".to_string(),
            module_path: ModulePathRef::parse("pkg.codec.decoder.decode"),
            file: Some("pkg/codec/decoder.py".to_string()),
            score: 0.91,
        }];
        let request = extract_retrieval_facts(&function(), &hits, 1000);
        assert!(request
            .prompt
            .contains("### Snippet 1 (score 0.910): pkg.codec.decoder.decode in pkg/codec/decoder.py"));
    }

    #[test]
    fn test_facts_response_tolerates_missing_fields() {
        let response: FactsResponse =
            serde_json::from_value(json!({"description": "encodes"})).unwrap();
        assert_eq!(response.description, "encodes");
        assert!(response.relationships.is_empty());
    }
}
