//! In-memory stand-ins for the oracle, index, and checker, plus a small
//! on-disk sample project, shared by the pipeline tests.

use super::model::{Diagnostic, FunctionInfo, ModulePathRef, Severity, ValidationReport};
use super::prompts::PromptKind;
use super::repair::RepairPolicy;
use super::{PipelineEnv, PipelineSettings};
use crate::catalog::{CatalogProvider, FunctionCatalog, SourceCatalog};
use crate::checker::{CheckerError, StaticChecker};
use crate::index::{IndexError, IndexHit, SemanticIndex};
use crate::language::Language;
use crate::oracle::{LanguageOracle, OracleError, OracleRequest};
use crate::project::{build_tree, TreeDescription};
use crate::project_config::ProjectConfig;
use crate::runner::CancelFlag;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =============================================================================
// ScriptedOracle
// =============================================================================

/// Answers each prompt kind from its own queue. The last answer of a queue
/// repeats forever; an unscripted kind is unavailable.
#[derive(Default)]
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<PromptKind, VecDeque<Result<Value, OracleError>>>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: PromptKind, response: Value) -> Self {
        self.push(kind, Ok(response))
    }

    pub fn with_error(self, kind: PromptKind, error: OracleError) -> Self {
        self.push(kind, Err(error))
    }

    fn push(self, kind: PromptKind, answer: Result<Value, OracleError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(answer);
        self
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.requests_of(kind).len()
    }

    pub fn requests_of(&self, kind: PromptKind) -> Vec<OracleRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LanguageOracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(&request.kind) else {
            return Err(OracleError::Unavailable(format!("no script for {}", request.kind)));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

// =============================================================================
// FixedIndex
// =============================================================================

/// Returns the same hits for every query.
pub struct FixedIndex {
    hits: Vec<IndexHit>,
    fail: bool,
    queries: Mutex<Vec<(String, usize)>>,
}

impl FixedIndex {
    pub fn new(hits: Vec<IndexHit>) -> Self {
        Self {
            hits,
            fail: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SemanticIndex for FixedIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        self.queries.lock().unwrap().push((text.to_string(), k));
        if self.fail {
            return Err(IndexError::Unavailable("connection refused".into()));
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

pub fn decoder_hit() -> IndexHit {
    IndexHit {
        snippet: "# pkg.codec.decoder.decode\ndef decode(raw):\n    return list(raw)".to_string(),
        score: 0.92,
        module_path: ModulePathRef::parse("pkg.codec.decoder.decode"),
        file: Some("pkg/codec/decoder.py".to_string()),
    }
}

// =============================================================================
// ScriptedChecker
// =============================================================================

/// Answers checks from a queue whose last entry repeats.
pub struct ScriptedChecker {
    reports: Mutex<VecDeque<Result<ValidationReport, CheckerError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedChecker {
    pub fn new(reports: Vec<Result<ValidationReport, CheckerError>>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl StaticChecker for ScriptedChecker {
    async fn check(&self, source: &str) -> Result<ValidationReport, CheckerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(source.to_string());
        let mut reports = self.reports.lock().unwrap();
        if reports.len() > 1 {
            reports.pop_front().unwrap()
        } else {
            reports.front().cloned().unwrap_or_else(|| Ok(clean_report()))
        }
    }
}

pub fn clean_report() -> ValidationReport {
    ValidationReport::new(Vec::new())
}

pub fn error_report(code: &str) -> ValidationReport {
    ValidationReport::new(vec![Diagnostic::new(
        Severity::Error,
        code,
        "Undefined variable 'x'",
        "pylint",
    )
    .at(5, 4)])
}

// =============================================================================
// Sample project
// =============================================================================

/// A codec package with `encode` and its inverse `decode` in sibling modules,
/// plus an unrelated utility module.
pub struct SampleProject {
    dir: TempDir,
    pub catalog: Arc<FunctionCatalog>,
    pub tree: TreeDescription,
}

impl SampleProject {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn function(&self, path: &str) -> FunctionInfo {
        let index = self
            .catalog
            .position(&ModulePathRef::parse(path).unwrap())
            .unwrap();
        self.catalog.functions()[index].clone()
    }

    pub fn encode(&self) -> FunctionInfo {
        self.function("pkg.codec.encoder.encode")
    }

    pub fn decode(&self) -> FunctionInfo {
        self.function("pkg.codec.decoder.decode")
    }
}

pub fn sample_project() -> SampleProject {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let files = [
        ("pyproject.toml", "[project]\nname = \"pkg\"\n"),
        ("pkg/__init__.py", ""),
        ("pkg/codec/__init__.py", ""),
        (
            "pkg/codec/encoder.py",
            "def encode(data):\n    \"\"\"Encode a list of ints as bytes.\"\"\"\n    return bytes(data)\n",
        ),
        (
            "pkg/codec/decoder.py",
            "def decode(raw):\n    \"\"\"Decode bytes into a list of ints.\"\"\"\n    return list(raw)\n",
        ),
        (
            "pkg/util.py",
            "def slugify(text):\n    return text.lower().replace(' ', '-')\n",
        ),
    ];
    for (rel, content) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    let catalog = SourceCatalog::new(Language::Python, ProjectConfig::default())
        .catalog(root)
        .unwrap();
    let tree = build_tree(root, &ProjectConfig::default(), 20, 5000).unwrap();
    SampleProject {
        dir,
        catalog: Arc::new(catalog),
        tree,
    }
}

pub const SCENARIO_A_TEST: &str = "\
from hypothesis import given, strategies as st

from pkg.codec.decoder import decode
from pkg.codec.encoder import encode


@given(st.lists(st.integers(min_value=0, max_value=255)))
def test_decode_inverts_encode(data):
    assert decode(encode(data)) == data
";

/// Oracle answers for `encode` with its inverse in another module.
pub fn scenario_a_oracle() -> ScriptedOracle {
    let code = json!({ "test_code": format!("```python\n{}```", SCENARIO_A_TEST) });
    ScriptedOracle::new()
        .with(
            PromptKind::SelectFiles,
            json!({"selected_files": [
                {
                    "rel_path": "pkg/codec/decoder.py",
                    "module_path": "pkg.codec.decoder",
                    "reason": "defines decode, the inverse of encode",
                    "notable_symbols": [{
                        "name": "decode",
                        "kind": "function",
                        "module_path": "pkg.codec.decoder.decode",
                        "role_for_pbt": "inverse operation"
                    }]
                },
                {
                    "rel_path": "pkg/util.py",
                    "module_path": "pkg.util",
                    "reason": "string helpers",
                    "notable_symbols": [{
                        "name": "slugify",
                        "kind": "function",
                        "module_path": "pkg.util.slugify",
                        "role_for_pbt": "unrelated"
                    }]
                }
            ]}),
        )
        .with(
            PromptKind::ExtractFileFacts,
            json!({
                "description": "Encodes a list of ints in range(256) as bytes",
                "invariants": ["decode(encode(data)) == data"],
                "preconditions": ["every item is an int in range(256)"],
                "postconditions": ["len(encode(data)) == len(data)"],
                "relationships": [{
                    "description": "decode inverts encode",
                    "related_symbol_module_path": "pkg.codec.decoder.decode",
                    "kind": "inverse"
                }],
                "examples": ["encode([104, 105]) == b'hi'"]
            }),
        )
        .with(
            PromptKind::RetrievalQuery,
            json!({"retrieval_query": "decoding counterpart of encode including round-trip logic"}),
        )
        .with(
            PromptKind::ExtractRetrievalFacts,
            json!({
                "description": "",
                "invariants": ["decode(encode(data)) == data"],
                "preconditions": [],
                "postconditions": [],
                "relationships": [{
                    "description": "decode inverts encode",
                    "related_symbol_module_path": "pkg.codec.decoder.decode",
                    "kind": "inverse"
                }],
                "examples": []
            }),
        )
        .with(PromptKind::GenerateTest, code.clone())
        .with(PromptKind::RepairTest, code)
}

pub fn sample_env(
    project: &SampleProject,
    oracle: Arc<dyn LanguageOracle>,
    index: Arc<FixedIndex>,
    checker: Arc<ScriptedChecker>,
    max_attempts: u32,
) -> PipelineEnv {
    PipelineEnv {
        oracle,
        index,
        checker,
        catalog: Arc::clone(&project.catalog),
        tree: Arc::new(project.tree.clone()),
        project_root: project.root().to_path_buf(),
        settings: PipelineSettings {
            top_n: NonZeroUsize::new(3).unwrap(),
            retrieval_k: 5,
            max_source_snippet_chars: 4000,
            policy: RepairPolicy {
                max_attempts,
                tolerate_warnings: true,
                accept_on_checker_crash: false,
            },
        },
        cancel: CancelFlag::new(),
    }
}
