//! Python language support.
//!
//! The scanner is indentation based rather than a full parser: it finds `def`,
//! `async def` and `class` headers, tracks the enclosing scopes, and measures
//! each body by indentation. That is enough to catalogue importable callables
//! and the names a module exports.

use crate::pipeline::model::ModulePathRef;
use crate::project_config::ProjectConfig;
use anyhow::Result;
use std::path::{Component, Path, PathBuf};

/// Python language handler.
pub struct PythonLanguage;

/// Directories never scanned, on top of every hidden directory.
pub const SKIP_DIRECTORIES: &[&str] = &[
    "__pycache__",
    "venv",
    "env",
    "node_modules",
    "build",
    "dist",
    "site-packages",
];

const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "try", "except", "finally", "with", "return",
    "import", "from", "pass", "raise", "assert", "del", "global", "nonlocal", "lambda",
    "yield", "await", "match", "case", "print",
];

/// A callable found by [`PythonLanguage::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFunction {
    /// Enclosing class names, outermost first. Empty for module-level functions.
    pub classes: Vec<String>,
    pub name: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub source: String,
}

/// Everything the scanner learned about one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleScan {
    pub functions: Vec<ScannedFunction>,
    /// Classes not nested in a function, dotted relative to the module.
    pub classes: Vec<String>,
    /// Top-level names bound by `def`, `class`, assignment, or `from … import`.
    pub exported: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Class,
    Function,
}

struct Scope {
    indent: usize,
    kind: ScopeKind,
    name: String,
}

impl PythonLanguage {
    /// All `.py` files under `dir`, relative to it, sorted. Hidden directories,
    /// [`SKIP_DIRECTORIES`], and the project's exclude globs are left out.
    pub fn find_source_files(&self, dir: &Path, config: &ProjectConfig) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        if !dir.is_dir() {
            return Ok(files);
        }

        for entry in walkdir::WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && !SKIP_DIRECTORIES.contains(&name.as_ref())
            })
        {
            let entry = entry?;
            let path = entry.path();

            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("py")
            {
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            if config.is_excluded(&slash_path(relative)) {
                continue;
            }
            files.push(relative.to_path_buf());
        }

        files.sort();
        Ok(files)
    }

    /// Infer the dotted module path of a project-relative `.py` file.
    ///
    /// The extension is dropped, then a leading source root, then a trailing
    /// `__init__`. Files whose segments are not identifiers are not importable.
    pub fn module_path(&self, rel_path: &Path, source_roots: &[String]) -> Option<ModulePathRef> {
        let mut parts: Vec<String> = rel_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let file_name = parts.pop()?;
        let stem = file_name.strip_suffix(".py")?.to_string();

        for root in source_roots {
            let root_parts: Vec<&str> = root.split('/').filter(|p| !p.is_empty()).collect();
            if !root_parts.is_empty()
                && parts.len() >= root_parts.len()
                && parts.iter().zip(&root_parts).all(|(a, b)| a == b)
            {
                parts.drain(..root_parts.len());
                break;
            }
        }

        if stem != "__init__" {
            parts.push(stem);
        }
        if parts.is_empty() {
            return None;
        }
        ModulePathRef::parse(&parts.join("."))
    }

    /// Scan one module's source for importable callables and exported names.
    ///
    /// Functions nested inside functions are skipped; methods of classes at any
    /// nesting depth are kept.
    pub fn scan(&self, source: &str) -> ModuleScan {
        let lines: Vec<&str> = source.lines().collect();
        let mut scan = ModuleScan::default();
        let mut scopes: Vec<Scope> = Vec::new();
        let mut open_string: Option<&'static str> = None;
        let mut idx = 0;

        while idx < lines.len() {
            let line = lines[idx];

            if let Some(delim) = open_string {
                if line.matches(delim).count() % 2 == 1 {
                    open_string = None;
                }
                idx += 1;
                continue;
            }

            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                idx += 1;
                continue;
            }

            let indent = indent_width(line);
            while scopes.last().is_some_and(|s| s.indent >= indent) {
                scopes.pop();
            }

            if let Some((kind, name)) = parse_header(trimmed) {
                let header_end = header_end(&lines, idx);
                let in_function = scopes.iter().any(|s| s.kind == ScopeKind::Function);

                if !in_function {
                    let classes: Vec<String> = scopes.iter().map(|s| s.name.clone()).collect();
                    match kind {
                        ScopeKind::Function => {
                            let end = block_end(&lines, header_end, indent);
                            scan.functions.push(ScannedFunction {
                                classes,
                                name: name.clone(),
                                start_line: idx + 1,
                                end_line: end + 1,
                                source: lines[idx..=end].join("\n"),
                            });
                        }
                        ScopeKind::Class => {
                            let mut dotted = classes;
                            dotted.push(name.clone());
                            scan.classes.push(dotted.join("."));
                        }
                    }
                    if scopes.is_empty() {
                        push_unique(&mut scan.exported, name.clone());
                    }
                }

                scopes.push(Scope { indent, kind, name });
                idx = header_end + 1;
                continue;
            }

            if scopes.is_empty() && indent == 0 {
                if trimmed.starts_with("from ") {
                    let (names, last) = imported_names(&lines, idx);
                    for name in names {
                        push_unique(&mut scan.exported, name);
                    }
                    idx = last + 1;
                    continue;
                }
                if let Some(name) = assigned_name(trimmed) {
                    push_unique(&mut scan.exported, name);
                }
            }

            open_string = opens_triple_quote(trimmed);
            idx += 1;
        }

        scan
    }
}

/// Render a relative path with `/` separators regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn parse_header(trimmed: &str) -> Option<(ScopeKind, String)> {
    let rest = trimmed
        .strip_prefix("async ")
        .map(str::trim_start)
        .unwrap_or(trimmed);
    let (kind, rest) = if let Some(rest) = rest.strip_prefix("def ") {
        (ScopeKind::Function, rest)
    } else if let Some(rest) = rest.strip_prefix("class ") {
        (ScopeKind::Class, rest)
    } else {
        return None;
    };
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some((kind, name))
}

/// Bracket balance of one line, ignoring string literals and comments.
fn bracket_delta(line: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '#' => break,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Index of the line that closes a (possibly multi-line) header.
fn header_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0;
    for (offset, line) in lines[start..].iter().enumerate() {
        depth += bracket_delta(line);
        if depth <= 0 {
            return start + offset;
        }
    }
    lines.len() - 1
}

/// Index of the last non-blank line belonging to the block opened at `indent`.
fn block_end(lines: &[&str], header_end: usize, indent: usize) -> usize {
    let mut end = header_end;
    let mut open_string: Option<&'static str> = None;
    for (idx, line) in lines.iter().enumerate().skip(header_end + 1) {
        if let Some(delim) = open_string {
            if line.matches(delim).count() % 2 == 1 {
                open_string = None;
            }
            end = idx;
            continue;
        }
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if indent_width(line) <= indent {
            break;
        }
        end = idx;
        open_string = opens_triple_quote(trimmed);
    }
    end
}

fn opens_triple_quote(trimmed: &str) -> Option<&'static str> {
    ["\"\"\"", "'''"]
        .into_iter()
        .find(|delim| trimmed.matches(delim).count() % 2 == 1)
}

fn assigned_name(trimmed: &str) -> Option<String> {
    let name: String = trimmed
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() || KEYWORDS.contains(&name.as_str()) {
        return None;
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    let rest = trimmed[name.len()..].trim_start();
    let binds = (rest.starts_with('=') && !rest.starts_with("=="))
        || (rest.starts_with(':') && rest.len() > 1);
    binds.then_some(name)
}

/// Names bound by a top-level `from X import …` statement starting at `start`,
/// plus the index of its last line.
fn imported_names(lines: &[&str], start: usize) -> (Vec<String>, usize) {
    let first = lines[start];
    let Some((_, names)) = first.split_once(" import ") else {
        return (Vec::new(), start);
    };

    let mut text = names.to_string();
    let mut last = start;
    if text.contains('(') && !text.contains(')') {
        for (idx, line) in lines.iter().enumerate().skip(start + 1) {
            text.push(' ');
            text.push_str(line);
            last = idx;
            if line.contains(')') {
                break;
            }
        }
    }

    let text = text.split('#').next().unwrap_or_default();
    let names = text
        .replace(['(', ')'], " ")
        .split(',')
        .filter_map(|item| {
            let item = item.trim();
            let bound = match item.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => item,
            };
            (bound != "*" && ModulePathRef::parse(bound).is_some_and(|p| p.segments().count() == 1))
                .then(|| bound.to_string())
        })
        .collect();
    (names, last)
}
