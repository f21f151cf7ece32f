//! Import check against the catalogue.
//!
//! Any `import` or `from ... import` naming a project package must resolve to a
//! catalogued module or symbol. Relative imports are rejected outright since
//! the generated file lives outside the package.

use crate::catalog::FunctionCatalog;
use crate::pipeline::model::{Diagnostic, ModulePathRef, Severity};

/// Diagnostic source for findings of this pass.
pub const IMPORT_CHECK_SOURCE: &str = "pbtgen";

pub const UNRESOLVED_IMPORT_CODE: &str = "unresolved-import";
const RELATIVE_IMPORT_CODE: &str = "relative-import";

/// Check every import in `source`. Imports of third-party packages are left
/// to the external checker.
pub fn check_imports(source: &str, catalog: &FunctionCatalog) -> Vec<Diagnostic> {
    let roots = catalog.project_roots();
    let lines: Vec<&str> = source.lines().collect();
    let mut diagnostics = Vec::new();

    let mut idx = 0;
    while idx < lines.len() {
        let line_no = idx + 1;
        let statement = strip_comment(lines[idx]).trim();
        idx += 1;

        if let Some(rest) = statement.strip_prefix("from ") {
            let Some((module, names)) = rest.split_once(" import ") else {
                continue;
            };
            let module = module.trim();
            let mut names = names.trim().to_string();
            if names.starts_with('(') {
                while !names.contains(')') && idx < lines.len() {
                    names.push(' ');
                    names.push_str(strip_comment(lines[idx]).trim());
                    idx += 1;
                }
            }

            if module.starts_with('.') {
                diagnostics.push(
                    Diagnostic::new(
                        Severity::Error,
                        RELATIVE_IMPORT_CODE,
                        format!(
                            "relative import `from {} import ...`; import by full module path",
                            module
                        ),
                        IMPORT_CHECK_SOURCE,
                    )
                    .at(line_no, 0),
                );
                continue;
            }

            let Some(path) = ModulePathRef::parse(module) else {
                continue;
            };
            if !roots.contains(path.root()) {
                continue;
            }
            if !catalog.is_importable(&path) {
                diagnostics.push(unresolved(line_no, format!(
                    "module `{}` does not exist in the project",
                    path
                )));
                continue;
            }
            for name in imported_names(&names) {
                if name == "*" {
                    continue;
                }
                let resolves = path
                    .child(name)
                    .is_some_and(|full| catalog.contains(&full));
                if !resolves {
                    diagnostics.push(unresolved(line_no, format!(
                        "`{}` is not defined in `{}`",
                        name, path
                    )));
                }
            }
        } else if let Some(rest) = statement.strip_prefix("import ") {
            for name in imported_names(rest) {
                let Some(path) = ModulePathRef::parse(name) else {
                    continue;
                };
                if roots.contains(path.root()) && !catalog.is_importable(&path) {
                    diagnostics.push(unresolved(line_no, format!(
                        "module `{}` does not exist in the project",
                        path
                    )));
                }
            }
        }
    }

    diagnostics
}

fn unresolved(line: usize, message: String) -> Diagnostic {
    Diagnostic::new(
        Severity::Error,
        UNRESOLVED_IMPORT_CODE,
        message,
        IMPORT_CHECK_SOURCE,
    )
    .at(line, 0)
}

/// Names bound by an import list, without `as` aliases or parentheses.
fn imported_names(list: &str) -> impl Iterator<Item = &str> {
    list.split(',')
        .map(|item| item.trim().trim_start_matches('(').trim_end_matches(')').trim())
        .filter_map(|item| item.split_whitespace().next())
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("")
}
