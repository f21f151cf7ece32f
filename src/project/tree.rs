use super::TreeDescription;
use crate::language::slash_path;
use crate::project_config::ProjectConfig;
use anyhow::{Context, Result};
use std::path::Path;

/// Directories left out of the rendered tree.
pub const IGNORED_DIRECTORIES: &[&str] = &[
    ".git",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    ".mypy_cache",
    ".pytest_cache",
    "node_modules",
];

struct Walk<'a> {
    root: &'a Path,
    config: &'a ProjectConfig,
    lines: Vec<String>,
    entries: usize,
    max_entries: usize,
    max_depth: usize,
    truncated: bool,
}

/// Render the directory tree under `root`.
///
/// Directories come first, then files, each group sorted case-insensitively.
/// Directories deeper than `max_depth` are listed but not expanded. Once
/// `max_entries` entries have been listed a truncation marker ends the output.
/// Paths matching the project's exclude globs are left out.
pub fn build_tree(
    root: &Path,
    config: &ProjectConfig,
    max_depth: usize,
    max_entries: usize,
) -> Result<TreeDescription> {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());

    let mut walk = Walk {
        root,
        config,
        lines: vec![format!("{}/", root_name)],
        entries: 0,
        max_entries,
        max_depth,
        truncated: false,
    };

    let children = sorted_children(root, &walk)
        .with_context(|| format!("Failed to list project directory {:?}", root))?;
    render(root, children, "", 1, &mut walk);

    Ok(TreeDescription {
        rendered: walk.lines.join("\n"),
        entries: walk.entries,
        truncated: walk.truncated,
    })
}

fn sorted_children(dir: &Path, walk: &Walk) -> std::io::Result<Vec<(String, bool)>> {
    let mut children = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        if is_dir && IGNORED_DIRECTORIES.contains(&name.as_str()) {
            continue;
        }
        let path = entry.path();
        if let Ok(rel) = path.strip_prefix(walk.root) {
            if walk.config.is_excluded(&slash_path(rel)) {
                continue;
            }
        }
        children.push((name, is_dir));
    }
    children.sort_by(|(a, a_dir), (b, b_dir)| {
        b_dir
            .cmp(a_dir)
            .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
            .then_with(|| a.cmp(b))
    });
    Ok(children)
}

fn render(dir: &Path, children: Vec<(String, bool)>, prefix: &str, depth: usize, walk: &mut Walk) {
    let total = children.len();
    for (i, (name, is_dir)) in children.into_iter().enumerate() {
        if walk.truncated {
            return;
        }
        if walk.entries >= walk.max_entries {
            walk.lines.push(format!(
                "{}└── ... (truncated, limit={})",
                prefix, walk.max_entries
            ));
            walk.truncated = true;
            return;
        }

        let last = i + 1 == total;
        let connector = if last { "└── " } else { "├── " };
        let suffix = if is_dir { "/" } else { "" };
        walk.lines
            .push(format!("{}{}{}{}", prefix, connector, name, suffix));
        walk.entries += 1;

        if is_dir && depth < walk.max_depth {
            let path = dir.join(&name);
            match sorted_children(&path, walk) {
                Ok(grandchildren) => {
                    let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
                    render(&path, grandchildren, &child_prefix, depth + 1, walk);
                }
                Err(e) => tracing::debug!("Not listing {}: {}", path.display(), e),
            }
        }
    }
}
