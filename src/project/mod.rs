//! Project layout description.
//!
//! The relevance selector sees the whole project as a rendered directory tree,
//! so it can nominate files the catalogue alone would not surface.

mod tree;

pub use tree::build_tree;

/// A rendered `tree`-style listing of the project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDescription {
    pub rendered: String,
    /// Files and directories listed, excluding the root line.
    pub entries: usize,
    /// The entry limit cut the listing short.
    pub truncated: bool,
}

impl std::fmt::Display for TreeDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}
