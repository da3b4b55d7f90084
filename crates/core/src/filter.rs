//! Ignore-pattern matching for relative sync paths
//!
//! Patterns use doublestar semantics: `*` stays within one path component,
//! `**` crosses components. A bare directory pattern like `.git` matches the
//! directory itself and everything under it.

use globset::{GlobBuilder, GlobMatcher};

/// A compiled set of ignore patterns.
///
/// Built once from the configured pattern list and shared by the manifest
/// walk, the watcher, and operation ingress. Matching is pure; no I/O.
#[derive(Clone)]
pub struct PathFilter {
    matchers: Vec<GlobMatcher>,
}

impl PathFilter {
    /// Build a filter from a comma-separated pattern string.
    ///
    /// An empty string yields a filter that ignores nothing. Whitespace
    /// around commas is trimmed and empty fragments are skipped.
    ///
    /// # Errors
    /// Returns an error if any pattern fails to compile.
    pub fn new(patterns: &str) -> color_eyre::Result<Self> {
        Self::from_patterns(patterns.split(',').map(str::trim).filter(|p| !p.is_empty()))
    }

    /// Build a filter from individual patterns.
    ///
    /// # Errors
    /// Returns an error if any pattern fails to compile.
    pub fn from_patterns<I, S>(patterns: I) -> color_eyre::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matchers = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            if pattern.ends_with("**") {
                matchers.push(compile(pattern)?);
                continue;
            }

            // A bare pattern also covers its subtree. globset's `**` never
            // matches zero components, so both globs are needed.
            let base = pattern.trim_end_matches('/');
            matchers.push(compile(base)?);
            matchers.push(compile(&format!("{base}/**"))?);
        }

        Ok(Self { matchers })
    }

    /// Check whether a relative (forward-slash) path is ignored.
    #[must_use]
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(rel_path))
    }
}

fn compile(pattern: &str) -> color_eyre::Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()?;
    Ok(glob.compile_matcher())
}
