//! Gitignore-style path exclusion.
//!
//! Patterns are evaluated in order and the last matching pattern decides:
//! a plain pattern ignores, a `!pattern` re-includes. A trailing `/` limits
//! the pattern to directories (everything below a matching directory is
//! ignored). Patterns containing a `/` are anchored to the matcher root;
//! all others match a name at any depth.

use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{Error, Result};

/// Name of the project-local ignore file.
pub const IGNORE_FILE_NAME: &str = ".finderignore";

/// Patterns applied before any user pattern.
pub const DEFAULT_PATTERNS: &[&str] = &[
    ".git/",
    ".svn/",
    ".hg/",
    "node_modules/",
    "__pycache__/",
    ".pytest_cache/",
    ".venv/",
    "venv/",
    ".cache/",
    ".Trash/",
    ".DS_Store",
];

#[derive(Debug, Clone)]
struct Rule {
    matcher: GlobMatcher,
    dir_only: bool,
    negated: bool,
}

#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    root: Option<PathBuf>,
    rules: Vec<Rule>,
}

impl IgnoreMatcher {
    /// Build a matcher from an ordered list of patterns. Relative paths and
    /// anchored patterns are resolved against `root`.
    pub fn new<I, S>(root: Option<&Path>, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            if let Some(rule) = compile_rule(pattern.as_ref())? {
                rules.push(rule);
            }
        }
        Ok(Self {
            root: root.map(Path::to_path_buf),
            rules,
        })
    }

    /// Built-in defaults followed by the patterns in `root/.finderignore`,
    /// if that file exists.
    pub fn load(root: &Path) -> Result<Self> {
        let mut patterns: Vec<String> =
            DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect();

        let ignore_file = root.join(IGNORE_FILE_NAME);
        match std::fs::read_to_string(&ignore_file) {
            Ok(contents) => patterns.extend(parse_ignore_file(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %ignore_file.display(),
                    error = %e,
                    "could not read ignore file"
                );
            }
        }

        Self::new(Some(root), patterns)
    }

    /// Whether a file path is excluded.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.evaluate(path, false)
    }

    /// Whether a directory (and so everything below it) is excluded.
    pub fn is_dir_ignored(&self, path: &Path) -> bool {
        self.evaluate(path, true)
    }

    fn evaluate(&self, path: &Path, is_dir: bool) -> bool {
        let parts = self.relative_parts(path);
        if parts.is_empty() {
            return false;
        }

        // Every proper prefix is a directory; the full path is a directory
        // only when asked about one.
        let prefixes: Vec<(String, bool)> = (1..=parts.len())
            .map(|n| (parts[..n].join("/"), n < parts.len() || is_dir))
            .collect();

        let mut ignored = false;
        for rule in &self.rules {
            let hit = prefixes.iter().any(|(prefix, prefix_is_dir)| {
                (!rule.dir_only || *prefix_is_dir)
                    && rule.matcher.is_match(prefix)
            });
            if hit {
                ignored = !rule.negated;
            }
        }
        ignored
    }

    fn relative_parts(&self, path: &Path) -> Vec<String> {
        let relative = self
            .root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);

        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    }
}

/// Split an ignore file into patterns, dropping blank lines and `#`
/// comments.
pub fn parse_ignore_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn compile_rule(raw: &str) -> Result<Option<Rule>> {
    let mut pattern = raw.trim();
    let negated = pattern.starts_with('!');
    if negated {
        pattern = &pattern[1..];
    }
    let dir_only = pattern.ends_with('/');
    let pattern = pattern.trim_end_matches('/');
    if pattern.is_empty() {
        return Ok(None);
    }

    let glob = if let Some(anchored) = pattern.strip_prefix('/') {
        anchored.to_string()
    } else if pattern.contains('/') {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    };

    let matcher = GlobBuilder::new(&glob)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::InvalidPattern(format!("{raw}: {e}")))?
        .compile_matcher();

    Ok(Some(Rule {
        matcher,
        dir_only,
        negated,
    }))
}
