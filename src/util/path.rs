use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Normalize a raw path string: backslash separators become forward
/// slashes, runs of slashes collapse to one. Idempotent.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_slash = false;
    for c in raw.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// Compute the mapping key for an absolute event path: normalize both the
/// path and the source root, then strip the root prefix. Returns a
/// forward-slash separated relative path suitable as a platform-independent
/// mapping key. Paths outside the root are a caller error.
pub fn to_key(path: &Path, source_root: &Path) -> Result<RelPath> {
    let full = normalize(&path.to_string_lossy());
    let root = normalize(&source_root.to_string_lossy());
    let root = root.trim_end_matches('/');

    let rel = full
        .strip_prefix(root)
        .and_then(|r| r.strip_prefix('/'))
        .with_context(|| format!("{full} is not under source root {root}"))?;

    RelPath::new(rel)
}

/// A validated relative path: forward-slash separated, no leading slash,
/// no empty segments, no `.` or `..` components. The only path shape the
/// mapping document is allowed to contain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let s = normalize(&raw);
        if s.is_empty() {
            anyhow::bail!("relative path must not be empty");
        }
        if s.starts_with('/') || (s.len() > 1 && s.as_bytes()[1] == b':') {
            anyhow::bail!("absolute path not allowed in mapping: {raw}");
        }
        if s.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            anyhow::bail!("invalid path segment in mapping entry: {raw}");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment (the file name).
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// File name extension including the dot, or `None` when the name has
    /// no dot (or only a leading one, e.g. `.gitignore`).
    pub fn extension(&self) -> Option<&str> {
        let name = self.basename();
        match name.rfind('.') {
            Some(idx) if idx > 0 => Some(&name[idx..]),
            _ => None,
        }
    }
}

impl TryFrom<String> for RelPath {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RelPath> for String {
    fn from(p: RelPath) -> String {
        p.0
    }
}

impl std::fmt::Display for RelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
