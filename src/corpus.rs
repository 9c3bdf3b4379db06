//! Corpus indexing - the converted-document tree as relative paths
//!
//! A [`CorpusSnapshot`] maps `/`-separated relative paths to modification
//! times. Snapshots are cheap values the planner works on synchronously.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use glob::Pattern;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{AnalysisError, Result};

/// Extensions indexed when nothing else is configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Source of the current converted-document tree
pub trait CorpusIndex: Send + Sync {
    /// Relative paths (with mtimes) of every indexable file
    fn list_files(&self) -> Result<CorpusSnapshot>;
}

/// Point-in-time listing of a directory tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusSnapshot {
    files: BTreeMap<String, Option<SystemTime>>,
}

impl CorpusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from plain paths (no mtimes)
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: paths.into_iter().map(|p| (p.into(), None)).collect(),
        }
    }

    pub fn insert(&mut self, relative: impl Into<String>, modified: Option<SystemTime>) {
        self.files.insert(relative.into(), modified);
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.files.contains_key(relative)
    }

    pub fn modified(&self, relative: &str) -> Option<SystemTime> {
        self.files.get(relative).copied().flatten()
    }

    /// Files in lexicographic order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Files under `dir` (recursive); empty `dir` means everything
    pub fn under<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        self.files
            .keys()
            .filter(move |p| p.starts_with(&prefix))
            .map(String::as_str)
    }

    /// True when at least one file lives under `dir`
    pub fn has_dir(&self, dir: &str) -> bool {
        self.under(dir).next().is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Filesystem-backed corpus index
#[derive(Debug, Clone)]
pub struct FsCorpusIndex {
    root: PathBuf,
    extensions: Vec<String>,
    excludes: Vec<Pattern>,
}

impl FsCorpusIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            excludes: Vec::new(),
        }
    }

    /// Restrict to these extensions (case-insensitive, no leading dot)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Skip relative paths matching any of these glob patterns
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in patterns {
            let pattern = Pattern::new(raw.as_ref()).map_err(|e| AnalysisError::InvalidConfig {
                message: format!("invalid exclude pattern '{}': {}", raw.as_ref(), e),
            })?;
            self.excludes.push(pattern);
        }
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn allowed(&self, path: &Path) -> bool {
        is_allowed_extension(path, &self.extensions)
    }
}

impl CorpusIndex for FsCorpusIndex {
    fn list_files(&self) -> Result<CorpusSnapshot> {
        let mut snapshot = CorpusSnapshot::new();
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "Corpus root missing; empty snapshot");
            return Ok(snapshot);
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %self.root.display(), "Skipping unreadable corpus entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.allowed(entry.path()) {
                continue;
            }
            let Some(relative) = relative_slash_path(&self.root, entry.path()) else {
                continue;
            };
            if self.excludes.iter().any(|p| p.matches(&relative)) {
                continue;
            }
            let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
            snapshot.insert(relative, modified);
        }

        debug!(root = %self.root.display(), files = snapshot.len(), "Indexed corpus");
        Ok(snapshot)
    }
}

/// Extension check shared by the index and the planner
pub fn is_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// `root`-relative path with `/` separators
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "content").unwrap();
    }

    #[test]
    fn test_scan_filters_extensions_and_hidden() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.md");
        touch(tmp.path(), "records/b.txt");
        touch(tmp.path(), "records/scan.pdf");
        touch(tmp.path(), ".cache/c.md");
        touch(tmp.path(), "records/.draft.md");

        let snapshot = FsCorpusIndex::new(tmp.path()).list_files().unwrap();
        let paths: Vec<_> = snapshot.paths().collect();
        assert_eq!(paths, vec!["a.md", "records/b.txt"]);
        assert!(snapshot.modified("a.md").is_some());
    }

    #[test]
    fn test_scan_applies_excludes() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "keep/a.md");
        touch(tmp.path(), "drafts/b.md");

        let snapshot = FsCorpusIndex::new(tmp.path())
            .with_excludes(["drafts/*"])
            .unwrap()
            .list_files()
            .unwrap();
        assert_eq!(snapshot.paths().collect::<Vec<_>>(), vec!["keep/a.md"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let snapshot = FsCorpusIndex::new(tmp.path().join("nope"))
            .list_files()
            .unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_under_matches_directory_boundaries() {
        let snapshot = CorpusSnapshot::from_paths(["rec/a.md", "records/b.md", "rec/sub/c.md"]);
        let under: Vec<_> = snapshot.under("rec").collect();
        assert_eq!(under, vec!["rec/a.md", "rec/sub/c.md"]);
        assert!(snapshot.has_dir("records"));
        assert!(!snapshot.has_dir("missing"));
        assert_eq!(snapshot.under("").count(), 3);
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let err = FsCorpusIndex::new("/tmp").with_excludes(["[unclosed"]).unwrap_err();
        assert_eq!(err.code(), "BULK-033");
    }
}
