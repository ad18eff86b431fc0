use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Directory names never descended into.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "vendor",
];

/// A regular file found under the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub abs_path: PathBuf,
    /// Relative to the root, `/`-separated.
    pub rel_path: String,
    pub size: u64,
}

/// What reading a candidate file produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary,
    Oversized,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid exclude pattern {pattern}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("exclude patterns: {e}")))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let text = rel.to_string_lossy().replace('\\', "/");
    (!text.is_empty()).then_some(text)
}

/// List every file under `root`, sorted by relative path.
///
/// `.gitignore` rules apply whether or not `root` is a git checkout. Hidden
/// files are included; [`DEFAULT_EXCLUDES`] directories and anything matching
/// one of `exclude` (matched against the relative path) are not.
pub fn walk_project(root: &Path, exclude: &[String]) -> Result<Vec<WalkEntry>> {
    let globs = build_globset(exclude)?;
    let filter_root = root.to_path_buf();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .require_git(false)
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_some_and(|t| t.is_dir()) && DEFAULT_EXCLUDES.contains(&name.as_ref()) {
                return false;
            }
            match relative_path(&filter_root, entry.path()) {
                Some(rel) => !globs.is_match(&rel),
                None => true,
            }
        })
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Some(rel_path) = relative_path(root, entry.path()) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        entries.push(WalkEntry {
            abs_path: entry.path().to_path_buf(),
            rel_path,
            size,
        });
    }
    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

/// Read `entry` as UTF-8 text unless it is larger than `max_bytes` or looks
/// binary (contains NUL or is not valid UTF-8).
pub fn read_source(entry: &WalkEntry, max_bytes: u64) -> std::io::Result<FileContent> {
    if entry.size > max_bytes {
        return Ok(FileContent::Oversized);
    }
    let bytes = std::fs::read(&entry.abs_path)?;
    if bytes.len() as u64 > max_bytes {
        return Ok(FileContent::Oversized);
    }
    if bytes.contains(&0) {
        return Ok(FileContent::Binary);
    }
    Ok(match String::from_utf8(bytes) {
        Ok(text) => FileContent::Text(text),
        Err(_) => FileContent::Binary,
    })
}

/// Hex SHA-256 of file content.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn paths(entries: &[WalkEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.rel_path.as_str()).collect()
    }

    #[test]
    fn test_walk_respects_excludes_and_gitignore() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/nested/util.py"), "def f(): pass").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join("generated/out.rs"), "y").unwrap();
        fs::write(root.join("app.min.js"), "z").unwrap();
        fs::write(root.join(".gitignore"), "generated/\n").unwrap();

        let entries = walk_project(root, &["*.min.js".to_string()]).unwrap();
        assert_eq!(paths(&entries), vec![".gitignore", "src/main.rs", "src/nested/util.py"]);
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let dir = tempdir().unwrap();
        let err = walk_project(dir.path(), &["a[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_read_source_classifies_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("b.bin"), [0x66u8, 0x00, 0x67]).unwrap();
        fs::write(root.join("c.txt"), [0xffu8, 0xfe, 0x41]).unwrap();
        fs::write(root.join("d.txt"), "x".repeat(64)).unwrap();

        let entries = walk_project(root, &[]).unwrap();
        let read: Vec<FileContent> = entries.iter().map(|e| read_source(e, 32).unwrap()).collect();
        assert_eq!(
            read,
            vec![
                FileContent::Text("hello".to_string()),
                FileContent::Binary,
                FileContent::Binary,
                FileContent::Oversized,
            ]
        );
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
