//! Output-tree file access.
//!
//! Every task writes through [`write_artifact`]: the bytes go to a temporary
//! sibling, are flushed, then renamed over the destination. A reader (the dev
//! server, a concurrent task, the purge pass) therefore sees either the old
//! file or the complete new one, and a task that returned has no pending
//! writes.
//!
//! The listing helpers return paths sorted by file name so every task
//! processes its inputs in a stable order.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Atomically write `bytes` to `path`, creating parent directories.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".webpipe-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write only when the content differs from what is on disk.
///
/// Returns `true` when the file was written. Skipping identical writes keeps
/// output watchers (and browser reloads) quiet when a rerun changes nothing.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path)
        && existing == bytes
    {
        return Ok(false);
    }
    write_artifact(path, bytes)?;
    Ok(true)
}

/// Whether `path` has one of `extensions` (case-insensitive, no dot).
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Files directly inside `dir` (non-recursive) with one of `extensions`,
/// sorted by file name. A missing directory yields an empty list.
pub fn list_files(dir: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Files anywhere under `dir` with one of `extensions`, sorted by path.
/// A missing directory yields an empty list.
pub fn walk_files(dir: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// `path` relative to `base`, with `/` separators, for display and cache keys.
pub fn relative_display(path: &Path, base: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_artifact_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("build/css/style.css");
        write_artifact(&target, b"a{}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"a{}");
    }

    #[test]
    fn write_artifact_replaces_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.txt");
        write_artifact(&target, b"first").unwrap();
        write_artifact(&target, b"second").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("out.txt")]);
    }

    #[test]
    fn write_if_changed_skips_identical_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.css");
        assert!(write_if_changed(&target, b"x").unwrap());
        assert!(!write_if_changed(&target, b"x").unwrap());
        assert!(write_if_changed(&target, b"y").unwrap());
    }

    #[test]
    fn list_files_is_sorted_non_recursive_and_filtered() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.css"), "").unwrap();
        fs::write(tmp.path().join("a.CSS"), "").unwrap();
        fs::write(tmp.path().join("notes.txt"), "").unwrap();
        fs::create_dir(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("nested/c.css"), "").unwrap();

        let files = list_files(tmp.path(), &["css"]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.CSS", "b.css"]);
    }

    #[test]
    fn list_files_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(list_files(&tmp.path().join("nope"), &["css"]).unwrap().is_empty());
    }

    #[test]
    fn walk_files_recurses() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("icons/small")).unwrap();
        fs::write(tmp.path().join("icons/small/a.png"), "").unwrap();
        fs::write(tmp.path().join("b.jpg"), "").unwrap();
        fs::write(tmp.path().join("c.gif"), "").unwrap();

        let files = walk_files(tmp.path(), &["png", "jpg"]).unwrap();
        let rels: Vec<_> = files
            .iter()
            .map(|p| relative_display(p, tmp.path()))
            .collect();
        assert_eq!(rels, vec!["b.jpg", "icons/small/a.png"]);
    }
}
