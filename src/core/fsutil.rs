//! Small filesystem helpers shared by the module and view loaders.

use std::io;
use std::path::{Path, PathBuf};

/// Recursively collect files under `dir` with the given extension, sorted by
/// path. An empty extension matches every file. Returns an empty list when
/// the directory does not exist; load determinism everywhere else depends
/// on this ordering.
pub fn walk_files_sorted(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    collect(dir, extension, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect(dir: &Path, extension: &str, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(&path, extension, files)?;
        } else if extension.is_empty()
            || path.extension().and_then(|e| e.to_str()) == Some(extension)
        {
            files.push(path);
        }
    }
    Ok(())
}

/// Sorted list of immediate subdirectories, skipping hidden ones.
pub fn subdirs_sorted(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if path.is_dir() && !hidden {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_walk_files_sorted_recurses_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("b/nested")).unwrap();
        fs::write(tmp.path().join("b/nested/z.xml"), "").unwrap();
        fs::write(tmp.path().join("a.xml"), "").unwrap();
        fs::write(tmp.path().join("skip.txt"), "").unwrap();

        let files = walk_files_sorted(tmp.path(), "xml").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.xml", "b/nested/z.xml"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        assert!(walk_files_sorted(Path::new("/nonexistent"), "xml")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_subdirs_skip_hidden() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("mod_a")).unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("file"), "").unwrap();

        let dirs = subdirs_sorted(tmp.path()).unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].ends_with("mod_a"));
    }
}
