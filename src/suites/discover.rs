//! Job file discovery

use std::path::{Path, PathBuf};
use tracing::{debug, error};
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Every file under `root` whose name satisfies `matches`, in sorted order.
/// A `root` that is itself a file is returned as is.
pub fn find_files(root: &Path, matches: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }

    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!("Error reading {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && matches(entry.path()) {
            debug!(path = %entry.path().display(), "Found job file");
            found.push(entry.into_path());
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn is_feature(path: &Path) -> bool {
        path.extension().map(|e| e == "feature").unwrap_or(false)
    }

    #[test]
    fn test_find_files_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/nested")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("b/nested/z.feature"), "").unwrap();
        fs::write(root.join("b/a.feature"), "").unwrap();
        fs::write(root.join("a.feature"), "").unwrap();
        fs::write(root.join("notes.txt"), "").unwrap();
        fs::write(root.join(".hidden/skip.feature"), "").unwrap();

        let found: Vec<PathBuf> = find_files(root, is_feature)
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            found,
            vec![
                PathBuf::from("a.feature"),
                PathBuf::from("b/a.feature"),
                PathBuf::from("b/nested/z.feature"),
            ]
        );
    }

    #[test]
    fn test_explicit_file_is_kept() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("login.feature");
        fs::write(&file, "").unwrap();
        assert_eq!(find_files(&file, |_| false), vec![file]);
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let dir = tempdir().unwrap();
        assert!(find_files(&dir.path().join("missing"), is_feature).is_empty());
    }
}
