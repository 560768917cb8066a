//! Discovery of cookie files below per-browser profile roots.

use std::path::{Path, PathBuf};

use tracing::warn;

/// How far below a profile root the walk descends.
pub const MAX_SEARCH_DEPTH: usize = 2;

/// Collect every file named `filename` at most `max_depth` levels below
/// `root`, in a deterministic order (directories and file names sorted).
///
/// A missing root yields an empty list. Unreadable directories are logged
/// and skipped so one bad profile never hides the others.
pub fn find_cookie_files(root: &Path, filename: &str, max_depth: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if root.is_dir() {
        walk(root, filename, max_depth, &mut found);
    }
    found
}

fn walk(dir: &Path, filename: &str, depth_left: usize, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), %err, "skipping unreadable directory");
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(err) => {
                warn!(dir = %dir.display(), %err, "skipping unreadable entry");
                None
            }
        })
        .collect();
    paths.sort();

    for path in paths {
        if path.is_file() {
            if path.file_name().is_some_and(|n| n == filename) {
                found.push(path);
            }
        } else if path.is_dir() && depth_left > 0 {
            walk(&path, filename, depth_left - 1, found);
        }
    }
}

/// The current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs_next::home_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_root_yields_empty() {
        let files = find_cookie_files(Path::new("/nonexistent/profile/root"), "Cookies", 2);
        assert!(files.is_empty());
    }

    #[test]
    fn finds_files_up_to_bounded_depth() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        // Depth 1 and 2 should be found, depth 3 should not.
        std::fs::create_dir_all(root.join("Default")).unwrap();
        std::fs::create_dir_all(root.join("Profile 1/Network/Deep")).unwrap();
        std::fs::write(root.join("Default/Cookies"), b"").unwrap();
        std::fs::write(root.join("Profile 1/Network/Cookies"), b"").unwrap();
        std::fs::write(root.join("Profile 1/Network/Deep/Cookies"), b"").unwrap();
        std::fs::write(root.join("Profile 1/unrelated"), b"").unwrap();

        let files = find_cookie_files(root, "Cookies", MAX_SEARCH_DEPTH);
        assert_eq!(
            files,
            vec![
                root.join("Default/Cookies"),
                root.join("Profile 1/Network/Cookies"),
            ]
        );
    }

    #[test]
    fn ordering_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for profile in ["b-profile", "a-profile", "c-profile"] {
            std::fs::create_dir_all(root.join(profile)).unwrap();
            std::fs::write(root.join(profile).join("cookies.sqlite"), b"").unwrap();
        }

        let files = find_cookie_files(root, "cookies.sqlite", 2);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.parent().unwrap().file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a-profile", "b-profile", "c-profile"]);
    }
}
