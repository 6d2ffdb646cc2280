//! Filesystem helpers shared by the gatherers and the chunk writer.

use std::path::{Path, PathBuf};

/// Regular files below `root`, depth first in lexical order.
///
/// A regular file as `root` yields itself. Symlinks and other special
/// files are skipped; a missing `root` is an error.
pub fn walk_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(root)?;
    let mut files = Vec::new();
    if metadata.is_file() {
        files.push(root.to_path_buf());
    } else if metadata.is_dir() {
        walk_dir(root, &mut files)?;
    }
    Ok(files)
}

fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_walk_files_sorted_and_recursive() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b/two");
        touch(tmp.path(), "a/one");
        touch(tmp.path(), "a/nested/three");
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let files: Vec<_> = walk_files(tmp.path())
            .unwrap()
            .into_iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a/nested/three"),
                PathBuf::from("a/one"),
                PathBuf::from("b/two"),
            ]
        );
    }

    #[test]
    fn test_walk_files_single_file() {
        let tmp = TempDir::new().unwrap();
        let file = touch(tmp.path(), "data");
        assert_eq!(walk_files(&file).unwrap(), vec![file]);
    }

    #[test]
    fn test_walk_files_missing_root() {
        let tmp = TempDir::new().unwrap();
        let err = walk_files(&tmp.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_files_skips_symlinks() {
        let tmp = TempDir::new().unwrap();
        let target = touch(tmp.path(), "real");
        std::os::unix::fs::symlink(&target, tmp.path().join("alias")).unwrap();
        assert_eq!(walk_files(tmp.path()).unwrap(), vec![target]);
    }
}
