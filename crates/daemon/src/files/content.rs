//! Single-file reads below the watched root.
//!
//! Paths arrive from viewers, so they are resolved component by component
//! and re-checked after symlink resolution before anything is read.

use std::path::{Component, Path, PathBuf};

use super::FileError;

/// Reads the whole file at `relative` below `root`.
///
/// No caching and no partial reads: every call hits the filesystem.
pub fn read_file(root: &Path, relative: &str) -> Result<Vec<u8>, FileError> {
    let candidate = resolve_path(root, relative)?;

    let canonical_root = std::fs::canonicalize(root).map_err(|e| FileError::from_io(root, e))?;
    let canonical = std::fs::canonicalize(&candidate).map_err(|e| FileError::from_io(&candidate, e))?;
    if !canonical.starts_with(&canonical_root) {
        tracing::warn!(path = %relative, "Symlink escapes the watched root");
        return Err(FileError::PathTraversal(relative.to_string()));
    }

    let metadata = std::fs::metadata(&canonical).map_err(|e| FileError::from_io(&canonical, e))?;
    if !metadata.is_file() {
        return Err(FileError::NotAFile(candidate));
    }

    let content = std::fs::read(&canonical).map_err(|e| FileError::from_io(&canonical, e))?;
    tracing::debug!(path = %relative, bytes = content.len(), "Read file");
    Ok(content)
}

/// Joins `relative` onto `root`, rejecting anything that could leave it.
///
/// A leading `/` is tolerated and stripped; `..` components, NUL bytes and
/// platform prefixes are not.
fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, FileError> {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return Err(FileError::EmptyPath);
    }
    if relative.contains('\0') {
        return Err(FileError::PathTraversal(relative.to_string()));
    }

    let mut result = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => result.push(name),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                tracing::warn!(path = %relative, "Path traversal attempt detected");
                return Err(FileError::PathTraversal(relative.to_string()));
            }
        }
    }

    if result == root {
        return Err(FileError::EmptyPath);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("notes.txt"), "hello notes").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/deep.md"), "# deep").unwrap();
        temp
    }

    #[test]
    fn test_read_file() {
        let temp = fixture();
        assert_eq!(read_file(temp.path(), "notes.txt").unwrap(), b"hello notes");
        assert_eq!(read_file(temp.path(), "sub/deep.md").unwrap(), b"# deep");
        assert_eq!(read_file(temp.path(), "/sub/./deep.md").unwrap(), b"# deep");
    }

    #[test]
    fn test_read_file_sees_latest_content() {
        let temp = fixture();
        assert_eq!(read_file(temp.path(), "notes.txt").unwrap(), b"hello notes");
        fs::write(temp.path().join("notes.txt"), "changed").unwrap();
        assert_eq!(read_file(temp.path(), "notes.txt").unwrap(), b"changed");
    }

    #[test]
    fn test_read_missing_file() {
        let temp = fixture();
        assert!(matches!(
            read_file(temp.path(), "missing.txt"),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_directory_is_not_a_file() {
        let temp = fixture();
        assert!(matches!(
            read_file(temp.path(), "sub"),
            Err(FileError::NotAFile(_))
        ));
    }

    #[test]
    fn test_read_rejects_empty_path() {
        let temp = fixture();
        assert!(matches!(read_file(temp.path(), ""), Err(FileError::EmptyPath)));
        assert!(matches!(read_file(temp.path(), "/"), Err(FileError::EmptyPath)));
        assert!(matches!(read_file(temp.path(), "."), Err(FileError::EmptyPath)));
    }

    #[test]
    fn test_read_rejects_parent_dir() {
        let temp = fixture();
        for path in ["../etc/passwd", "sub/../../etc/passwd", "sub/../notes.txt"] {
            assert!(
                matches!(read_file(temp.path(), path), Err(FileError::PathTraversal(_))),
                "path {:?} was not rejected",
                path
            );
        }
    }

    #[test]
    fn test_read_rejects_null_byte() {
        let temp = fixture();
        assert!(matches!(
            read_file(temp.path(), "notes.txt\0.png"),
            Err(FileError::PathTraversal(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_read_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), "top secret").unwrap();

        let temp = fixture();
        std::os::unix::fs::symlink(outside.path().join("secret"), temp.path().join("link")).unwrap();

        assert!(matches!(
            read_file(temp.path(), "link"),
            Err(FileError::PathTraversal(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_read_follows_symlink_inside_root() {
        let temp = fixture();
        std::os::unix::fs::symlink(temp.path().join("notes.txt"), temp.path().join("alias")).unwrap();
        assert_eq!(read_file(temp.path(), "alias").unwrap(), b"hello notes");
    }
}
