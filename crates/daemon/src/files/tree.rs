//! Nested listing of the watched root.
//!
//! Directories map to nested trees and files to a leaf marker, serialized as
//! JSON objects and `null` respectively:
//!
//! ```json
//! { "notes.txt": null, "src": { "main.rs": null } }
//! ```

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::Serialize;
use walkdir::WalkDir;

use super::FileError;

/// A directory's entries by name.
pub type FileTree = BTreeMap<String, TreeNode>;

/// One entry of a [`FileTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// A directory and its entries.
    Directory(FileTree),
    /// A file; content is not included.
    File,
}

/// Lists everything under `root`.
///
/// The root itself is not an entry. Symlinks are listed as files and not
/// followed.
pub fn list_tree(root: &Path) -> Result<FileTree, FileError> {
    let metadata = std::fs::metadata(root).map_err(|e| FileError::from_io(root, e))?;
    if !metadata.is_dir() {
        return Err(FileError::NotADirectory(root.to_path_buf()));
    }

    let mut tree = FileTree::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            match e.into_io_error() {
                Some(io) => FileError::from_io(&path, io),
                None => FileError::Io(std::io::Error::other(format!(
                    "filesystem loop at {}",
                    path.display()
                ))),
            }
        })?;

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();

        insert(&mut tree, &parts, entry.file_type().is_dir());
    }

    tracing::debug!(root = %root.display(), entries = tree.len(), "Listed file tree");
    Ok(tree)
}

fn insert(tree: &mut FileTree, parts: &[String], is_dir: bool) {
    let Some((name, rest)) = parts.split_first() else {
        return;
    };

    if rest.is_empty() {
        let node = if is_dir {
            TreeNode::Directory(FileTree::new())
        } else {
            TreeNode::File
        };
        tree.entry(name.clone()).or_insert(node);
        return;
    }

    let child = tree
        .entry(name.clone())
        .or_insert_with(|| TreeNode::Directory(FileTree::new()));
    if let TreeNode::Directory(subtree) = child {
        insert(subtree, rest, is_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_tree_nested() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("notes.txt"), "hi").unwrap();
        fs::create_dir_all(temp.path().join("src/bin")).unwrap();
        fs::write(temp.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(temp.path().join("src/bin/tool.rs"), "").unwrap();
        fs::create_dir(temp.path().join("empty")).unwrap();

        let tree = list_tree(temp.path()).unwrap();

        let mut bin = FileTree::new();
        bin.insert("tool.rs".to_string(), TreeNode::File);
        let mut src = FileTree::new();
        src.insert("bin".to_string(), TreeNode::Directory(bin));
        src.insert("main.rs".to_string(), TreeNode::File);
        let mut expected = FileTree::new();
        expected.insert("empty".to_string(), TreeNode::Directory(FileTree::new()));
        expected.insert("notes.txt".to_string(), TreeNode::File);
        expected.insert("src".to_string(), TreeNode::Directory(src));

        assert_eq!(tree, expected);
    }

    #[test]
    fn test_list_tree_empty_root() {
        let temp = TempDir::new().unwrap();
        assert!(list_tree(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_list_tree_json_shape() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "").unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();
        fs::write(temp.path().join("dir/b.txt"), "").unwrap();

        let tree = list_tree(temp.path()).unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "a.txt": null, "dir": { "b.txt": null } })
        );
    }

    #[test]
    fn test_list_tree_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = list_tree(&temp.path().join("missing"));
        assert!(matches!(result, Err(FileError::NotFound(_))));
    }

    #[test]
    fn test_list_tree_file_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, "").unwrap();
        assert!(matches!(list_tree(&file), Err(FileError::NotADirectory(_))));
    }
}
