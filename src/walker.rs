use std::path::{Path, PathBuf};

use crate::error::Result;

/// A regular file found under a session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the walked root.
    pub relative_path: PathBuf,
    /// The root joined with the relative path.
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    /// The file's base name, lossily decoded.
    pub fn file_name(&self) -> String {
        self.relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Recursively walk a directory and return every regular file below it.
///
/// Symlinks are not followed, so a session never reaches outside its own
/// directory. Results are sorted by relative path, which gives loads a
/// stable order across platforms.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let mut results = Vec::new();
    walk_dir(root, root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_file() {
            let relative_path =
                path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            results.push(DiscoveredFile {
                relative_path,
                absolute_path: path,
            });
        }
    }

    Ok(())
}
