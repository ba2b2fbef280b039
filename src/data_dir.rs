use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the directory created under the system temp dir by default.
pub const DEFAULT_DIR_NAME: &str = "docsift_sessions";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the sessions root from, in order of priority:
    /// 1. An explicit path (from --sessions-dir)
    /// 2. The DOCSIFT_SESSIONS_DIR environment variable
    /// 3. `docsift_sessions` under the system temp directory
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("DOCSIFT_SESSIONS_DIR") {
            PathBuf::from(val)
        } else {
            std::env::temp_dir().join(DEFAULT_DIR_NAME)
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
