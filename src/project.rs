//! Project directory layout
//!
//! ```text
//! <project>/
//! ├── converted_documents/        corpus root
//! └── bulk_analysis/
//!     └── <slug>/                 group namespace
//!         ├── config.json
//!         ├── outputs/            map artifacts
//!         └── reduce/             reduce artifacts
//! ```

use std::path::{Path, PathBuf};

pub const CONVERTED_DIR: &str = "converted_documents";
pub const BULK_ANALYSIS_DIR: &str = "bulk_analysis";
pub const GROUP_CONFIG_FILE: &str = "config.json";
pub const OUTPUTS_DIR: &str = "outputs";
pub const REDUCE_DIR: &str = "reduce";

/// Handle on a project root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.root.join(CONVERTED_DIR)
    }

    pub fn bulk_analysis_dir(&self) -> PathBuf {
        self.root.join(BULK_ANALYSIS_DIR)
    }

    /// Namespace directory owned by one group
    pub fn group_dir(&self, slug: &str) -> PathBuf {
        self.bulk_analysis_dir().join(slug)
    }

    pub fn group_config_path(&self, slug: &str) -> PathBuf {
        self.group_dir(slug).join(GROUP_CONFIG_FILE)
    }

    pub fn group_outputs_dir(&self, slug: &str) -> PathBuf {
        self.group_dir(slug).join(OUTPUTS_DIR)
    }

    pub fn group_reduce_dir(&self, slug: &str) -> PathBuf {
        self.group_dir(slug).join(REDUCE_DIR)
    }

    /// Resolve a prompt reference (relative to the project, absolute accepted)
    pub fn resolve_reference(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
