//! Update-source abstraction, progress flags, and live-file snapshots.

pub mod directory;
pub mod flag;
pub mod snapshot;

use acctmerge_core::{AcctResult, AccountFiles};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use directory::DirectoryProvider;
pub use flag::ProgressFlag;

/// Basenames of the master account files inside each update directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterFileNames {
    pub passwd: String,
    pub group: String,
    pub shadow: String,
}

impl MasterFileNames {
    pub fn resolve(&self, dir: &Path) -> AccountFiles {
        AccountFiles::new(
            dir.join(&self.passwd),
            dir.join(&self.group),
            dir.join(&self.shadow),
        )
    }
}

impl Default for MasterFileNames {
    fn default() -> Self {
        Self {
            passwd: "passwd".into(),
            group: "group".into(),
            shadow: "shadow".into(),
        }
    }
}

/// One master snapshot waiting to be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSource {
    /// Directory name, used as the source label in logs and the audit trail.
    pub name: String,
    pub dir: PathBuf,
    pub files: AccountFiles,
}

/// Abstraction for enumerating update sources and tracking their progress.
pub trait SourceProvider {
    /// Sources in the order they must be merged.
    fn sources(&self) -> AcctResult<Vec<UpdateSource>>;
    fn progress(&self, source: &UpdateSource) -> AcctResult<ProgressFlag>;
    fn set_progress(&self, source: &UpdateSource, flag: ProgressFlag) -> AcctResult<()>;
}
