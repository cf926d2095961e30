//! Update sources laid out as subdirectories of the working directory.

use crate::flag::{self, ProgressFlag};
use crate::{MasterFileNames, SourceProvider, UpdateSource};
use acctmerge_core::{AcctError, AcctResult};
use std::path::PathBuf;

/// Treats every non-hidden subdirectory of `root` as one update source.
///
/// ```ignore
/// let provider = DirectoryProvider::new("/root/accounts", MasterFileNames::default());
/// for source in provider.sources()? { ... }
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
    names: MasterFileNames,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>, names: MasterFileNames) -> Self {
        Self {
            root: root.into(),
            names,
        }
    }
}

impl SourceProvider for DirectoryProvider {
    /// Sorted by directory name, so date-stamped directories merge oldest first.
    fn sources(&self) -> AcctResult<Vec<UpdateSource>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| AcctError::io(&self.root, e))?;

        let mut sources = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AcctError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            sources.push(UpdateSource {
                files: self.names.resolve(&dir),
                name,
                dir,
            });
        }
        sources.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::debug!(root = %self.root.display(), count = sources.len(), "discovered update sources");
        Ok(sources)
    }

    fn progress(&self, source: &UpdateSource) -> AcctResult<ProgressFlag> {
        flag::read_flag(&source.dir)
    }

    fn set_progress(&self, source: &UpdateSource, flag: ProgressFlag) -> AcctResult<()> {
        flag::write_flag(&source.dir, flag)?;
        tracing::info!(source = %source.name, flag = flag.value(), "progress flag updated");
        Ok(())
    }
}
