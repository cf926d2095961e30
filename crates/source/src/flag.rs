//! Per-source progress flag, persisted as a one-integer file.

use acctmerge_core::{AcctError, AcctResult};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// File name of the flag inside an update directory.
pub const FLAG_FILE: &str = "flag";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressFlag {
    /// No flag file, or an explicit `0`.
    Unprocessed = 0,
    Pending = 1,
    Processed = 2,
}

impl ProgressFlag {
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(ProgressFlag::Unprocessed),
            1 => Some(ProgressFlag::Pending),
            2 => Some(ProgressFlag::Processed),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ProgressFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Reads the flag in `dir`. A missing file means [`ProgressFlag::Unprocessed`].
pub fn read_flag(dir: &Path) -> AcctResult<ProgressFlag> {
    let path = dir.join(FLAG_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ProgressFlag::Unprocessed)
        }
        Err(e) => return Err(AcctError::io(path, e)),
    };

    // Only the first line counts.
    let first = content.lines().next().unwrap_or("").trim();
    first
        .parse::<u8>()
        .ok()
        .and_then(ProgressFlag::from_value)
        .ok_or_else(|| AcctError::InvalidFlag {
            path,
            value: first.to_string(),
        })
}

pub fn write_flag(dir: &Path, flag: ProgressFlag) -> AcctResult<()> {
    let path = dir.join(FLAG_FILE);
    std::fs::write(&path, flag.to_string()).map_err(|e| AcctError::io(path, e))
}
