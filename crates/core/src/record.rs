//! Line codec for the passwd, shadow and group formats.
//!
//! Parsing keeps the original line on every record; serialization emits it
//! back unchanged unless the group member field was rewritten.

use crate::types::{Gid, GroupRecord, Members, ShadowEntry, Uid, UserRecord};
use std::fmt;
use thiserror::Error;

const SEP: char = ':';
const MEMBER_SEP: char = ',';

/// Which of the three formats a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Passwd,
    Shadow,
    Group,
}

impl RecordKind {
    /// Minimum number of colon-separated fields for a well-formed line.
    pub const fn min_fields(self) -> usize {
        match self {
            RecordKind::Passwd => 7,
            RecordKind::Shadow => 9,
            RecordKind::Group => 4,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::Passwd => "passwd",
            RecordKind::Shadow => "shadow",
            RecordKind::Group => "group",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordFormatError {
    #[error("{kind} entry has {found} fields, expected at least {required}")]
    TooFewFields {
        kind: RecordKind,
        found: usize,
        required: usize,
    },

    #[error("{kind} entry has non-numeric {field} {value:?}")]
    BadId {
        kind: RecordKind,
        field: &'static str,
        value: String,
    },
}

/// Blank lines and `#` comments carry no record.
pub fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

fn split_fields(kind: RecordKind, line: &str) -> Result<Vec<&str>, RecordFormatError> {
    let fields: Vec<&str> = line.split(SEP).collect();
    if fields.len() < kind.min_fields() {
        return Err(RecordFormatError::TooFewFields {
            kind,
            found: fields.len(),
            required: kind.min_fields(),
        });
    }
    Ok(fields)
}

fn parse_id(kind: RecordKind, field: &'static str, value: &str) -> Result<u32, RecordFormatError> {
    value.parse().map_err(|_| RecordFormatError::BadId {
        kind,
        field,
        value: value.to_string(),
    })
}

/// `name:passwd:uid:gid:gecos:home:shell`
pub fn parse_passwd(line: &str) -> Result<UserRecord, RecordFormatError> {
    let kind = RecordKind::Passwd;
    let fields = split_fields(kind, line)?;
    let uid: Uid = parse_id(kind, "uid", fields[2])?;
    let gid: Gid = parse_id(kind, "gid", fields[3])?;
    Ok(UserRecord::new(fields[0], uid, gid, line.to_string()))
}

/// `name:hash:lastchg:...`; everything after the name is opaque.
pub fn parse_shadow(line: &str) -> Result<ShadowEntry, RecordFormatError> {
    let fields = split_fields(RecordKind::Shadow, line)?;
    Ok(ShadowEntry {
        username: fields[0].to_string(),
        raw_line: line.to_string(),
    })
}

/// `name:passwd:gid:member1,member2,...`
pub fn parse_group(line: &str) -> Result<GroupRecord, RecordFormatError> {
    let kind = RecordKind::Group;
    let fields = split_fields(kind, line)?;
    let gid: Gid = parse_id(kind, "gid", fields[2])?;
    Ok(GroupRecord {
        groupname: fields[0].to_string(),
        gid,
        members: split_members(fields[3]),
        raw_line: line.to_string(),
    })
}

/// Splits a member field, dropping empty entries (`""` splits to one).
pub fn split_members(field: &str) -> Members {
    field
        .split(MEMBER_SEP)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rewrites only the member field (index 3) of a group line.
pub fn replace_members(line: &str, members: &[String]) -> String {
    let mut fields: Vec<&str> = line.split(SEP).collect();
    let joined = members.join(",");
    if fields.len() > 3 {
        fields[3] = &joined;
    }
    fields.join(":")
}

impl GroupRecord {
    /// Re-derives `raw_line` from the current member list.
    pub fn sync_raw_line(&mut self) {
        self.raw_line = replace_members(&self.raw_line, &self.members);
    }
}
