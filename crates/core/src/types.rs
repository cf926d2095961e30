//! Domain types for account reconciliation.

use crate::error::AcctError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub type Uid = u32;
pub type Gid = u32;

/// Lowest uid of a regular (human) account. Anything below is a system account.
pub const REGULAR_UID_MIN: Uid = 1000;

/// Group member list. Most groups have a handful of members, so
/// `SmallVec<[String; 4]>` keeps them inline.
pub type Members = SmallVec<[String; 4]>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One passwd entry. `raw_line` is emitted verbatim on save, so fields the
/// model does not interpret (gecos, home, shell) survive untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub uid: Uid,
    pub primary_gid: Gid,
    /// Every gid the user belongs to; always contains `primary_gid`.
    pub groups: BTreeSet<Gid>,
    pub raw_line: String,
}

impl UserRecord {
    pub fn new(username: impl Into<String>, uid: Uid, primary_gid: Gid, raw_line: String) -> Self {
        Self {
            username: username.into(),
            uid,
            primary_gid,
            groups: BTreeSet::from([primary_gid]),
            raw_line,
        }
    }

    pub fn is_system(&self) -> bool {
        self.uid < REGULAR_UID_MIN
    }
}

/// Opaque credential line keyed by username. Hash internals are never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowEntry {
    pub username: String,
    pub raw_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub groupname: String,
    pub gid: Gid,
    /// Member usernames in file order. Empty entries are dropped at parse time;
    /// duplicates and unknown names are carried as-is.
    pub members: Members,
    pub raw_line: String,
}

// ---------------------------------------------------------------------------
// File triple
// ---------------------------------------------------------------------------

/// The three account files, in the order they are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountFile {
    Passwd,
    Group,
    Shadow,
}

impl AccountFile {
    pub const ALL: [AccountFile; 3] = [AccountFile::Passwd, AccountFile::Group, AccountFile::Shadow];

    /// Conventional basename, as found under `/etc`.
    pub fn name(self) -> &'static str {
        match self {
            AccountFile::Passwd => "passwd",
            AccountFile::Group => "group",
            AccountFile::Shadow => "shadow",
        }
    }
}

impl fmt::Display for AccountFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Paths of one passwd/group/shadow triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFiles {
    pub passwd: PathBuf,
    pub group: PathBuf,
    pub shadow: PathBuf,
}

impl AccountFiles {
    pub fn new(
        passwd: impl Into<PathBuf>,
        group: impl Into<PathBuf>,
        shadow: impl Into<PathBuf>,
    ) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
            shadow: shadow.into(),
        }
    }

    /// The conventional basenames (`passwd`, `group`, `shadow`) under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("passwd"), dir.join("group"), dir.join("shadow"))
    }

    /// Working-copy names: `local_passwd.<suffix>` etc. under `dir`.
    pub fn work_copy(dir: &Path, suffix: &str) -> Self {
        let path = |f: AccountFile| dir.join(format!("local_{}.{}", f.name(), suffix));
        Self::new(
            path(AccountFile::Passwd),
            path(AccountFile::Group),
            path(AccountFile::Shadow),
        )
    }

    pub fn get(&self, file: AccountFile) -> &Path {
        match file {
            AccountFile::Passwd => &self.passwd,
            AccountFile::Group => &self.group,
            AccountFile::Shadow => &self.shadow,
        }
    }
}

// ---------------------------------------------------------------------------
// Group alias pair
// ---------------------------------------------------------------------------

/// The two groupnames that are allowed to share one gid.
///
/// Exactly two names, never a general alias list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAliasPair([String; 2]);

impl GroupAliasPair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Result<Self, AcctError> {
        let (first, second) = (first.into(), second.into());
        if first.is_empty() || second.is_empty() || first == second {
            return Err(AcctError::InvalidInput(format!(
                "alias groups must be two distinct names, got {first:?} and {second:?}"
            )));
        }
        Ok(Self([first, second]))
    }

    pub fn contains(&self, groupname: &str) -> bool {
        self.0.iter().any(|n| n == groupname)
    }
}

impl Default for GroupAliasPair {
    fn default() -> Self {
        Self(["cuuser".to_string(), "cuuser2".to_string()])
    }
}

impl FromStr for GroupAliasPair {
    type Err = AcctError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [a, b] => Self::new(*a, *b),
            _ => Err(AcctError::InvalidInput(format!(
                "expected two comma-separated group names, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for GroupAliasPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.0[0], self.0[1])
    }
}

// ---------------------------------------------------------------------------
// Merge outcomes
// ---------------------------------------------------------------------------

/// Result of offering one user to a database.
///
/// Reason codes are `<name known><id known>-<what happened>`, so `10-...`
/// means the username exists but the uid does not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UserOutcome {
    /// Same name, same regular uid: passwd and shadow lines replaced.
    Updated,
    /// Same name, same uid, but the uid belongs to a system account.
    SystemAccountProtected,
    /// Same name, different uid.
    UidMismatch { existing: Uid },
    /// New name, uid already owned by someone else.
    UidCollision { owner: String },
    /// New name, new uid.
    Inserted,
}

impl UserOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, UserOutcome::Updated | UserOutcome::Inserted)
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            UserOutcome::Updated => "11-updated",
            UserOutcome::SystemAccountProtected => "11-system-account",
            UserOutcome::UidMismatch { .. } => "10-existing-user-new-uid",
            UserOutcome::UidCollision { .. } => "01-new-user-existing-uid",
            UserOutcome::Inserted => "00-new-user-new-uid",
        }
    }
}

/// Result of offering one group to a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// Same name, same gid: member list replaced by the incoming one.
    MembersReplaced,
    /// Same name, different gid.
    GidMismatch { existing: Gid },
    /// Alias name on a shared gid: members appended to the owning group.
    AliasMerged { into: String },
    /// New name, gid already owned by a non-alias group.
    GidCollision { owner: String },
    /// New name, new gid.
    Inserted,
}

impl GroupOutcome {
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            GroupOutcome::MembersReplaced | GroupOutcome::AliasMerged { .. } | GroupOutcome::Inserted
        )
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            GroupOutcome::MembersReplaced => "11-members-replaced",
            GroupOutcome::GidMismatch { .. } => "10-existing-group-new-gid",
            GroupOutcome::AliasMerged { .. } => "01-alias-merged",
            GroupOutcome::GidCollision { .. } => "01-new-group-existing-gid",
            GroupOutcome::Inserted => "00-new-group-new-gid",
        }
    }
}

// ---------------------------------------------------------------------------
// Audit decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Group,
}

/// One accept/reject decision, as written to the run's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub source: String,
    pub entity: EntityKind,
    pub name: String,
    pub id: u32,
    pub accepted: bool,
    pub reason: &'static str,
}

/// Reason code for a user dropped from a merge because it has no shadow entry.
pub const MISSING_CREDENTIAL: &str = "missing-shadow";

impl Decision {
    pub fn user(source: &str, user: &UserRecord, outcome: &UserOutcome) -> Self {
        Self {
            source: source.to_string(),
            entity: EntityKind::User,
            name: user.username.clone(),
            id: user.uid,
            accepted: outcome.accepted(),
            reason: outcome.reason_code(),
        }
    }

    pub fn group(source: &str, group: &GroupRecord, outcome: &GroupOutcome) -> Self {
        Self {
            source: source.to_string(),
            entity: EntityKind::Group,
            name: group.groupname.clone(),
            id: group.gid,
            accepted: outcome.accepted(),
            reason: outcome.reason_code(),
        }
    }

    pub fn missing_credential(source: &str, user: &UserRecord) -> Self {
        Self {
            source: source.to_string(),
            entity: EntityKind::User,
            name: user.username.clone(),
            id: user.uid,
            accepted: false,
            reason: MISSING_CREDENTIAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_pair_parses_two_names() {
        let pair: GroupAliasPair = "staff, staff2".parse().unwrap();
        assert!(pair.contains("staff"));
        assert!(pair.contains("staff2"));
        assert!(!pair.contains("wheel"));
        assert_eq!(pair.to_string(), "staff,staff2");
    }

    #[test]
    fn alias_pair_rejects_wrong_arity_and_duplicates() {
        assert!("a".parse::<GroupAliasPair>().is_err());
        assert!("a,b,c".parse::<GroupAliasPair>().is_err());
        assert!("a,a".parse::<GroupAliasPair>().is_err());
        assert!("a,".parse::<GroupAliasPair>().is_err());
    }

    #[test]
    fn outcome_acceptance() {
        assert!(UserOutcome::Updated.accepted());
        assert!(UserOutcome::Inserted.accepted());
        assert!(!UserOutcome::SystemAccountProtected.accepted());
        assert!(!UserOutcome::UidMismatch { existing: 5 }.accepted());
        assert!(!UserOutcome::UidCollision { owner: "x".into() }.accepted());

        assert!(GroupOutcome::AliasMerged { into: "cuuser".into() }.accepted());
        assert!(!GroupOutcome::GidCollision { owner: "x".into() }.accepted());
        assert!(!GroupOutcome::GidMismatch { existing: 1 }.accepted());
    }

    #[test]
    fn work_copy_names() {
        let files = AccountFiles::work_copy(Path::new("/w"), "merged");
        assert_eq!(files.passwd, PathBuf::from("/w/local_passwd.merged"));
        assert_eq!(files.get(AccountFile::Shadow), Path::new("/w/local_shadow.merged"));
    }
}
