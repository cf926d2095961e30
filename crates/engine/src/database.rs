//! In-memory account database built from one passwd/group/shadow triple.
//!
//! Loading enforces the model invariants:
//!   - one username per uid and one uid per username, first occurrence wins;
//!   - one groupname per gid, first occurrence wins, except that the two
//!     alias groupnames may share a gid;
//!   - shadow entries exist only for known users.
//!
//! Mutation goes through the merge operations in [`crate::merge`].

use acctmerge_core::record::{self, RecordFormatError};
use acctmerge_core::{
    AccountFile, AccountFiles, AcctError, AcctResult, Gid, GroupAliasPair, GroupRecord,
    ShadowEntry, Uid, UserRecord,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Counters collected while loading one file triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub users: usize,
    pub shadows: usize,
    pub groups: usize,
    /// Lines rejected for a format error (too few fields, non-numeric id,
    /// invalid UTF-8).
    pub skipped_lines: usize,
    pub duplicate_users: usize,
    pub duplicate_uids: usize,
    pub duplicate_shadows: usize,
    pub orphan_shadows: usize,
    pub duplicate_groups: usize,
    pub duplicate_gids: usize,
    pub unknown_members: usize,
}

/// Serialized form of a database: the three file bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFiles {
    pub passwd: String,
    pub group: String,
    pub shadow: String,
}

#[derive(Debug, Clone)]
pub struct AccountDatabase {
    label: String,
    pub(crate) users: HashMap<String, UserRecord>,
    pub(crate) uid_index: BTreeMap<Uid, String>,
    pub(crate) groups: HashMap<String, GroupRecord>,
    /// Owner of each gid. A second alias group sharing the gid lives in
    /// `groups` only.
    pub(crate) gid_index: BTreeMap<Gid, String>,
    pub(crate) shadows: HashMap<String, ShadowEntry>,
    pub(crate) aliases: GroupAliasPair,
    stats: LoadStats,
}

impl AccountDatabase {
    pub fn empty(label: impl Into<String>, aliases: GroupAliasPair) -> Self {
        Self {
            label: label.into(),
            users: HashMap::new(),
            uid_index: BTreeMap::new(),
            groups: HashMap::new(),
            gid_index: BTreeMap::new(),
            shadows: HashMap::new(),
            aliases,
            stats: LoadStats::default(),
        }
    }

    /// Loads a file triple. A missing file is read as empty; any other read
    /// failure is returned. Lines that are not valid UTF-8 are skipped and
    /// counted like malformed lines.
    pub fn load(
        label: impl Into<String>,
        files: &AccountFiles,
        aliases: GroupAliasPair,
    ) -> AcctResult<Self> {
        let label = label.into();
        tracing::info!(
            db = %label,
            passwd = %files.passwd.display(),
            group = %files.group.display(),
            shadow = %files.shadow.display(),
            "loading account database"
        );

        let (passwd, bad_passwd) = read_account_file(&files.passwd)?;
        let (group, bad_group) = read_account_file(&files.group)?;
        let (shadow, bad_shadow) = read_account_file(&files.shadow)?;

        let mut db = Self::from_contents(label, &passwd, &group, &shadow, aliases);
        db.stats.skipped_lines += bad_passwd + bad_group + bad_shadow;
        Ok(db)
    }

    /// Builds a database from the three file bodies.
    pub fn from_contents(
        label: impl Into<String>,
        passwd: &str,
        group: &str,
        shadow: &str,
        aliases: GroupAliasPair,
    ) -> Self {
        let mut db = Self::empty(label, aliases);

        for line in passwd.lines().filter(|l| !record::is_skippable(l)) {
            match record::parse_passwd(line) {
                Ok(user) => db.load_user(user),
                Err(e) => db.skip_line(AccountFile::Passwd, line, e),
            }
        }
        for line in shadow.lines().filter(|l| !record::is_skippable(l)) {
            match record::parse_shadow(line) {
                Ok(entry) => db.load_shadow(entry),
                Err(e) => db.skip_line(AccountFile::Shadow, line, e),
            }
        }
        for line in group.lines().filter(|l| !record::is_skippable(l)) {
            match record::parse_group(line) {
                Ok(g) => db.load_group(g),
                Err(e) => db.skip_line(AccountFile::Group, line, e),
            }
        }
        db.link_memberships();

        let s = &db.stats;
        tracing::info!(
            db = %db.label,
            users = s.users,
            shadows = s.shadows,
            groups = s.groups,
            skipped_lines = s.skipped_lines,
            "loaded account database"
        );
        db
    }

    fn skip_line(&mut self, file: AccountFile, line: &str, err: RecordFormatError) {
        // Never log the line itself: shadow lines carry password hashes.
        let name = line.split(':').next().unwrap_or_default();
        tracing::warn!(db = %self.label, file = %file, name, error = %err, "skipping malformed entry");
        self.stats.skipped_lines += 1;
    }

    fn load_user(&mut self, user: UserRecord) {
        if self.users.contains_key(&user.username) {
            tracing::warn!(db = %self.label, username = %user.username, uid = user.uid, "duplicate username; ignoring entry");
            self.stats.duplicate_users += 1;
            return;
        }
        if let Some(owner) = self.uid_index.get(&user.uid) {
            tracing::warn!(db = %self.label, username = %user.username, uid = user.uid, owner = %owner, "duplicate uid; ignoring entry");
            self.stats.duplicate_uids += 1;
            return;
        }
        self.uid_index.insert(user.uid, user.username.clone());
        self.users.insert(user.username.clone(), user);
        self.stats.users += 1;
    }

    fn load_shadow(&mut self, entry: ShadowEntry) {
        if !self.users.contains_key(&entry.username) {
            tracing::warn!(db = %self.label, username = %entry.username, "shadow entry without passwd entry; ignoring");
            self.stats.orphan_shadows += 1;
            return;
        }
        if self.shadows.contains_key(&entry.username) {
            tracing::warn!(db = %self.label, username = %entry.username, "duplicate shadow entry; ignoring");
            self.stats.duplicate_shadows += 1;
            return;
        }
        self.shadows.insert(entry.username.clone(), entry);
        self.stats.shadows += 1;
    }

    fn load_group(&mut self, group: GroupRecord) {
        if self.groups.contains_key(&group.groupname) {
            tracing::warn!(db = %self.label, group = %group.groupname, gid = group.gid, "duplicate groupname; ignoring entry");
            self.stats.duplicate_groups += 1;
            return;
        }
        match self.gid_index.get(&group.gid) {
            Some(owner)
                if self.aliases.contains(owner) && self.aliases.contains(&group.groupname) =>
            {
                tracing::debug!(db = %self.label, group = %group.groupname, gid = group.gid, owner = %owner, "alias group shares gid");
            }
            Some(owner) => {
                tracing::warn!(db = %self.label, group = %group.groupname, gid = group.gid, owner = %owner, "duplicate gid; ignoring entry");
                self.stats.duplicate_gids += 1;
                return;
            }
            None => {
                self.gid_index.insert(group.gid, group.groupname.clone());
            }
        }
        self.groups.insert(group.groupname.clone(), group);
        self.stats.groups += 1;
    }

    /// Adds each group's gid to the `groups` set of its known members.
    fn link_memberships(&mut self) {
        for group in self.groups.values() {
            for member in &group.members {
                match self.users.get_mut(member) {
                    Some(user) => {
                        user.groups.insert(group.gid);
                    }
                    None => {
                        tracing::warn!(db = %self.label, member = %member, group = %group.groupname, "unknown user in group");
                        self.stats.unknown_members += 1;
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    pub fn user(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username)
    }

    pub fn shadow(&self, username: &str) -> Option<&ShadowEntry> {
        self.shadows.get(username)
    }

    pub fn group(&self, groupname: &str) -> Option<&GroupRecord> {
        self.groups.get(groupname)
    }

    pub fn uid_owner(&self, uid: Uid) -> Option<&str> {
        self.uid_index.get(&uid).map(String::as_str)
    }

    pub fn gid_owner(&self, gid: Gid) -> Option<&str> {
        self.gid_index.get(&gid).map(String::as_str)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Users in ascending uid order.
    pub fn users_by_uid(&self) -> impl Iterator<Item = &UserRecord> + '_ {
        self.uid_index.values().filter_map(|name| self.users.get(name))
    }

    /// Groups in ascending gid order; the gid owner precedes an alias sharing it.
    pub fn groups_by_gid(&self) -> Vec<&GroupRecord> {
        let mut groups: Vec<&GroupRecord> = self.groups.values().collect();
        groups.sort_by(|a, b| {
            (a.gid, !self.owns_gid(a), &a.groupname).cmp(&(b.gid, !self.owns_gid(b), &b.groupname))
        });
        groups
    }

    fn owns_gid(&self, group: &GroupRecord) -> bool {
        self.gid_index.get(&group.gid) == Some(&group.groupname)
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Renders the three files, users and shadows by uid, groups by gid.
    pub fn render(&self) -> RenderedFiles {
        let mut passwd = String::new();
        let mut shadow = String::new();
        for user in self.users_by_uid() {
            push_line(&mut passwd, &user.raw_line);
            if let Some(entry) = self.shadows.get(&user.username) {
                push_line(&mut shadow, &entry.raw_line);
            }
        }

        let mut group = String::new();
        for g in self.groups_by_gid() {
            push_line(&mut group, &g.raw_line);
        }

        RenderedFiles {
            passwd,
            group,
            shadow,
        }
    }

    /// Writes the rendered files to `out`. Each file is written to a
    /// temporary sibling and renamed into place.
    pub fn save(&self, out: &AccountFiles) -> AcctResult<()> {
        let rendered = self.render();
        write_atomic(&out.passwd, &rendered.passwd)?;
        write_atomic(&out.group, &rendered.group)?;
        write_atomic(&out.shadow, &rendered.shadow)?;
        tracing::info!(db = %self.label, passwd = %out.passwd.display(), "saved account database");
        Ok(())
    }
}

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
}

/// Reads a file and decodes it line by line, so one undecodable line does
/// not take the rest of the file with it. Returns the decodable text and the
/// number of lines dropped.
fn read_account_file(path: &Path) -> AcctResult<(String, usize)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "account file missing; treating as empty");
            return Ok((String::new(), 0));
        }
        Err(e) => return Err(AcctError::io(path, e)),
    };

    let mut content = String::with_capacity(bytes.len());
    let mut undecodable = 0usize;
    for (n, line) in bytes.split(|b| *b == b'\n').enumerate() {
        match std::str::from_utf8(line) {
            Ok(text) => push_line(&mut content, text),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = n + 1, error = %e, "skipping line that is not valid UTF-8");
                undecodable += 1;
            }
        }
    }
    Ok((content, undecodable))
}

fn write_atomic(path: &Path, content: &str) -> AcctResult<()> {
    let mut tmp = PathBuf::from(path);
    tmp.as_mut_os_string().push(".tmp");

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    let mut file = opts.open(&tmp).map_err(|e| AcctError::io(&tmp, e))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| AcctError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| AcctError::io(path, e))
}
