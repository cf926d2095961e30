//! Merge rules for folding an incoming database into the local one.
//!
//! Every add resolves to exactly one outcome; rejections leave the database
//! untouched for that entity and never abort the merge.

use crate::database::AccountDatabase;
use acctmerge_core::record::{self, RecordFormatError};
use acctmerge_core::{
    Decision, GroupOutcome, GroupRecord, ShadowEntry, UserOutcome, UserRecord,
};
use serde::Serialize;

/// Tally of one `merge_db` call, plus every decision taken.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeSummary {
    pub source: String,
    pub users_accepted: usize,
    pub users_rejected: usize,
    pub missing_credentials: usize,
    pub groups_accepted: usize,
    pub groups_rejected: usize,
    #[serde(skip)]
    pub decisions: Vec<Decision>,
}

impl MergeSummary {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }

    pub fn accepted(&self) -> usize {
        self.users_accepted + self.groups_accepted
    }

    pub fn rejected(&self) -> usize {
        self.users_rejected + self.missing_credentials + self.groups_rejected
    }
}

impl AccountDatabase {
    /// Offers one user with its credential line.
    pub fn add_user(&mut self, user: UserRecord, shadow_line: impl Into<String>) -> UserOutcome {
        let shadow = ShadowEntry {
            username: user.username.clone(),
            raw_line: shadow_line.into(),
        };
        let db = self.label().to_string();

        if let Some(existing) = self.users.get(&user.username) {
            if existing.uid != user.uid {
                let outcome = UserOutcome::UidMismatch {
                    existing: existing.uid,
                };
                tracing::warn!(%db, username = %user.username, uid = user.uid, existing_uid = existing.uid, reason = outcome.reason_code(), "rejected user");
                return outcome;
            }
            if existing.is_system() {
                let outcome = UserOutcome::SystemAccountProtected;
                tracing::warn!(%db, username = %user.username, uid = user.uid, reason = outcome.reason_code(), "skipping update of system account");
                return outcome;
            }

            let outcome = UserOutcome::Updated;
            tracing::info!(%db, username = %user.username, uid = user.uid, reason = outcome.reason_code(), "updated user");
            self.shadows.insert(user.username.clone(), shadow);
            self.users.insert(user.username.clone(), user);
            return outcome;
        }

        if let Some(owner) = self.uid_index.get(&user.uid) {
            let outcome = UserOutcome::UidCollision {
                owner: owner.clone(),
            };
            tracing::warn!(%db, username = %user.username, uid = user.uid, owner = %owner, reason = outcome.reason_code(), "rejected user");
            return outcome;
        }

        let outcome = UserOutcome::Inserted;
        tracing::info!(%db, username = %user.username, uid = user.uid, reason = outcome.reason_code(), "added user");
        self.uid_index.insert(user.uid, user.username.clone());
        self.shadows.insert(user.username.clone(), shadow);
        self.users.insert(user.username.clone(), user);
        outcome
    }

    /// Offers one group.
    pub fn add_group(&mut self, group: GroupRecord) -> GroupOutcome {
        let db = self.label().to_string();

        if let Some(existing) = self.groups.get_mut(&group.groupname) {
            if existing.gid != group.gid {
                let outcome = GroupOutcome::GidMismatch {
                    existing: existing.gid,
                };
                tracing::warn!(%db, group = %group.groupname, gid = group.gid, existing_gid = existing.gid, reason = outcome.reason_code(), "rejected group");
                return outcome;
            }

            // Replace, not union: the incoming list is authoritative here.
            existing.members = group.members;
            existing.raw_line = group.raw_line;
            let outcome = GroupOutcome::MembersReplaced;
            tracing::info!(%db, group = %group.groupname, gid = group.gid, reason = outcome.reason_code(), "updated group members");
            return outcome;
        }

        if let Some(owner) = self.gid_index.get(&group.gid).cloned() {
            if !self.aliases.contains(&group.groupname) {
                let outcome = GroupOutcome::GidCollision { owner };
                tracing::warn!(%db, group = %group.groupname, gid = group.gid, reason = outcome.reason_code(), "rejected group");
                return outcome;
            }

            let Some(target) = self.groups.get_mut(&owner) else {
                // Stale index entry.
                tracing::error!(%db, group = %group.groupname, gid = group.gid, owner = %owner, "gid owner missing from group table");
                return GroupOutcome::GidCollision { owner };
            };
            let mut added = 0usize;
            for member in group.members {
                if !target.members.contains(&member) {
                    target.members.push(member);
                    added += 1;
                }
            }
            if added > 0 {
                target.sync_raw_line();
            }

            let outcome = GroupOutcome::AliasMerged { into: owner };
            tracing::info!(%db, group = %group.groupname, gid = group.gid, added, reason = outcome.reason_code(), "merged alias group members");
            return outcome;
        }

        let outcome = GroupOutcome::Inserted;
        tracing::info!(%db, group = %group.groupname, gid = group.gid, reason = outcome.reason_code(), "added group");
        self.gid_index.insert(group.gid, group.groupname.clone());
        self.groups.insert(group.groupname.clone(), group);
        outcome
    }

    /// Parses a raw passwd line and offers it with the given shadow line.
    pub fn add_user_by_passwd_entry(
        &mut self,
        passwd_line: &str,
        shadow_line: &str,
    ) -> Result<UserOutcome, RecordFormatError> {
        let user = record::parse_passwd(passwd_line)?;
        Ok(self.add_user(user, shadow_line))
    }

    /// Folds `incoming` into `self`: all users (uid order), then all groups
    /// (gid order). Users without a shadow entry are skipped.
    ///
    /// Group members are carried as plain names; they are checked against the
    /// user table only when the merged files are loaded again.
    pub fn merge_db(&mut self, incoming: &AccountDatabase) -> MergeSummary {
        let source = incoming.label();
        tracing::info!(db = %self.label(), source = %source, "merging account database");
        let mut summary = MergeSummary::new(source);

        for user in incoming.users_by_uid() {
            let Some(shadow) = incoming.shadow(&user.username) else {
                tracing::error!(source = %source, username = %user.username, uid = user.uid, "no shadow entry for user; skipping");
                summary.missing_credentials += 1;
                summary.decisions.push(Decision::missing_credential(source, user));
                continue;
            };

            let outcome = self.add_user(user.clone(), shadow.raw_line.clone());
            if outcome.accepted() {
                summary.users_accepted += 1;
            } else {
                summary.users_rejected += 1;
            }
            summary.decisions.push(Decision::user(source, user, &outcome));
        }

        for group in incoming.groups_by_gid() {
            let outcome = self.add_group(group.clone());
            if outcome.accepted() {
                summary.groups_accepted += 1;
            } else {
                summary.groups_rejected += 1;
            }
            summary.decisions.push(Decision::group(source, group, &outcome));
        }

        tracing::info!(
            db = %self.label(),
            source = %source,
            accepted = summary.accepted(),
            rejected = summary.rejected(),
            "merge complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acctmerge_core::GroupAliasPair;

    const LOCAL_PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:2:2:daemon:/sbin:/sbin/nologin
alice:x:1001:1001:Alice:/home/alice:/bin/bash
carol:x:1050:1050:Carol:/home/carol:/bin/bash
";
    const LOCAL_SHADOW: &str = "\
root:*:19000:0:99999:7:::
daemon:*:19000:0:99999:7:::
alice:$1$old$alicehash:19000:0:99999:7:::
carol:$6$salt$carolhash:19000:0:99999:7:::
";
    const LOCAL_GROUP: &str = "\
root:x:0:
daemon:x:2:
alice:x:1001:
carol:x:1050:
cuuser:x:2000:alice
dev:x:3000:alice
";

    fn local() -> AccountDatabase {
        AccountDatabase::from_contents(
            "local",
            LOCAL_PASSWD,
            LOCAL_GROUP,
            LOCAL_SHADOW,
            GroupAliasPair::default(),
        )
    }

    fn incoming(passwd: &str, group: &str, shadow: &str) -> AccountDatabase {
        AccountDatabase::from_contents("update", passwd, group, shadow, GroupAliasPair::default())
    }

    fn user(line: &str) -> UserRecord {
        record::parse_passwd(line).unwrap()
    }

    fn group(line: &str) -> GroupRecord {
        record::parse_group(line).unwrap()
    }

    #[test]
    fn regular_user_update_replaces_lines() {
        let mut db = local();
        let outcome = db.add_user(
            user("alice:x:1001:1001:Alice Smith:/home/alice:/bin/zsh"),
            "alice:$6$new$alicehash:19500:0:99999:7:::",
        );
        assert_eq!(outcome, UserOutcome::Updated);
        assert!(db.user("alice").unwrap().raw_line.ends_with("/bin/zsh"));
        assert!(db.shadow("alice").unwrap().raw_line.starts_with("alice:$6$"));
    }

    #[test]
    fn system_account_is_never_overwritten() {
        let mut db = local();
        let before = db.render();
        let outcome = db.add_user(
            user("daemon:x:2:2:hijacked:/tmp:/bin/bash"),
            "daemon:$6$x$y:19500:0:99999:7:::",
        );
        assert_eq!(outcome, UserOutcome::SystemAccountProtected);
        assert!(!outcome.accepted());
        assert_eq!(db.render(), before);
    }

    #[test]
    fn same_name_different_uid_is_rejected() {
        let mut db = local();
        let before = db.render();
        let outcome = db.add_user(
            user("alice:x:1777:1001:Alice:/home/alice:/bin/bash"),
            "alice:*:1:0:99999:7:::",
        );
        assert_eq!(outcome, UserOutcome::UidMismatch { existing: 1001 });
        assert_eq!(db.render(), before);
        assert_eq!(db.uid_owner(1777), None);
    }

    #[test]
    fn new_name_on_taken_uid_is_rejected() {
        let mut db = local();
        let before = db.render();
        let outcome = db.add_user(
            user("bob:x:1050:1050:Bob:/home/bob:/bin/bash"),
            "bob:*:1:0:99999:7:::",
        );
        assert_eq!(
            outcome,
            UserOutcome::UidCollision {
                owner: "carol".into()
            }
        );
        assert!(db.user("bob").is_none());
        assert_eq!(db.uid_owner(1050), Some("carol"));
        assert_eq!(db.render(), before);
    }

    #[test]
    fn new_user_is_inserted_everywhere() {
        let mut db = local();
        let outcome = db.add_user(
            user("dave:x:1060:1060:Dave:/home/dave:/bin/bash"),
            "dave:*:1:0:99999:7:::",
        );
        assert_eq!(outcome, UserOutcome::Inserted);
        assert_eq!(db.uid_owner(1060), Some("dave"));
        assert!(db.shadow("dave").is_some());
        assert!(db.render().passwd.ends_with("dave:x:1060:1060:Dave:/home/dave:/bin/bash\n"));
    }

    #[test]
    fn add_by_passwd_entry() {
        let mut db = local();
        let outcome = db
            .add_user_by_passwd_entry("erin:x:1070:1070::/home/erin:/bin/sh", "erin:*:1:0:99999:7:::")
            .unwrap();
        assert_eq!(outcome, UserOutcome::Inserted);

        let err = db
            .add_user_by_passwd_entry("frank:x:1080", "frank:*:1:0:99999:7:::")
            .unwrap_err();
        assert!(matches!(err, RecordFormatError::TooFewFields { found: 3, .. }));
        assert!(db.user("frank").is_none());
    }

    #[test]
    fn group_same_gid_replaces_members() {
        let mut db = local();
        let outcome = db.add_group(group("dev:x:3000:carol"));
        assert_eq!(outcome, GroupOutcome::MembersReplaced);
        let dev = db.group("dev").unwrap();
        assert_eq!(dev.members.as_slice(), ["carol"]);
        assert_eq!(dev.raw_line, "dev:x:3000:carol");
    }

    #[test]
    fn group_gid_change_is_rejected() {
        let mut db = local();
        let outcome = db.add_group(group("dev:x:3001:carol"));
        assert_eq!(outcome, GroupOutcome::GidMismatch { existing: 3000 });
        assert_eq!(db.group("dev").unwrap().members.as_slice(), ["alice"]);
    }

    #[test]
    fn group_gid_collision_is_rejected() {
        let mut db = local();
        let before = db.render();
        let outcome = db.add_group(group("ops:x:3000:carol"));
        assert_eq!(outcome, GroupOutcome::GidCollision { owner: "dev".into() });
        assert!(db.group("ops").is_none());
        assert_eq!(db.render(), before);
    }

    #[test]
    fn alias_group_unions_members() {
        let mut db = local();
        let outcome = db.add_group(group("cuuser2:x:2000:bob,alice"));
        assert_eq!(
            outcome,
            GroupOutcome::AliasMerged {
                into: "cuuser".into()
            }
        );
        let cuuser = db.group("cuuser").unwrap();
        assert_eq!(cuuser.members.as_slice(), ["alice", "bob"]);
        assert_eq!(cuuser.raw_line, "cuuser:x:2000:alice,bob");
        assert!(db.group("cuuser2").is_none());
    }

    #[test]
    fn alias_merge_without_new_members_keeps_line() {
        let mut db = AccountDatabase::from_contents(
            "l",
            "alice:x:1001:1001::/home/alice:/bin/sh\n",
            "cuuser:x:2000:alice,\n",
            "alice:*:1:0:99999:7:::\n",
            GroupAliasPair::default(),
        );
        let outcome = db.add_group(group("cuuser2:x:2000:alice"));
        assert_eq!(
            outcome,
            GroupOutcome::AliasMerged {
                into: "cuuser".into()
            }
        );
        assert_eq!(db.render().group, "cuuser:x:2000:alice,\n");
    }

    #[test]
    fn custom_alias_pair_is_honoured() {
        let aliases = GroupAliasPair::new("staff", "staff2").unwrap();
        let mut db = AccountDatabase::from_contents("l", "", "staff:x:50:a\n", "", aliases);
        assert!(db.add_group(group("staff2:x:50:b")).accepted());
        assert!(!db.add_group(group("cuuser2:x:50:c")).accepted());
        assert_eq!(db.group("staff").unwrap().raw_line, "staff:x:50:a,b");
    }

    #[test]
    fn merge_scenarios() {
        let mut db = local();
        let update = incoming(
            "\
alice:x:1001:1001:Alice:/home/alice:/bin/bash
bob:x:1050:1050:Bob:/home/bob:/bin/bash
ghost:x:1090:1090:Ghost:/home/ghost:/bin/bash
",
            "cuuser2:x:2000:bob\n",
            "\
alice:$6$new$alicehash:19500:0:99999:7:::
bob:$6$salt$bobhash:19500:0:99999:7:::
",
        );

        let summary = db.merge_db(&update);
        assert!(db.shadow("alice").unwrap().raw_line.starts_with("alice:$6$"));
        assert!(db.user("bob").is_none());
        assert_eq!(db.uid_owner(1050), Some("carol"));
        assert!(db.user("ghost").is_none());
        assert_eq!(
            db.group("cuuser").unwrap().members.as_slice(),
            ["alice", "bob"]
        );

        assert_eq!(summary.users_accepted, 1);
        assert_eq!(summary.users_rejected, 1);
        assert_eq!(summary.missing_credentials, 1);
        assert_eq!(summary.groups_accepted, 1);
        assert_eq!(summary.decisions.len(), 4);
        assert!(summary
            .decisions
            .iter()
            .any(|d| d.name == "ghost" && d.reason == acctmerge_core::MISSING_CREDENTIAL));
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let update = incoming(
            "\
alice:x:1001:1001:Alice:/home/alice:/bin/zsh
dave:x:1060:1060:Dave:/home/dave:/bin/bash
",
            "dave:x:1060:\ndev:x:3000:alice,dave\n",
            "\
alice:$6$new$alicehash:19500:0:99999:7:::
dave:*:19500:0:99999:7:::
",
        );

        let mut once = local();
        once.merge_db(&update);
        let mut twice = once.clone();
        twice.merge_db(&update);
        assert_eq!(once.render(), twice.render());
    }
}
