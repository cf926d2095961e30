//! Copying the live account files into the working directory and back.

use acctmerge_core::{AccountFile, AccountFiles, AcctError, AcctResult};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Fails unless `dir` exists and is a directory.
pub fn ensure_workdir(dir: &Path) -> AcctResult<()> {
    let meta = fs::metadata(dir).map_err(|e| AcctError::io(dir, e))?;
    if !meta.is_dir() {
        return Err(AcctError::io(
            dir,
            io::Error::new(io::ErrorKind::Other, "not a directory"),
        ));
    }
    Ok(())
}

/// Copies `live_dir/{passwd,group,shadow}` to `snapshot`.
///
/// `fs::copy` carries the source permissions over, so the shadow copy stays
/// as restricted as the live file.
pub fn snapshot_live(live_dir: &Path, snapshot: &AccountFiles) -> AcctResult<()> {
    for file in AccountFile::ALL {
        let from = live_dir.join(file.name());
        let to = snapshot.get(file);
        fs::copy(&from, to).map_err(|e| AcctError::io(&from, e))?;
        tracing::info!(file = %file, to = %to.display(), "copied live account file");
    }
    Ok(())
}

/// Replaces `live_dir/{passwd,group,shadow}` with the merged files.
///
/// All three replacements are staged as sibling temp files carrying the live
/// file's mode and owner before any of them is renamed into place, so a
/// failure while staging leaves every live file untouched.
pub fn promote(merged: &AccountFiles, live_dir: &Path) -> AcctResult<()> {
    let mut staged = Vec::with_capacity(AccountFile::ALL.len());
    for file in AccountFile::ALL {
        let to = live_dir.join(file.name());
        let tmp = staging_path(live_dir, file);
        if let Err(e) = stage(merged.get(file), &to, &tmp) {
            let _ = fs::remove_file(&tmp);
            for (tmp, _) in &staged {
                let _ = fs::remove_file(tmp);
            }
            return Err(e);
        }
        staged.push((tmp, to));
    }

    for (i, (tmp, to)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(tmp, to) {
            for (tmp, _) in &staged[i..] {
                let _ = fs::remove_file(tmp);
            }
            return Err(AcctError::io(to, e));
        }
        tracing::info!(to = %to.display(), "promoted merged account file");
    }
    Ok(())
}

/// `live_dir/.<name>.acctmerge`
pub fn staging_path(live_dir: &Path, file: AccountFile) -> PathBuf {
    live_dir.join(format!(".{}.acctmerge", file.name()))
}

fn stage(from: &Path, to: &Path, tmp: &Path) -> AcctResult<()> {
    let live = match fs::metadata(to) {
        Ok(meta) if !meta.is_file() => {
            return Err(AcctError::io(
                to,
                io::Error::new(io::ErrorKind::Other, "not a regular file"),
            ))
        }
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(AcctError::io(to, e)),
    };

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    let mut src = File::open(from).map_err(|e| AcctError::io(from, e))?;
    let mut dst = opts.open(tmp).map_err(|e| AcctError::io(tmp, e))?;
    io::copy(&mut src, &mut dst).map_err(|e| AcctError::io(tmp, e))?;
    dst.sync_all().map_err(|e| AcctError::io(tmp, e))?;

    if let Some(meta) = live {
        fs::set_permissions(tmp, meta.permissions()).map_err(|e| AcctError::io(tmp, e))?;
        #[cfg(unix)]
        copy_owner(tmp, &meta)?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_owner(path: &Path, live: &fs::Metadata) -> AcctResult<()> {
    use std::os::unix::fs::MetadataExt;

    let current = fs::metadata(path).map_err(|e| AcctError::io(path, e))?;
    if current.uid() == live.uid() && current.gid() == live.gid() {
        return Ok(());
    }
    std::os::unix::fs::chown(path, Some(live.uid()), Some(live.gid()))
        .map_err(|e| AcctError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_live(dir: &Path) {
        fs::write(dir.join("passwd"), "root:x:0:0:root:/root:/bin/bash\n").unwrap();
        fs::write(dir.join("group"), "root:x:0:\n").unwrap();
        fs::write(dir.join("shadow"), "root:*:19000:0:99999:7:::\n").unwrap();
    }

    #[test]
    fn snapshot_copies_all_three() {
        let live = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        write_live(live.path());

        let snap = AccountFiles::work_copy(work.path(), "orig");
        snapshot_live(live.path(), &snap).unwrap();
        assert_eq!(
            fs::read_to_string(&snap.group).unwrap(),
            "root:x:0:\n"
        );
        assert!(snap.shadow.exists());
    }

    #[test]
    fn snapshot_fails_when_live_file_missing() {
        let live = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        fs::write(live.path().join("passwd"), "").unwrap();

        let snap = AccountFiles::work_copy(work.path(), "orig");
        assert!(matches!(
            snapshot_live(live.path(), &snap),
            Err(AcctError::Io { .. })
        ));
    }

    #[test]
    fn promote_overwrites_live_files() {
        let live = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        write_live(live.path());

        let merged = AccountFiles::work_copy(work.path(), "merged");
        fs::write(&merged.passwd, "alice:x:1001:1001::/home/alice:/bin/sh\n").unwrap();
        fs::write(&merged.group, "alice:x:1001:\n").unwrap();
        fs::write(&merged.shadow, "alice:*:19000:0:99999:7:::\n").unwrap();

        promote(&merged, live.path()).unwrap();
        assert_eq!(
            fs::read_to_string(live.path().join("passwd")).unwrap(),
            "alice:x:1001:1001::/home/alice:/bin/sh\n"
        );
        for file in AccountFile::ALL {
            assert!(!staging_path(live.path(), file).exists());
        }
    }

    #[cfg(unix)]
    #[test]
    fn promote_keeps_live_mode() {
        use std::os::unix::fs::PermissionsExt;

        let live = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        write_live(live.path());
        let live_shadow = live.path().join("shadow");
        fs::set_permissions(&live_shadow, fs::Permissions::from_mode(0o640)).unwrap();

        let merged = AccountFiles::work_copy(work.path(), "merged");
        fs::write(&merged.passwd, "").unwrap();
        fs::write(&merged.group, "").unwrap();
        fs::write(&merged.shadow, "alice:*:19000:0:99999:7:::\n").unwrap();
        fs::set_permissions(&merged.shadow, fs::Permissions::from_mode(0o644)).unwrap();

        promote(&merged, live.path()).unwrap();
        let mode = fs::metadata(&live_shadow).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert_eq!(
            fs::read_to_string(&live_shadow).unwrap(),
            "alice:*:19000:0:99999:7:::\n"
        );
    }

    #[test]
    fn promote_onto_non_file_touches_nothing() {
        let live = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        write_live(live.path());
        fs::remove_file(live.path().join("group")).unwrap();
        fs::create_dir(live.path().join("group")).unwrap();

        let merged = AccountFiles::work_copy(work.path(), "merged");
        fs::write(&merged.passwd, "alice:x:1001:1001::/home/alice:/bin/sh\n").unwrap();
        fs::write(&merged.group, "alice:x:1001:\n").unwrap();
        fs::write(&merged.shadow, "alice:*:19000:0:99999:7:::\n").unwrap();

        assert!(matches!(
            promote(&merged, live.path()),
            Err(AcctError::Io { .. })
        ));
        assert_eq!(
            fs::read_to_string(live.path().join("passwd")).unwrap(),
            "root:x:0:0:root:/root:/bin/bash\n"
        );
        for file in AccountFile::ALL {
            assert!(!staging_path(live.path(), file).exists());
        }
    }

    #[test]
    fn workdir_must_be_a_directory() {
        let work = tempfile::tempdir().unwrap();
        assert!(ensure_workdir(work.path()).is_ok());

        let file = work.path().join("plain");
        fs::write(&file, "").unwrap();
        assert!(ensure_workdir(&file).is_err());
        assert!(ensure_workdir(&work.path().join("missing")).is_err());
    }
}
