//! The delta change-set planner: decides which local files are new or
//! changed relative to the remote program directory, using the remote hash manifest when
//! present and falling back to a 2-second mtime tolerance otherwise.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::archive::manifest::Manifest;
use crate::error::Result;
use crate::session::HostSession;

const MTIME_TOLERANCE_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Changed,
}

#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub relative_path: String,
    pub local_path: PathBuf,
    pub kind: ChangeKind,
}

/// Every local file under `local_root`, unconditionally marked `New` — used for the
/// `uploadAllFiles` branch of the delta path.
pub fn all_files_as_changes(local_root: &Path) -> Result<Vec<PlannedChange>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(local_root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(local_root).unwrap_or(entry.path());
        out.push(PlannedChange {
            relative_path: rel.to_string_lossy().replace('\\', "/"),
            local_path: entry.path().to_path_buf(),
            kind: ChangeKind::New,
        });
    }
    Ok(out)
}

/// Compare the local extracted tree against the remote program directory, using the remote
/// `.act.hash` manifest when present (case-insensitive hash comparison) and a 2-second mtime
/// tolerance otherwise.
pub fn plan_delta(session: &HostSession, local_root: &Path, remote_path: &str) -> Result<Vec<PlannedChange>> {
    let remote_files: HashSet<String> = session
        .list_files_recursive(remote_path)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.eq_ignore_ascii_case(".act.hash"))
        .collect();

    let remote_manifest_path = format!("{}/.act.hash", remote_path);
    let remote_hashes = if session.exists(&remote_manifest_path).unwrap_or(false) {
        let tmp = std::env::temp_dir().join(format!("act-remote-hash-{}", uuid::Uuid::new_v4()));
        if session.download_file(&remote_manifest_path, &tmp).is_ok() {
            let text = std::fs::read_to_string(&tmp).unwrap_or_default();
            let _ = std::fs::remove_file(&tmp);
            Manifest::parse(&text)
        } else {
            Manifest::default()
        }
    } else {
        Manifest::default()
    };

    diff_tree(local_root, &remote_files, &remote_hashes, |rel_str| {
        let remote_path_full = format!("{}/{}", remote_path, rel_str);
        session.stat_mtime(&remote_path_full).ok().flatten()
    })
}

/// The pure decision half of `plan_delta`: given the remote file listing, the remote hash
/// manifest, and a remote-mtime lookup (network I/O in production, a plain closure in tests),
/// decide which local files are `New` or `Changed`. `plan_delta` is a thin wrapper that fetches
/// the remote state over SFTP and forwards here.
pub fn diff_tree(
    local_root: &Path,
    remote_files: &HashSet<String>,
    remote_hashes: &Manifest,
    remote_mtime: impl Fn(&str) -> Option<i64>,
) -> Result<Vec<PlannedChange>> {
    let mut changes = Vec::new();
    for entry in walkdir::WalkDir::new(local_root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(local_root).unwrap_or(entry.path());
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str.eq_ignore_ascii_case(".act.hash") {
            continue;
        }

        if !remote_files.contains(&rel_str) {
            changes.push(PlannedChange { relative_path: rel_str, local_path: entry.path().to_path_buf(), kind: ChangeKind::New });
            continue;
        }

        if let Some(remote_hash) = remote_hashes.get(&rel_str) {
            let local_hash = Manifest::hash_file(entry.path())?;
            if !local_hash.eq_ignore_ascii_case(remote_hash) {
                changes.push(PlannedChange {
                    relative_path: rel_str,
                    local_path: entry.path().to_path_buf(),
                    kind: ChangeKind::Changed,
                });
            }
            continue;
        }

        let local_mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let remote_mtime_val = remote_mtime(&rel_str).unwrap_or(local_mtime);
        if (local_mtime - remote_mtime_val).abs() > MTIME_TOLERANCE_SECS {
            changes.push(PlannedChange { relative_path: rel_str, local_path: entry.path().to_path_buf(), kind: ChangeKind::Changed });
        }
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_files_as_changes_marks_every_file_new() {
        let dir = std::env::temp_dir().join(format!("act-plan-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(dir.join("sub"));
        std::fs::write(dir.join("a.txt"), b"hi").unwrap();
        std::fs::write(dir.join("sub").join("b.txt"), b"there").unwrap();

        let changes = all_files_as_changes(&dir).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::New));

        let _ = std::fs::remove_dir_all(&dir);
    }

    fn temp_tree(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("act-diff-test-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn empty_diff_when_hash_matches_and_file_is_known() {
        let dir = temp_tree("empty");
        std::fs::write(dir.join("a.txt"), b"hello").unwrap();
        let hash = Manifest::hash_file(&dir.join("a.txt")).unwrap();

        let remote_files: HashSet<String> = ["a.txt".to_string()].into_iter().collect();
        let mut manifest = Manifest::default();
        manifest.entries.insert("a.txt".to_string(), hash);

        let changes = diff_tree(&dir, &remote_files, &manifest, |_| None).unwrap();
        assert!(changes.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn mtime_within_tolerance_reports_no_change() {
        let dir = temp_tree("mtime-close");
        std::fs::write(dir.join("a.txt"), b"hello").unwrap();
        let local_mtime = std::fs::metadata(dir.join("a.txt"))
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;

        let remote_files: HashSet<String> = ["a.txt".to_string()].into_iter().collect();
        let manifest = Manifest::default();

        let changes = diff_tree(&dir, &remote_files, &manifest, |_| Some(local_mtime + 1)).unwrap();
        assert!(changes.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn mtime_beyond_tolerance_reports_changed() {
        let dir = temp_tree("mtime-far");
        std::fs::write(dir.join("a.txt"), b"hello").unwrap();
        let local_mtime = std::fs::metadata(dir.join("a.txt"))
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;

        let remote_files: HashSet<String> = ["a.txt".to_string()].into_iter().collect();
        let manifest = Manifest::default();

        let changes = diff_tree(&dir, &remote_files, &manifest, |_| Some(local_mtime + 10)).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Changed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn hash_mismatch_overrides_close_mtime() {
        let dir = temp_tree("hash-wins");
        std::fs::write(dir.join("a.txt"), b"hello").unwrap();

        let remote_files: HashSet<String> = ["a.txt".to_string()].into_iter().collect();
        let mut manifest = Manifest::default();
        manifest.entries.insert("a.txt".to_string(), "0000000000000000000000000000000000000000000000000000000000000000".to_string());

        // Even with a remote mtime lookup that would report "close enough", a present hash
        // entry takes priority and a mismatch is reported as Changed.
        let changes = diff_tree(&dir, &remote_files, &manifest, |_| Some(0)).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Changed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn new_file_not_on_remote_is_reported_new() {
        let dir = temp_tree("new-file");
        std::fs::write(dir.join("a.txt"), b"hello").unwrap();

        let remote_files: HashSet<String> = HashSet::new();
        let manifest = Manifest::default();

        let changes = diff_tree(&dir, &remote_files, &manifest, |_| None).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::New);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
