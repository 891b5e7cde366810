//! Scenario-level integration tests built around the pure decision functions the upload
//! orchestrator and the reconnect state machine are built on, rather than a live SSH session:
//! `upload::diff_tree` takes already-fetched remote state, `session::decide_reconnect_step` is
//! a pure function of attempt count and the configured attempt ceiling, and
//! `upload::full_package_step_order` describes the full-package path's control flow as data.

use std::collections::HashSet;

use avconsole_toolkit::archive::Manifest;
use avconsole_toolkit::session::{decide_reconnect_step, ReconnectStep};
use avconsole_toolkit::upload::{self, ChangeKind, FullPackageStep, PackageKind, UploadOptions};

fn temp_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("act-scenario-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn scenario_empty_diff_when_remote_hash_matches_local_content() {
    let dir = temp_dir("empty-diff");
    std::fs::write(dir.join("app.bin"), b"version-1").unwrap();
    let hash = Manifest::hash_file(&dir.join("app.bin")).unwrap();

    let remote_files: HashSet<String> = ["app.bin".to_string()].into_iter().collect();
    let mut manifest = Manifest::default();
    manifest.entries.insert("app.bin".to_string(), hash);

    let changes = upload::diff_tree(&dir, &remote_files, &manifest, |_| None).unwrap();
    assert!(changes.is_empty(), "identical content with a matching manifest hash should report no changes");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn scenario_mtime_tolerance_boundary_at_two_seconds() {
    let dir = temp_dir("mtime-boundary");
    std::fs::write(dir.join("app.bin"), b"version-1").unwrap();
    let local_mtime = std::fs::metadata(dir.join("app.bin"))
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let remote_files: HashSet<String> = ["app.bin".to_string()].into_iter().collect();
    let manifest = Manifest::default();

    // No remote manifest: falls back to the mtime comparison. 1s apart is within the
    // 2-second tolerance and reports no change; 3s apart exceeds it.
    let within = upload::diff_tree(&dir, &remote_files, &manifest, |_| Some(local_mtime + 1)).unwrap();
    assert!(within.is_empty());

    let beyond = upload::diff_tree(&dir, &remote_files, &manifest, |_| Some(local_mtime + 3)).unwrap();
    assert_eq!(beyond.len(), 1);
    assert_eq!(beyond[0].kind, ChangeKind::Changed);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn scenario_hash_mismatch_overrides_a_close_mtime() {
    let dir = temp_dir("hash-overrides-mtime");
    std::fs::write(dir.join("app.bin"), b"version-2").unwrap();
    let local_mtime = std::fs::metadata(dir.join("app.bin"))
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let remote_files: HashSet<String> = ["app.bin".to_string()].into_iter().collect();
    let mut manifest = Manifest::default();
    manifest.entries.insert("app.bin".to_string(), "f".repeat(64));

    // The remote mtime lookup would say "identical", but a present hash entry wins: the
    // content hash differs, so this is reported Changed regardless of mtime.
    let changes = upload::diff_tree(&dir, &remote_files, &manifest, |_| Some(local_mtime)).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Changed);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn scenario_full_upload_kill_program_sequences_ip_table_before_register_and_load() {
    let opts = UploadOptions {
        slot: 3,
        program_file: "program.lpz".into(),
        changed_only: false,
        kill_program: true,
        do_not_start: false,
        no_ip_table: false,
        no_zig: false,
        verbose: false,
        force: false,
    };
    let steps = upload::full_package_step_order(PackageKind::Lpz, &opts, true, 3);

    use FullPackageStep::*;
    let clear_at = steps.iter().position(|s| *s == ClearIpTable).unwrap();
    let add_positions: Vec<usize> = steps.iter().enumerate().filter(|(_, s)| **s == AddIpTableEntry).map(|(i, _)| i).collect();
    let register_at = steps.iter().position(|s| *s == RegisterProgram).unwrap();
    let load_at = steps.iter().position(|s| *s == ProgramLoad).unwrap();

    assert_eq!(add_positions.len(), 3, "one AddIpTableEntry step per .dip entry");
    assert!(add_positions.iter().all(|p| *p > clear_at), "every entry add must come after the table is cleared");
    assert!(add_positions.iter().all(|p| *p < register_at), "entries must be added before the program is registered");
    assert!(register_at < load_at, "register must precede programLoad");
    assert_eq!(steps.first(), Some(&ConnectChannels));
    assert!(steps.contains(&KillProgram), "killProgram=true must issue the kill step");
}

#[test]
fn scenario_reconnect_gives_up_once_bounded_attempts_are_exhausted() {
    let max_attempts = 7;
    for attempt in 1..max_attempts {
        assert_eq!(decide_reconnect_step(attempt, max_attempts), ReconnectStep::Retry);
    }
    assert_eq!(decide_reconnect_step(max_attempts as u32, max_attempts), ReconnectStep::GiveUpExhausted);
}

#[test]
fn scenario_reconnect_disabled_never_retries_even_on_first_attempt() {
    assert_eq!(decide_reconnect_step(1, 0), ReconnectStep::GiveUpDisabled);
}
