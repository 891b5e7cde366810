//! Delta program-upload orchestrator (C4): the full-package and delta upload paths, bounded-
//! concurrency worker pool, and `indicatif` progress rendering. Built on the
//! `crossbeam-channel` worker-pool pattern and its `MultiProgress` header-bar/per-file-bar
//! rendering style.

mod plan;
mod workers;

pub use plan::{diff_tree, plan_delta, ChangeKind, PlannedChange};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressStyle;

use crate::archive::{self, manifest::Manifest};
use crate::error::{ActError, Result};
use crate::session::HostSession;
use crate::shell;
use crate::util;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub slot: u32,
    pub program_file: PathBuf,
    pub changed_only: bool,
    pub kill_program: bool,
    pub do_not_start: bool,
    pub no_ip_table: bool,
    pub no_zig: bool,
    pub verbose: bool,
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct UploadSummary {
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
    pub failures: Vec<ActError>,
    pub ip_table_entries_added: usize,
    pub no_changes: bool,
}

/// Extension of `program_file` determines the package kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Cpz,
    Clz,
    Lpz,
}

/// One step of the full-package upload path, named for what it does rather than its step
/// number so a trace of them reads like a log. `full_package_step_order` computes the ordered
/// list `run_full_package_path` follows for a given `kind`/`opts` combination — kept alongside
/// the real function as a plain description of its control flow, not a shared code path, so a
/// test can assert on step ordering without driving the whole upload path over a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPackageStep {
    ConnectChannels,
    KillProgram,
    PackageZig,
    EmbedManifest,
    ParseDip,
    EnsureRemoteDir,
    UploadProgram,
    UploadZig,
    ClearIpTable,
    AddIpTableEntry,
    RegisterProgram,
    ProgramLoad,
    Cleanup,
}

pub fn full_package_step_order(
    kind: PackageKind,
    opts: &UploadOptions,
    has_zig: bool,
    ip_table_entry_count: usize,
) -> Vec<FullPackageStep> {
    use FullPackageStep::*;
    let mut steps = vec![ConnectChannels];
    if opts.kill_program {
        steps.push(KillProgram);
    }
    let package_zig = matches!(kind, PackageKind::Lpz) && !opts.no_zig && has_zig;
    if package_zig {
        steps.push(PackageZig);
    }
    steps.push(EmbedManifest);
    if matches!(kind, PackageKind::Lpz) && !opts.no_ip_table {
        steps.push(ParseDip);
    }
    steps.push(EnsureRemoteDir);
    steps.push(UploadProgram);
    if package_zig {
        steps.push(UploadZig);
    }
    if matches!(kind, PackageKind::Lpz) && !opts.no_ip_table && ip_table_entry_count > 0 {
        steps.push(ClearIpTable);
        for _ in 0..ip_table_entry_count {
            steps.push(AddIpTableEntry);
        }
    }
    if matches!(kind, PackageKind::Lpz | PackageKind::Cpz) {
        steps.push(RegisterProgram);
    }
    steps.push(ProgramLoad);
    steps.push(Cleanup);
    steps
}

fn classify(path: &Path) -> Result<PackageKind> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    match ext.as_str() {
        "cpz" => Ok(PackageKind::Cpz),
        "clz" => Ok(PackageKind::Clz),
        "lpz" => Ok(PackageKind::Lpz),
        other => Err(ActError::UnsupportedExtension(other.to_string())),
    }
}

fn remote_path_for_slot(slot: u32) -> Result<String> {
    if !(1..=10).contains(&slot) {
        return Err(ActError::InvalidSlot(slot));
    }
    Ok(format!("program{:02}", slot))
}

/// Entry point: dispatches to the full-package or delta path per the mode-selection rule.
pub fn run_upload(session: &HostSession, opts: &UploadOptions) -> Result<UploadSummary> {
    if !opts.program_file.exists() {
        return Err(ActError::MissingFile(opts.program_file.to_string_lossy().to_string()));
    }
    let kind = classify(&opts.program_file)?;
    let remote_path = remote_path_for_slot(opts.slot)?;

    let take_delta_path = matches!(kind, PackageKind::Clz) || opts.changed_only;
    if take_delta_path {
        run_delta_path(session, opts, kind, &remote_path)
    } else {
        run_full_package_path(session, opts, kind, &remote_path)
    }
}

/// The ten-step full-package path.
fn run_full_package_path(
    session: &HostSession,
    opts: &UploadOptions,
    kind: PackageKind,
    remote_path: &str,
) -> Result<UploadSummary> {
    let mut summary = UploadSummary::default();

    // 1. Ensure SSH + SFTP channels connected.
    session.connect_shell()?;
    session.connect_file_transfer()?;

    // 2. If killProgram: send kill, wait for success, sleep 2s.
    if opts.kill_program {
        if let Err(e) = shell::kill_program(session, opts.slot) {
            summary.failures.push(e);
        }
        std::thread::sleep(Duration::from_secs(2));
    }

    let temp_dir = archive::package::new_temp_extract_dir()?;

    // 3. Package signature (if .lpz and .sig exists and not --nozig).
    let zig_path = if matches!(kind, PackageKind::Lpz) && !opts.no_zig {
        archive::package::package_zig(&opts.program_file, &temp_dir)?
    } else {
        None
    };

    // 4. Embed hash manifest in archive (best-effort).
    if let Err(e) = archive::manifest::embed_manifest_in_archive(&opts.program_file) {
        eprintln!("warning: failed to embed hash manifest: {}", e);
    }

    // 5. Parse .dip from inside the archive (if .lpz and not --noIpTable).
    let ip_table = if matches!(kind, PackageKind::Lpz) && !opts.no_ip_table {
        read_dip_from_archive(&opts.program_file)?
    } else {
        None
    };

    // 6. ensureRemoteDirectoryExists(remotePath).
    session.create_directory(remote_path)?;

    // 7. Upload the program file with byte-progress callback; then upload the .zig if prepared.
    let remote_program_path =
        format!("{}/{}", remote_path, opts.program_file.file_name().and_then(|f| f.to_str()).unwrap_or("program"));
    upload_one_with_progress(session, &opts.program_file, &remote_program_path, opts.verbose)?;
    summary.files_uploaded += 1;
    summary.bytes_uploaded += std::fs::metadata(&opts.program_file).map(|m| m.len()).unwrap_or(0);

    if let Some(zig) = &zig_path {
        let remote_zig = format!("{}/{}", remote_path, zig.file_name().and_then(|f| f.to_str()).unwrap_or("zig"));
        upload_one_with_progress(session, zig, &remote_zig, opts.verbose)?;
        summary.files_uploaded += 1;
    }

    // 8. If .lpz and IP table entries present: clearIpTable, then add each entry.
    if let Some(table) = &ip_table {
        if !table.entries.is_empty() {
            if let Err(e) = shell::clear_ip_table(session, opts.slot) {
                eprintln!("warning: clearIpTable failed: {}", e);
            }
            for entry in &table.entries {
                let line = format!(
                    "{:#04x},{},{},{}",
                    entry.ip_id,
                    entry.address,
                    entry.port.unwrap_or(0),
                    entry.room_id.clone().unwrap_or_default()
                );
                if shell::add_ip_table_entry(session, opts.slot, &line).is_ok() {
                    summary.ip_table_entries_added += 1;
                }
            }
        }
    }

    // 9. If .lpz or .cpz: register program, then programLoad(slot, doNotStart).
    if matches!(kind, PackageKind::Lpz | PackageKind::Cpz) {
        let main_assembly = archive::package::resolve_main_assembly_from_archive(&opts.program_file)?;
        shell::register_program(session, opts.slot, main_assembly.as_deref())?;
    }
    shell::program_load(session, opts.slot, opts.do_not_start)?;

    // 10. Delete the temporary .zig (and the temp dir it lived in).
    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(summary)
}

/// The fourteen-step delta path.
fn run_delta_path(
    session: &HostSession,
    opts: &UploadOptions,
    kind: PackageKind,
    remote_path: &str,
) -> Result<UploadSummary> {
    let mut summary = UploadSummary::default();

    // 1. Ensure SFTP connected.
    session.connect_file_transfer()?;

    // 2. Extract archive to fresh temp dir, preserving timestamps.
    let temp_dir = archive::package::new_temp_extract_dir()?;
    archive::package::extract_preserving_timestamps(&opts.program_file, &temp_dir)?;

    // 3. Determine uploadAllFiles. --force always re-uploads every file even when nothing
    // appears to have changed.
    let upload_all_files =
        opts.force || opts.kill_program || (matches!(kind, PackageKind::Clz) && !opts.changed_only);

    // 4-5. Compute the change set.
    let changes = if upload_all_files {
        plan::all_files_as_changes(&temp_dir)?
    } else {
        plan::plan_delta(session, &temp_dir, remote_path)?
    };

    // 6. If changes is empty and not killProgram and not --force: report and exit successfully.
    if changes.is_empty() && !opts.kill_program && !opts.force {
        summary.no_changes = true;
        println!("No files have changed.");
        let _ = std::fs::remove_dir_all(&temp_dir);
        return Ok(summary);
    }

    // 7. Open SSH shell; either killProgram(slot) or stopProgram(slot); sleep 2s.
    session.connect_shell()?;
    let stop_result = if opts.kill_program {
        shell::kill_program(session, opts.slot)
    } else {
        shell::stop_program(session, opts.slot)
    };
    if let Err(e) = stop_result {
        summary.failures.push(e);
    }
    std::thread::sleep(Duration::from_secs(2));

    // 8. Parallel upload with bounded concurrency.
    let worker_result = workers::upload_changes(session, &temp_dir, remote_path, &changes, opts.verbose);
    summary.files_uploaded += worker_result.succeeded;
    summary.bytes_uploaded += worker_result.bytes;
    summary.failures.extend(worker_result.failed);
    if !summary.failures.is_empty() {
        eprintln!("{} file(s) failed to upload", summary.failures.len());
    }

    // 9. Compute a fresh hash manifest for the entire extracted tree and upload it.
    let manifest = Manifest::from_tree(&temp_dir)?;
    let manifest_bytes = manifest.serialize();
    let manifest_local = temp_dir.join(".act.hash.upload");
    std::fs::write(&manifest_local, &manifest_bytes)?;
    let remote_manifest_path = format!("{}/.act.hash", remote_path);
    session.upload_file(&manifest_local, &remote_manifest_path, |_, _| {})?;
    let _ = std::fs::remove_file(&manifest_local);

    // 10. If .lpz and not --noIpTable: parse top-level .dip; if found, clear then add entries.
    if matches!(kind, PackageKind::Lpz) && !opts.no_ip_table {
        if let Some(table) = read_dip_from_dir(&temp_dir)? {
            if !table.entries.is_empty() {
                if let Err(e) = shell::clear_ip_table(session, opts.slot) {
                    eprintln!("warning: clearIpTable failed: {}", e);
                }
                for entry in &table.entries {
                    let line = format!(
                        "{:#04x},{},{},{}",
                        entry.ip_id,
                        entry.address,
                        entry.port.unwrap_or(0),
                        entry.room_id.clone().unwrap_or_default()
                    );
                    if shell::add_ip_table_entry(session, opts.slot, &line).is_ok() {
                        summary.ip_table_entries_added += 1;
                    }
                }
            }
        }
    }

    // 11. If .lpz or .cpz: register program.
    if matches!(kind, PackageKind::Lpz | PackageKind::Cpz) {
        let main_assembly = archive::package::resolve_main_assembly(&temp_dir)?;
        shell::register_program(session, opts.slot, main_assembly.as_deref())?;
    }

    // 12. If .lpz and a .zig exists: upload it with a dedicated progress task, then delete it.
    if matches!(kind, PackageKind::Lpz) && !opts.no_zig {
        if let Some(zig) = archive::package::package_zig(&opts.program_file, &temp_dir)? {
            let remote_zig = format!("{}/{}", remote_path, zig.file_name().and_then(|f| f.to_str()).unwrap_or("zig"));
            upload_one_with_progress(session, &zig, &remote_zig, opts.verbose)?;
            let _ = std::fs::remove_file(&zig);
        }
    }

    // 13. If not doNotStart: restartProgram(slot).
    if !opts.do_not_start {
        shell::restart_program(session, opts.slot)?;
    }

    // 14. Delete the temp extraction directory.
    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(summary)
}

fn upload_one_with_progress(session: &HostSession, local: &Path, remote: &str, verbose: bool) -> Result<()> {
    let total = std::fs::metadata(local).map(|m| m.len()).unwrap_or(0);
    let style = ProgressStyle::with_template("{msg} {bar:40.cyan/blue} {bytes}/{total_bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let (_mp, pb, header) = util::init_progress_and_mp(verbose, total, &style);
    util::set_startup_header(&header, "upload", 1, 0, 64 * 1024);
    pb.set_message(remote.to_string());
    let sent = Arc::new(AtomicU32::new(0));
    let sent2 = sent.clone();
    session.upload_file(local, remote, move |s, t| {
        sent2.store((s.min(u32::MAX as u64)) as u32, Ordering::Relaxed);
        pb.set_length(t.max(1));
        pb.set_position(s);
    })?;
    Ok(())
}

fn read_dip_from_archive(program_file: &Path) -> Result<Option<crate::archive::IpTable>> {
    let file = std::fs::File::open(program_file)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ActError::DipParseFailed(e.to_string()))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| ActError::DipParseFailed(e.to_string()))?;
        if entry.name().to_lowercase().ends_with(".dip") {
            let mut text = String::new();
            use std::io::Read as _;
            entry.read_to_string(&mut text).map_err(|e| ActError::DipParseFailed(e.to_string()))?;
            return Ok(Some(crate::archive::dip::parse(&text)));
        }
    }
    Ok(None)
}

fn read_dip_from_dir(dir: &Path) -> Result<Option<crate::archive::IpTable>> {
    for entry in walkdir::WalkDir::new(dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("dip")).unwrap_or(false)
        {
            let text = std::fs::read_to_string(entry.path())?;
            return Ok(Some(crate::archive::dip::parse(&text)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(kill_program: bool) -> UploadOptions {
        UploadOptions {
            slot: 1,
            program_file: PathBuf::from("whatever.lpz"),
            changed_only: false,
            kill_program,
            do_not_start: false,
            no_ip_table: false,
            no_zig: false,
            verbose: false,
            force: false,
        }
    }

    #[test]
    fn full_upload_with_kill_and_ip_table_entries_clears_then_adds_then_registers_then_loads() {
        use FullPackageStep::*;
        let steps = full_package_step_order(PackageKind::Lpz, &opts(true), true, 3);
        assert_eq!(
            steps,
            vec![
                ConnectChannels,
                KillProgram,
                PackageZig,
                EmbedManifest,
                ParseDip,
                EnsureRemoteDir,
                UploadProgram,
                UploadZig,
                ClearIpTable,
                AddIpTableEntry,
                AddIpTableEntry,
                AddIpTableEntry,
                RegisterProgram,
                ProgramLoad,
                Cleanup,
            ]
        );
    }

    #[test]
    fn cpz_never_packages_zig_or_parses_ip_table_but_still_registers() {
        use FullPackageStep::*;
        let steps = full_package_step_order(PackageKind::Cpz, &opts(false), false, 0);
        assert_eq!(steps, vec![ConnectChannels, EmbedManifest, EnsureRemoteDir, UploadProgram, RegisterProgram, ProgramLoad, Cleanup]);
    }

    #[test]
    fn empty_ip_table_never_clears_or_adds_entries() {
        use FullPackageStep::*;
        let steps = full_package_step_order(PackageKind::Lpz, &opts(false), false, 0);
        assert_eq!(steps, vec![ConnectChannels, EmbedManifest, ParseDip, EnsureRemoteDir, UploadProgram, RegisterProgram, ProgramLoad, Cleanup]);
    }
}
