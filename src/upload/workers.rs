//! Bounded-concurrency upload worker pool. Built on the
//! `crossbeam-channel` work-queue pattern: a fixed pool of worker threads pulls jobs off a
//! channel, with a shared concurrency ceiling that shrinks the first time any upload fails.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::unbounded;

use crate::error::ActError;
use crate::session::HostSession;
use crate::upload::plan::PlannedChange;

const INITIAL_CONCURRENCY: usize = 8;

pub struct WorkerResult {
    pub succeeded: u64,
    pub bytes: u64,
    pub failed: Vec<ActError>,
}

/// Upload every planned change to `remote_path` on `session`, at up to
/// `min(INITIAL_CONCURRENCY, session_max_concurrency)` concurrent transfers. The ceiling
/// shrinks to `max(1, active_uploads_at_failure)` the first time any file fails; a file that
/// fails twice (initial attempt + one retry) is recorded as failed.
pub fn upload_changes(
    session: &HostSession,
    local_root: &Path,
    remote_path: &str,
    changes: &[PlannedChange],
    verbose: bool,
) -> WorkerResult {
    let _ = local_root;
    let _ = verbose;
    if changes.is_empty() {
        return WorkerResult { succeeded: 0, bytes: 0, failed: Vec::new() };
    }

    let (job_tx, job_rx) = unbounded::<PlannedChange>();
    for change in changes {
        job_tx.send(change.clone()).ok();
    }
    drop(job_tx);

    let active = Arc::new(AtomicUsize::new(0));
    let ceiling = Arc::new(AtomicUsize::new(INITIAL_CONCURRENCY));
    let shrunk = Arc::new(AtomicBool::new(false));
    let succeeded = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    let failed: Arc<Mutex<Vec<ActError>>> = Arc::new(Mutex::new(Vec::new()));

    std::thread::scope(|scope| {
        let worker_count = INITIAL_CONCURRENCY.min(changes.len()).max(1);
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let active = active.clone();
            let ceiling = ceiling.clone();
            let shrunk = shrunk.clone();
            let succeeded = succeeded.clone();
            let bytes = bytes.clone();
            let failed = failed.clone();

            scope.spawn(move || {
                while let Ok(change) = job_rx.recv() {
                    // Honor a shrunk ceiling: if we're over it, yield the slot back briefly.
                    while active.load(Ordering::SeqCst) >= ceiling.load(Ordering::SeqCst) {
                        std::thread::sleep(std::time::Duration::from_millis(20));
                    }
                    active.fetch_add(1, Ordering::SeqCst);
                    let active_at_start = active.load(Ordering::SeqCst);

                    let remote_file = format!("{}/{}", remote_path, change.relative_path);
                    let result = upload_one(session, &change.local_path, &remote_file);
                    let result = match result {
                        Ok(n) => Ok(n),
                        Err(_first_err) => upload_one(session, &change.local_path, &remote_file),
                    };

                    match result {
                        Ok(n) => {
                            succeeded.fetch_add(1, Ordering::SeqCst);
                            bytes.fetch_add(n, Ordering::SeqCst);
                        }
                        Err(e) => {
                            if !shrunk.swap(true, Ordering::SeqCst) {
                                ceiling.store(active_at_start.max(1), Ordering::SeqCst);
                            }
                            failed.lock().unwrap().push(e);
                        }
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
    });

    WorkerResult {
        succeeded: succeeded.load(Ordering::SeqCst),
        bytes: bytes.load(Ordering::SeqCst),
        failed: Arc::try_unwrap(failed).map(|m| m.into_inner().unwrap()).unwrap_or_default(),
    }
}

fn upload_one(session: &HostSession, local: &Path, remote: &str) -> Result<u64, ActError> {
    if let Some(parent) = Path::new(remote).parent() {
        let parent_str = parent.to_string_lossy();
        if !parent_str.is_empty() {
            session.create_directory(&parent_str)?;
        }
    }
    let mut last = 0u64;
    session.upload_file(local, remote, |sent, _total| last = sent)?;

    if let Ok(meta) = std::fs::metadata(local) {
        if let Ok(modified) = meta.modified() {
            if let Ok(d) = modified.duration_since(std::time::UNIX_EPOCH) {
                let _ = session.set_last_write_time_utc(remote, d.as_secs() as i64);
            }
        }
    }
    Ok(last.max(std::fs::metadata(local).map(|m| m.len()).unwrap_or(0)))
}
