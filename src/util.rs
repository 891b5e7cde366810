//! Small shared helpers: JSON storage, human-readable byte formatting, progress-bar
//! scaffolding, and the generic retry/backoff primitives used by C1's reconnect policy
//! and C4's upload workers.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Try to enable ANSI escape sequence support on Windows consoles.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    false
}

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Initialize a MultiProgress and a total ProgressBar plus a header spinner bar used to
/// display a single-line startup summary above the total progress (C4 upload rendering).
pub fn init_progress_and_mp(
    verbose: bool,
    total: u64,
    total_style: &ProgressStyle,
) -> (Arc<MultiProgress>, ProgressBar, ProgressBar) {
    let mp = Arc::new(if verbose {
        MultiProgress::with_draw_target(ProgressDrawTarget::stdout())
    } else {
        MultiProgress::new()
    });
    let header = mp.add(ProgressBar::new_spinner());
    header.set_style(ProgressStyle::with_template("{msg}").expect("valid header template"));
    let total_pb = mp.add(ProgressBar::new(total));
    total_pb.set_style(total_style.clone());
    let _ = try_enable_ansi_on_windows();
    (mp, total_pb, header)
}

/// Populate and set the startup header message above the total progress bar.
pub fn set_startup_header(header: &ProgressBar, action: &str, worker_count: usize, backoff_ms: u64, buf_size: usize) {
    let buf_hr = human_bytes(buf_size as u64);
    let action_field = format!("{:<10}", format!("Action:{}", action));
    let conc_field = format!("{:<12}", format!("Worker:{}", worker_count));
    let backoff_field = format!("{:<12}", format!("Backoff:{}ms", backoff_ms));
    let buffer_field = format!("{:<12}", format!("Buf:{}", buf_hr));
    let mut header_msg_plain =
        format!("{}    {}    {}    {}", action_field, conc_field, backoff_field, buffer_field);
    if try_enable_ansi_on_windows() {
        let action_col = action_field.green();
        let conc_col = conc_field.cyan();
        let back_col = backoff_field.yellow();
        let buf_col = buffer_field.magenta();
        header_msg_plain = format!("{}    {}    {}    {}", action_col, conc_col, back_col, buf_col);
    }
    header.set_message(header_msg_plain);
}

/// Print a concise summary line for a completed upload.
pub fn print_summary(total_bytes: u64, elapsed_secs: f64, files: u64, session_rebuilds: u64, sftp_rebuilds: u64) {
    if elapsed_secs > 0.0 {
        let mb = total_bytes as f64 / 1024.0 / 1024.0;
        println!(
            "average rate: {:.2} MB/s ({} bytes, {:.2}s, {} files) | session rebuilds: {} | sftp rebuilds: {}",
            mb / elapsed_secs,
            total_bytes,
            elapsed_secs,
            files,
            session_rebuilds,
            sftp_rebuilds
        );
    } else {
        println!("average rate: 0.00 MB/s (0 files)");
    }
}

/// Append failed-file summaries to a plain-text log with a UTC timestamp header.
pub fn write_failures(path: Option<PathBuf>, failures: &[String]) {
    let Some(p) = path else { return };
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&p) {
        let header = format!("Upload failures (UTC {}):", Utc::now().format("%Y%m%dT%H%M%SZ"));
        let _ = writeln!(f, "{}", header);
        for line in failures {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// Write structured per-file failures as JSON Lines alongside the plain-text log, returning
/// the path written to (if any). Each line is `{"path": ..., "message": ...}`.
pub fn write_failures_jsonl(path: Option<PathBuf>, failures: &[crate::error::ActError]) -> Option<PathBuf> {
    let p = path.unwrap_or_else(|| PathBuf::from("failures.txt"));
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let mut jsonl_path = p.clone();
    let new_name = format!("{}.jsonl", jsonl_path.file_name().and_then(|s| s.to_str()).unwrap_or("failures"));
    jsonl_path.set_file_name(new_name);

    let mut f = OpenOptions::new().create(true).append(true).open(&jsonl_path).ok()?;
    for err in failures {
        let obj = serde_json::json!({"message": err.to_string()});
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(f, "{}", line);
        }
    }
    Some(jsonl_path)
}

/// Which phase of an upload a retried operation belongs to — used to decide whether to
/// reset the underlying SSH session/SFTP channel before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// Establishing session/SFTP/directory state before any bytes move.
    PreTransfer,
    /// Mid-stream read/write of file content.
    DuringTransfer,
}

/// Fixed backoff schedule: `[1000, 1000, 2000, 3000, 5000, 5000, 10000]` ms, clamped
/// to the last entry for any further attempt. The kth consecutive failure (1-based) waits
/// `compute_backoff_ms(k)`; the first attempt itself runs immediately (caller's concern).
pub const RECONNECT_BACKOFF_MS: [u64; 7] = [1000, 1000, 2000, 3000, 5000, 5000, 10000];

/// Delay, in milliseconds, before the `attempt`-th (1-based) retry.
pub fn compute_backoff_ms(attempt: u64) -> u64 {
    let idx = (attempt.saturating_sub(1) as usize).min(RECONNECT_BACKOFF_MS.len() - 1);
    RECONNECT_BACKOFF_MS[idx]
}

/// Generic retry helper used by the reconnect policy and upload workers: retries `op` up to
/// `max_retries` times total, sleeping `compute_backoff_ms` between attempts, and tagging the
/// context string onto the final error for diagnostics.
pub fn retry_operation_with_ctx<F, T>(max_retries: usize, mut op: F, _phase: RetryPhase, ctx: &str) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 0..max_retries.max(1) {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < max_retries {
                    std::thread::sleep(Duration::from_millis(compute_backoff_ms(attempt as u64 + 1)));
                    continue;
                }
                break;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("operation failed")).context(ctx.to_string()))
}

/// Simpler retry helper with no context tagging, used by call sites that don't need it.
pub fn retry_operation<F, T>(max_retries: usize, op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    retry_operation_with_ctx(max_retries, op, RetryPhase::DuringTransfer, "retry_operation")
}

/// Blanket JSON storage helper used by `Config` and other small on-disk documents.
pub trait StorageObject {
    fn pretty_json(&self) -> String;
    fn save_to<P: AsRef<Path>>(&self, path: P)
    where
        Self: Serialize;
    fn read_from<T: Default + DeserializeOwned + Serialize, P: AsRef<Path>>(path: P) -> T;
}

impl<T: Serialize> StorageObject for T {
    fn pretty_json(&self) -> String {
        match serde_json::to_string_pretty(self) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("failed to serialize: {}, falling back to empty object", e);
                "{}".to_string()
            }
        }
    }
    fn save_to<P: AsRef<Path>>(&self, path: P) {
        if let Err(e) = std::fs::write(path, self.pretty_json()) {
            eprintln!("failed to write file: {}", e);
        }
    }
    fn read_from<R: Default + DeserializeOwned + Serialize, P: AsRef<Path>>(path: P) -> R {
        let Ok(s) = std::fs::read_to_string(path) else { return R::default() };
        match serde_json::from_str::<R>(&s) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("failed to parse JSON: {}, using default", e);
                R::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KiB");
    }

    #[test]
    fn backoff_schedule_matches_spec() {
        assert_eq!(compute_backoff_ms(1), 1000);
        assert_eq!(compute_backoff_ms(2), 1000);
        assert_eq!(compute_backoff_ms(3), 2000);
        assert_eq!(compute_backoff_ms(4), 3000);
        assert_eq!(compute_backoff_ms(5), 5000);
        assert_eq!(compute_backoff_ms(6), 5000);
        assert_eq!(compute_backoff_ms(7), 10000);
        // clamps for any further attempt
        assert_eq!(compute_backoff_ms(20), 10000);
    }

    #[test]
    fn retry_operation_with_ctx_stops_after_max_retries() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_operation_with_ctx(
            3,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("boom"))
            },
            RetryPhase::DuringTransfer,
            "test-op",
        );
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_operation_with_ctx_succeeds_eventually() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = AtomicUsize::new(0);
        let result = retry_operation_with_ctx(
            5,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(anyhow::anyhow!("not yet")) } else { Ok(42) }
            },
            RetryPhase::PreTransfer,
            "test-op",
        );
        assert_eq!(result.unwrap(), 42);
    }
}
