//! Shell command driver (C2): send a command line on the shell channel and wait for a
//! success/failure pattern to appear in the accumulated output. Built on the
//! `transfer/session.rs` exec-and-poll pattern (run a command, read the channel in a loop
//! until a recognizable marker shows up or a timeout elapses).

use std::io::Write as _;
use std::time::{Duration, Instant};

use crate::error::{ActError, Result};
use crate::session::HostSession;

/// Poll `session.read()` until a success or failure substring (case-insensitive) shows up in
/// the accumulated output, or `timeout_ms` elapses. Failure substrings win ties on the same
/// poll. If `echo` is true, every byte read is written to stdout as it arrives.
pub fn wait_for_command_completion(
    session: &HostSession,
    success_patterns: &[&str],
    failure_patterns: &[&str],
    timeout_ms: u64,
    echo: bool,
) -> Result<bool> {
    let start = Instant::now();
    let mut acc = String::new();
    loop {
        let chunk = session.read()?;
        if !chunk.is_empty() {
            if echo {
                let mut out = std::io::stdout();
                let _ = out.write_all(&chunk);
                let _ = out.flush();
            }
            acc.push_str(&String::from_utf8_lossy(&chunk));
            let lower = acc.to_lowercase();
            if failure_patterns.iter().any(|p| lower.contains(&p.to_lowercase())) {
                return Ok(false);
            }
            if success_patterns.iter().any(|p| lower.contains(&p.to_lowercase())) {
                return Ok(true);
            }
        }
        if start.elapsed() >= Duration::from_millis(timeout_ms) {
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

/// Run `command`, returning `ActError::Protocol(command, output_tail)` if neither a success
/// pattern is matched nor the call otherwise fails outright.
fn run_and_expect(
    session: &HostSession,
    command: &str,
    success_patterns: &[&str],
    failure_patterns: &[&str],
    timeout_ms: u64,
) -> Result<()> {
    session.write_line(command)?;
    let ok = wait_for_command_completion(session, success_patterns, failure_patterns, timeout_ms, false)?;
    if ok {
        Ok(())
    } else {
        Err(ActError::Protocol(command.to_string(), tail(command)))
    }
}

fn tail(command: &str) -> String {
    format!("no match for {command} within timeout")
}

/// Stop a running program in the given slot.
pub fn stop_program(session: &HostSession, slot: u32) -> Result<()> {
    let command = format!("stopprog -p:{}", slot);
    run_and_expect(
        session,
        &command,
        &["Program Stopped", "** Specified App does not exist **"],
        &[],
        10_000,
    )
}

/// Remove (unregister) a program from the given slot.
pub fn kill_program(session: &HostSession, slot: u32) -> Result<()> {
    let command = format!("killprog -P:{}", slot);
    let success = format!("Specified program {} successfully deleted", slot);
    run_and_expect(session, &command, &[success.as_str()], &[], 10_000)
}

/// Register a program assembly for the given slot, optionally naming the main assembly.
pub fn register_program(session: &HostSession, slot: u32, main_assembly: Option<&str>) -> Result<()> {
    let command = match main_assembly {
        Some(asm) => format!("register -p:{} -a:{}", slot, asm),
        None => format!("register -p:{}", slot),
    };
    run_and_expect(session, &command, &["Registered", "successfully registered"], &[], 15_000)
}

/// Load the program binary already uploaded to the given slot.
pub fn program_load(session: &HostSession, slot: u32, do_not_start: bool) -> Result<()> {
    let command = if do_not_start {
        format!("progload -p:{} -n", slot)
    } else {
        format!("progload -p:{}", slot)
    };
    run_and_expect(session, &command, &["Program Start successfully sent for App"], &[], 15_000)
}

/// Restart the program running in the given slot.
pub fn restart_program(session: &HostSession, slot: u32) -> Result<()> {
    let command = format!("progres -p:{}", slot);
    run_and_expect(session, &command, &["Program Start successfully sent for App", "Program Reset"], &[], 15_000)
}

/// Clear the IP table for the given slot.
pub fn clear_ip_table(session: &HostSession, slot: u32) -> Result<()> {
    let command = format!("addipt -p:{} -c", slot);
    run_and_expect(session, &command, &["IP Table cleared", "successfully cleared"], &[], 10_000)
}

/// Add one IP table entry (`index,address,port,id`) for the given slot.
pub fn add_ip_table_entry(session: &HostSession, slot: u32, entry: &str) -> Result<()> {
    let command = format!("addipt -p:{} -t:{}", slot, entry);
    run_and_expect(session, &command, &["IP Table entry added", "successfully added"], &[], 10_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_mentions_command() {
        let msg = tail("stopprog -p:1");
        assert!(msg.contains("stopprog -p:1"));
    }
}
