//! HostSession (C1): the resilient dual-channel SSH connection.
//!
//! Owns a lazily-established interactive shell and SFTP channel to one host, detects
//! disconnection, and drives bounded-retry reconnection with the fixed backoff schedule
//! Built on `transfer/session.rs`-style handshake/auth helpers and
//! `transfer/multi_channel.rs` (RAII channel guards, reset-on-teardown).

mod reconnect;

pub use reconnect::{decide_reconnect_step, ChannelState, ReconnectStep};

use std::io::{Read, Write as _};
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ActError, Result};

/// Which channel a status event or reconnect episode concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Shell,
    FileTransfer,
}

impl Channel {
    fn label(self) -> &'static str {
        match self {
            Channel::Shell => "shell",
            Channel::FileTransfer => "file-transfer",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Credential {
    Password { username: String, password: String },
    PrivateKey { username: String, private_key_path: std::path::PathBuf },
}

impl Credential {
    pub fn username(&self) -> &str {
        match self {
            Credential::Password { username, .. } => username,
            Credential::PrivateKey { username, .. } => username,
        }
    }
}

/// `ConnectionStatusModel`: a snapshot published on every channel-state transition.
#[derive(Debug, Clone)]
pub struct ConnectionStatusModel {
    pub host_address: String,
    pub shell_state: ChannelState,
    pub shell_attempt: u32,
    pub shell_max_attempts: i32,
    pub file_transfer_state: ChannelState,
    pub file_transfer_attempt: u32,
    pub file_transfer_max_attempts: i32,
}

type Listener = Box<dyn Fn(&ConnectionStatusModel) + Send + Sync>;

struct ChannelSlot {
    state: ChannelState,
    attempt: u32,
    needed: bool,
}

impl Default for ChannelSlot {
    fn default() -> Self {
        ChannelSlot { state: ChannelState::Idle, attempt: 0, needed: false }
    }
}

/// The per-host connection object.
pub struct HostSession {
    pub host_address: String,
    pub port: u16,
    credential: Credential,
    /// -1 = infinite, 0 = disabled, N>0 = bounded.
    max_reconnect_attempts: Mutex<i32>,

    shell: Mutex<ChannelSlot>,
    file_transfer: Mutex<ChannelSlot>,

    session: Mutex<Option<ssh2::Session>>,
    shell_channel: Mutex<Option<ssh2::Channel>>,
    sftp: Mutex<Option<ssh2::Sftp>>,
    prompt_detected: Mutex<Option<String>>,

    listeners: Mutex<Vec<Listener>>,
    disposed: Mutex<bool>,
}

impl HostSession {
    pub fn new(host_address: String, port: u16, credential: Credential, max_reconnect_attempts: i32) -> Arc<Self> {
        Arc::new(HostSession {
            host_address,
            port,
            credential,
            max_reconnect_attempts: Mutex::new(max_reconnect_attempts),
            shell: Mutex::new(ChannelSlot::default()),
            file_transfer: Mutex::new(ChannelSlot::default()),
            session: Mutex::new(None),
            shell_channel: Mutex::new(None),
            sftp: Mutex::new(None),
            prompt_detected: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            disposed: Mutex::new(false),
        })
    }

    pub fn set_max_reconnect_attempts(&self, n: i32) {
        *self.max_reconnect_attempts.lock().unwrap() = n;
    }

    pub fn on_status_change(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn snapshot(&self) -> ConnectionStatusModel {
        let max = *self.max_reconnect_attempts.lock().unwrap();
        let shell = self.shell.lock().unwrap();
        let ft = self.file_transfer.lock().unwrap();
        ConnectionStatusModel {
            host_address: self.host_address.clone(),
            shell_state: shell.state,
            shell_attempt: shell.attempt,
            shell_max_attempts: max,
            file_transfer_state: ft.state,
            file_transfer_attempt: ft.attempt,
            file_transfer_max_attempts: max,
        }
    }

    fn publish_status(&self) {
        let snap = self.snapshot();
        for l in self.listeners.lock().unwrap().iter() {
            l(&snap);
        }
    }

    fn set_state(&self, channel: Channel, state: ChannelState) {
        {
            let mut slot = match channel {
                Channel::Shell => self.shell.lock().unwrap(),
                Channel::FileTransfer => self.file_transfer.lock().unwrap(),
            };
            slot.state = state;
        }
        self.publish_status();
    }

    /// Idempotent: bring the shell channel to `Connected`, reconnecting if needed.
    pub fn connect_shell(&self) -> Result<()> {
        self.shell.lock().unwrap().needed = true;
        if matches!(self.shell.lock().unwrap().state, ChannelState::Connected) {
            return Ok(());
        }
        self.ensure_session()?;
        self.run_reconnect_episode(Channel::Shell)
    }

    /// Idempotent: bring the SFTP channel to `Connected`, reconnecting if needed.
    pub fn connect_file_transfer(&self) -> Result<()> {
        self.file_transfer.lock().unwrap().needed = true;
        if matches!(self.file_transfer.lock().unwrap().state, ChannelState::Connected) {
            return Ok(());
        }
        self.ensure_session()?;
        self.run_reconnect_episode(Channel::FileTransfer)
    }

    /// Drives the reconnect state machine for one channel: `LostConnection -> Reconnecting ->
    /// {Connected, ConnectionFailed}`, honoring `max_reconnect_attempts` semantics.
    fn run_reconnect_episode(&self, channel: Channel) -> Result<()> {
        let max_attempts = *self.max_reconnect_attempts.lock().unwrap();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            {
                let mut slot = match channel {
                    Channel::Shell => self.shell.lock().unwrap(),
                    Channel::FileTransfer => self.file_transfer.lock().unwrap(),
                };
                slot.attempt = attempt;
            }
            self.set_state(channel, if attempt == 1 { ChannelState::Connecting } else { ChannelState::Reconnecting });

            let result = match channel {
                Channel::Shell => self.establish_shell_channel(),
                Channel::FileTransfer => self.establish_sftp_channel(),
            };

            match result {
                Ok(()) => {
                    self.set_state(channel, ChannelState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    let _ = e;
                    match reconnect::decide_reconnect_step(attempt, max_attempts) {
                        reconnect::ReconnectStep::GiveUpDisabled => {
                            self.set_state(channel, ChannelState::ConnectionFailed);
                            return Err(ActError::ReconnectDisabled(channel.label()));
                        }
                        reconnect::ReconnectStep::GiveUpExhausted => {
                            self.set_state(channel, ChannelState::ConnectionFailed);
                            return Err(ActError::ReconnectExhausted(channel.label(), attempt));
                        }
                        reconnect::ReconnectStep::Retry => {
                            self.set_state(channel, ChannelState::LostConnection);
                            let wait_ms = crate::util::compute_backoff_ms(attempt as u64);
                            std::thread::sleep(Duration::from_millis(wait_ms));
                        }
                    }
                }
            }
        }
    }

    fn ensure_session(&self) -> Result<()> {
        let mut guard = self.session.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let tcp = TcpStream::connect((self.host_address.as_str(), self.port))
            .map_err(|e| ActError::ConnectFailed(self.host_address.clone(), e.to_string()))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30))).ok();
        tcp.set_write_timeout(Some(Duration::from_secs(30))).ok();

        let mut session = ssh2::Session::new()
            .map_err(|e| ActError::ConnectFailed(self.host_address.clone(), e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| ActError::HandshakeFailed(self.host_address.clone(), e.to_string()))?;

        match &self.credential {
            Credential::Password { username, password } => {
                session
                    .userauth_password(username, password)
                    .map_err(|_| ActError::AuthFailed(self.host_address.clone()))?;
            }
            Credential::PrivateKey { username, private_key_path } => {
                session
                    .userauth_pubkey_file(username, None, private_key_path, None)
                    .map_err(|_| ActError::AuthFailed(self.host_address.clone()))?;
            }
        }
        if !session.authenticated() {
            return Err(ActError::AuthFailed(self.host_address.clone()));
        }
        *guard = Some(session);
        Ok(())
    }

    fn establish_shell_channel(&self) -> Result<()> {
        let guard = self.session.lock().unwrap();
        let session = guard.as_ref().ok_or_else(|| ActError::ChannelLost("shell"))?;
        let mut channel =
            session.channel_session().map_err(|e| ActError::Sftp(format!("channel_session: {}", e)))?;
        channel.shell().map_err(|e| ActError::Sftp(format!("shell: {}", e)))?;
        *self.shell_channel.lock().unwrap() = Some(channel);
        Ok(())
    }

    fn establish_sftp_channel(&self) -> Result<()> {
        let guard = self.session.lock().unwrap();
        let session = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        let sftp = session.sftp().map_err(|e| ActError::Sftp(e.to_string()))?;
        *self.sftp.lock().unwrap() = Some(sftp);
        Ok(())
    }

    /// Non-blocking peek on the shell side: is there buffered output to read?
    pub fn data_available(&self) -> bool {
        matches!(self.shell.lock().unwrap().state, ChannelState::Connected)
            && self.shell_channel.lock().unwrap().as_mut().map(|c| !c.eof()).unwrap_or(false)
    }

    /// Blocking read of whatever bytes are currently available on the shell channel.
    pub fn read(&self) -> Result<Vec<u8>> {
        self.connect_shell()?;
        let mut guard = self.shell_channel.lock().unwrap();
        let channel = guard.as_mut().ok_or_else(|| ActError::ChannelLost("shell"))?;
        let mut buf = [0u8; 4096];
        match channel.read(&mut buf) {
            Ok(0) => Ok(Vec::new()),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => {
                drop(guard);
                self.set_state(Channel::Shell, ChannelState::LostConnection);
                Err(ActError::Io(e.to_string()))
            }
        }
    }

    /// Write one line, followed by a newline, to the shell channel.
    pub fn write_line(&self, line: &str) -> Result<()> {
        self.connect_shell()?;
        let mut guard = self.shell_channel.lock().unwrap();
        let channel = guard.as_mut().ok_or_else(|| ActError::ChannelLost("shell"))?;
        channel
            .write_all(format!("{}\n", line).as_bytes())
            .and_then(|_| channel.flush())
            .map_err(|e| ActError::Io(e.to_string()))
    }

    /// Remember the device prompt detected by the REPL's background reader.
    pub fn set_detected_prompt(&self, prompt: String) {
        *self.prompt_detected.lock().unwrap() = Some(prompt);
    }

    pub fn detected_prompt(&self) -> Option<String> {
        self.prompt_detected.lock().unwrap().clone()
    }

    // --- SFTP surface ---

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.connect_file_transfer()?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        Ok(sftp.stat(Path::new(path)).is_ok())
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        self.connect_file_transfer()?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        ensure_remote_dir_all(sftp, path)
    }

    pub fn list_directory(&self, path: &str) -> Result<Vec<(String, bool)>> {
        self.connect_file_transfer()?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        let entries = sftp.readdir(Path::new(path)).map_err(|e| ActError::Sftp(e.to_string()))?;
        Ok(entries
            .into_iter()
            .filter_map(|(p, stat)| {
                let name = p.file_name()?.to_str()?.to_string();
                if name == "." || name == ".." {
                    return None;
                }
                Some((name, stat.is_file()))
            })
            .collect())
    }

    pub fn upload_file<F: FnMut(u64, u64)>(
        &self,
        local: &Path,
        remote: &str,
        mut progress_cb: F,
    ) -> Result<()> {
        self.connect_file_transfer()?;
        let total = std::fs::metadata(local)?.len();
        let mut src = std::fs::File::open(local)?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        let mut dst = sftp.create(Path::new(remote)).map_err(|e| ActError::Sftp(e.to_string()))?;
        let mut buf = [0u8; 64 * 1024];
        let mut sent = 0u64;
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).map_err(|e| ActError::UploadFailed(remote.to_string(), e.to_string()))?;
            sent += n as u64;
            progress_cb(sent, total);
        }
        Ok(())
    }

    pub fn download_file(&self, remote: &str, local: &Path) -> Result<()> {
        self.connect_file_transfer()?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        let mut src = sftp.open(Path::new(remote)).map_err(|e| ActError::Sftp(e.to_string()))?;
        let mut dst = std::fs::File::create(local)?;
        std::io::copy(&mut src, &mut dst)?;
        Ok(())
    }

    /// Remote file's last-modified time as a Unix timestamp, if the server reports one.
    pub fn stat_mtime(&self, path: &str) -> Result<Option<i64>> {
        self.connect_file_transfer()?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        let stat = sftp.stat(Path::new(path)).map_err(|e| ActError::Sftp(e.to_string()))?;
        Ok(stat.mtime.map(|m| m as i64))
    }

    /// Recursively list every file under `root`, returning slash-normalized paths relative to
    /// `root` (no leading slash).
    pub fn list_files_recursive(&self, root: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut stack = vec![root.trim_end_matches('/').to_string()];
        while let Some(dir) = stack.pop() {
            let entries = match self.list_directory(&dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for (name, is_file) in entries {
                let full = format!("{}/{}", dir, name);
                if is_file {
                    let rel = full
                        .strip_prefix(root)
                        .unwrap_or(&full)
                        .trim_start_matches('/')
                        .to_string();
                    out.push(rel);
                } else {
                    stack.push(full);
                }
            }
        }
        Ok(out)
    }

    pub fn set_last_write_time_utc(&self, path: &str, mtime: i64) -> Result<()> {
        self.connect_file_transfer()?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        let mut stat = sftp.stat(Path::new(path)).map_err(|e| ActError::Sftp(e.to_string()))?;
        stat.mtime = Some(mtime as u64);
        sftp.setstat(Path::new(path), stat).map_err(|e| ActError::Sftp(e.to_string()))
    }

    /// Cancel any reconnect activity and force-close both channels. Errors are swallowed.
    pub fn dispose(&self) {
        *self.disposed.lock().unwrap() = true;
        *self.shell_channel.lock().unwrap() = None;
        *self.sftp.lock().unwrap() = None;
        *self.session.lock().unwrap() = None;
        self.set_state(Channel::Shell, ChannelState::Idle);
        self.set_state(Channel::FileTransfer, ChannelState::Idle);
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock().unwrap()
    }

    pub fn list_files_by_glob(&self, pattern: &str) -> Result<Vec<String>> {
        let p = Path::new(pattern);
        let parent = p.parent().map(|x| x.to_string_lossy().to_string()).unwrap_or_else(|| "/".to_string());
        let name_pattern = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let entries = self.list_directory(if parent.is_empty() { "/" } else { &parent })?;
        Ok(entries
            .into_iter()
            .filter(|(name, is_file)| *is_file && wildcard_match(name_pattern, name))
            .map(|(name, _)| format!("{}/{}", parent.trim_end_matches('/'), name))
            .collect())
    }

    pub fn delete_files_by_glob(&self, pattern: &str) -> Result<usize> {
        self.connect_file_transfer()?;
        let matches = self.list_files_by_glob(pattern)?;
        let guard = self.sftp.lock().unwrap();
        let sftp = guard.as_ref().ok_or_else(|| ActError::ChannelLost("file-transfer"))?;
        let mut deleted = 0;
        for m in &matches {
            if sftp.unlink(Path::new(m)).is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn download_files_by_glob(&self, pattern: &str, local_dir: &Path, preserve_structure: bool) -> Result<usize> {
        let matches = self.list_files_by_glob(pattern)?;
        std::fs::create_dir_all(local_dir)?;
        let mut n = 0;
        for remote in &matches {
            let file_name = remote.rsplit('/').next().unwrap_or(remote);
            let dest = if preserve_structure { local_dir.join(remote.trim_start_matches('/')) } else { local_dir.join(file_name) };
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.download_file(remote, &dest)?;
            n += 1;
        }
        Ok(n)
    }
}

/// Recursive `*`/`?` glob matcher, in the style of `transfer/helpers.rs::wildcard_match`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            Some(b'?') => !t.is_empty() && inner(&p[1..], &t[1..]),
            Some(c) => !t.is_empty() && t[0] == *c && inner(&p[1..], &t[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// Component-wise `mkdir -p` over SFTP, tolerating an already-existing directory.
pub fn ensure_remote_dir_all(sftp: &ssh2::Sftp, dir_path: &str) -> Result<()> {
    let mut cur = String::new();
    for comp in dir_path.split('/').filter(|s| !s.is_empty()) {
        cur.push('/');
        cur.push_str(comp);
        match sftp.stat(Path::new(&cur)) {
            Ok(stat) if stat.is_dir() => continue,
            Ok(_) => return Err(ActError::Mkdir(crate::error::MkdirError::ExistsAsFile(cur.clone().into()))),
            Err(_) => {
                if let Err(e) = sftp.mkdir(Path::new(&cur), 0o755) {
                    // tolerate a race where another worker just created it
                    if sftp.stat(Path::new(&cur)).map(|s| s.is_dir()).unwrap_or(false) {
                        continue;
                    }
                    return Err(ActError::Mkdir(crate::error::MkdirError::SftpError(cur.clone().into(), e.to_string())));
                }
            }
        }
    }
    Ok(())
}
