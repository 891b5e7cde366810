//! Command history store (C5): per-host persisted command recall with cursor-based
//! previous/next traversal and prefix search. Built on the crate's `StorageObject`
//! JSON-persistence style, adapted to a newline-delimited text format since history is a flat
//! list rather than a document.

use std::path::{Path, PathBuf};

const DEFAULT_MAX_SIZE: usize = 50;

/// A single prefix-search hit: the matching command and the byte offset of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub command: String,
    pub offset: usize,
}

/// Per-host command history with a cursor for `previous`/`next` navigation. The cursor sits
/// one past the last entry (the "empty current input" sentinel) when idle.
pub struct History {
    entries: Vec<String>,
    max_size: usize,
    cursor: usize,
}

impl History {
    pub fn new(max_size: usize) -> Self {
        History { entries: Vec::new(), max_size: max_size.max(1), cursor: 0 }
    }

    fn sentinel(&self) -> usize {
        self.entries.len()
    }

    /// Append `cmd` unless blank or identical to the last entry (in which case the cursor
    /// still resets to the end). Evicts the oldest entries while over `max_size`.
    pub fn add(&mut self, cmd: &str) {
        if cmd.trim().is_empty() {
            return;
        }
        if self.entries.last().map(|s| s.as_str()) != Some(cmd) {
            self.entries.push(cmd.to_string());
            while self.entries.len() > self.max_size {
                self.entries.remove(0);
            }
        }
        self.cursor = self.sentinel();
    }

    /// Move the cursor one entry back and return it, if any exist before the cursor.
    pub fn previous(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.entries.get(self.cursor).map(|s| s.as_str())
    }

    /// Move the cursor one entry forward; returns `None` once past the last entry (sentinel).
    pub fn next(&mut self) -> Option<&str> {
        if self.cursor < self.sentinel() {
            self.cursor += 1;
        }
        self.entries.get(self.cursor).map(|s| s.as_str())
    }

    pub fn is_at_sentinel(&self) -> bool {
        self.cursor >= self.sentinel()
    }

    /// Remove the first occurrence of `cmd`, adjusting the cursor to stay valid.
    pub fn remove_command(&mut self, cmd: &str) {
        if let Some(pos) = self.entries.iter().position(|e| e == cmd) {
            self.entries.remove(pos);
            if self.cursor > pos || self.cursor > self.entries.len() {
                self.cursor = self.cursor.saturating_sub(1).min(self.entries.len());
            }
        }
    }

    /// Up to `k` entries (most recent first) whose command contains `query` (case-insensitive),
    /// with the byte offset of the first match for highlighting.
    pub fn search_by_prefix(&self, query: &str, k: usize) -> Vec<SearchHit> {
        if query.is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        self.entries
            .iter()
            .rev()
            .filter_map(|cmd| {
                let haystack = cmd.to_lowercase();
                haystack.find(&needle).map(|offset| SearchHit { command: cmd.clone(), offset })
            })
            .take(k)
            .collect()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Load from a UTF-8 newline-delimited file. Errors are swallowed — history is best-effort.
    /// Trims the oldest entries if the file holds more than `max_size`.
    pub fn load(path: &Path, max_size: usize) -> Self {
        let mut history = History::new(max_size);
        if let Ok(text) = std::fs::read_to_string(path) {
            for line in text.lines() {
                if !line.is_empty() {
                    history.entries.push(line.to_string());
                }
            }
            while history.entries.len() > history.max_size {
                history.entries.remove(0);
            }
        }
        history.cursor = history.sentinel();
        history
    }

    /// Persist as UTF-8 newline-delimited text. Errors are swallowed.
    pub fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let text = self.entries.join("\n");
        let _ = std::fs::write(path, text);
    }
}

/// The per-host history file path: `$LOCAL_APP_DATA/AvConsoleToolkit/History/<safeHost>.history`.
pub fn history_path_for_host(local_app_data: &Path, host: &str) -> PathBuf {
    let safe_host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    local_app_data.join("AvConsoleToolkit").join("History").join(format!("{}.history", safe_host))
}

pub fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_ignores_blank_and_repeated_last() {
        let mut h = History::new(10);
        h.add("");
        h.add("ls");
        h.add("ls");
        assert_eq!(h.entries(), &["ls".to_string()]);
    }

    #[test]
    fn add_evicts_oldest_when_over_capacity() {
        let mut h = History::new(2);
        h.add("one");
        h.add("two");
        h.add("three");
        assert_eq!(h.entries(), &["two".to_string(), "three".to_string()]);
    }

    #[test]
    fn previous_and_next_cursor_walks_with_sentinel() {
        let mut h = History::new(10);
        h.add("first");
        h.add("second");
        assert_eq!(h.previous(), Some("second"));
        assert_eq!(h.previous(), Some("first"));
        assert_eq!(h.previous(), Some("first"));
        assert_eq!(h.next(), Some("second"));
        assert_eq!(h.next(), None);
        assert!(h.is_at_sentinel());
    }

    #[test]
    fn remove_command_drops_first_match() {
        let mut h = History::new(10);
        h.add("a");
        h.add("b");
        h.add("a");
        h.remove_command("a");
        assert_eq!(h.entries(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn search_by_prefix_is_case_insensitive_and_bounded() {
        let mut h = History::new(10);
        h.add("progload -p:3");
        h.add("PROGLOAD -p:4");
        h.add("restart");
        let hits = h.search_by_prefix("progload", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].command, "PROGLOAD -p:4");
    }

    #[test]
    fn load_trims_oldest_when_over_max_size() {
        let dir = std::env::temp_dir().join(format!("act-hist-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("h.history");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();
        let h = History::load(&path, 2);
        assert_eq!(h.entries(), &["two".to_string(), "three".to_string()]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
