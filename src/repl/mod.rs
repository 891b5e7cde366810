//! Interactive pass-through REPL (C6): a background shell reader plus a foreground
//! cooperative "live display" loop with local line editing, history recall, and nested
//! `:`-prefixed command dispatch. Built on raw-mode terminal handling
//! (`ops::setup_terminal`/`restore_terminal`) and its `crossterm` event-polling style.

mod editor;
mod policy;

pub use editor::LineEditor;
pub use policy::ReplPolicy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use regex::Regex;

use crate::error::Result;
use crate::history::History;
use crate::session::{ChannelState, HostSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    Live,
    Paused,
    Reconnecting,
    Exiting,
}

/// What the foreground loop returned control to the caller for.
pub enum ReplOutcome {
    Exited,
    /// The user submitted a `:`-prefixed line; the caller dispatches it out of band, then
    /// calls `Repl::resume` before running the loop again.
    NestedCommand(String),
}

struct SharedBuffer {
    text: Mutex<String>,
    prompt: Mutex<Option<Regex>>,
}

pub struct Repl {
    session: Arc<HostSession>,
    policy: ReplPolicy,
    history: History,
    buffer: Arc<SharedBuffer>,
    reader_stop: Arc<AtomicBool>,
    editor: LineEditor,
    state: ReplState,
    /// Set by a `HostSession` status listener whenever the shell channel is anything but
    /// `Connected`. The live loop watches this instead of the reconnect machinery directly.
    shell_disconnected: Arc<AtomicBool>,
}

impl Repl {
    pub fn new(session: Arc<HostSession>, policy: ReplPolicy, history: History) -> Self {
        let buffer = Arc::new(SharedBuffer { text: Mutex::new(String::new()), prompt: Mutex::new(None) });
        let reader_stop = Arc::new(AtomicBool::new(false));
        let shell_disconnected = Arc::new(AtomicBool::new(false));

        let flag = shell_disconnected.clone();
        session.on_status_change(Box::new(move |status: &crate::session::ConnectionStatusModel| {
            flag.store(!matches!(status.shell_state, ChannelState::Connected), Ordering::SeqCst);
        }));

        Repl {
            session,
            policy,
            history,
            buffer,
            reader_stop,
            editor: LineEditor::default(),
            state: ReplState::Live,
            shell_disconnected,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Spawn the background byte reader. Appends every chunk read from the shell channel to
    /// the shared buffer and attempts prompt detection if not yet known.
    fn spawn_reader(&self) -> std::thread::JoinHandle<()> {
        let session = self.session.clone();
        let buffer = self.buffer.clone();
        let stop = self.reader_stop.clone();
        std::thread::spawn(move || {
            let prompt_regex = Regex::new(r"^([^\r\n]*>) ?$").expect("valid prompt regex");
            while !stop.load(Ordering::SeqCst) {
                if !session.data_available() {
                    std::thread::sleep(Duration::from_millis(30));
                    continue;
                }
                match session.read() {
                    Ok(chunk) if !chunk.is_empty() => {
                        let text = String::from_utf8_lossy(&chunk).to_string();
                        let mut guard = buffer.text.lock().unwrap();
                        guard.push_str(&text);
                        if buffer.prompt.lock().unwrap().is_none() {
                            if let Some(last_line) = guard.lines().last() {
                                if let Some(caps) = prompt_regex.captures(last_line) {
                                    let detected = caps.get(1).map(|m| m.as_str().to_string());
                                    if let Some(p) = detected {
                                        session.set_detected_prompt(p.clone());
                                        *buffer.prompt.lock().unwrap() =
                                            Regex::new(&regex::escape(&p)).ok();
                                    }
                                }
                            }
                        }
                    }
                    Ok(_) => std::thread::sleep(Duration::from_millis(30)),
                    Err(_) => std::thread::sleep(Duration::from_millis(200)),
                }
            }
        })
    }

    /// Run the foreground live-display loop until exit or a nested command is submitted.
    pub fn run(&mut self) -> Result<ReplOutcome> {
        self.state = ReplState::Live;
        let reader = self.spawn_reader();
        let mut last_blink = Instant::now();
        let mut cursor_visible = true;

        let outcome = loop {
            if self.session.is_disposed() {
                break ReplOutcome::Exited;
            }

            if self.shell_disconnected.load(Ordering::SeqCst) {
                self.state = ReplState::Reconnecting;
                while self.shell_disconnected.load(Ordering::SeqCst) && !self.session.is_disposed() {
                    std::thread::sleep(Duration::from_millis(50));
                }
                if self.session.is_disposed() {
                    break ReplOutcome::Exited;
                }
                // Resume with no initial prompt re-render: drop whatever accumulated while
                // disconnected so the next render tick only shows genuinely fresh output.
                self.buffer.text.lock().unwrap().clear();
                self.state = ReplState::Live;
                continue;
            }

            self.render_tick(&mut last_blink, &mut cursor_visible);

            if event::poll(Duration::from_millis(50)).unwrap_or(false) {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.kind == KeyEventKind::Release {
                        continue;
                    }
                    match self.handle_key(key.code, key.modifiers)? {
                        Some(ReplOutcome::Exited) => break ReplOutcome::Exited,
                        Some(ReplOutcome::NestedCommand(cmd)) => break ReplOutcome::NestedCommand(cmd),
                        None => continue,
                    }
                }
            }
        };

        self.reader_stop.store(true, Ordering::SeqCst);
        let _ = reader.join();
        Ok(outcome)
    }

    /// Resume after a nested command finished: discard buffered output accumulated during
    /// the pause and return to `Live` with no stale prompt re-render.
    pub fn resume(&mut self) {
        self.buffer.text.lock().unwrap().clear();
        self.reader_stop.store(false, Ordering::SeqCst);
        self.state = ReplState::Live;
    }

    fn render_tick(&mut self, last_blink: &mut Instant, cursor_visible: &mut bool) {
        let drained = {
            let mut guard = self.buffer.text.lock().unwrap();
            if guard.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut *guard))
            }
        };
        if let Some(mut text) = drained {
            if let Some(prompt_re) = self.buffer.prompt.lock().unwrap().as_ref() {
                text = prompt_re.replace_all(&text, "").to_string();
            }
            text = collapse_blank_runs(&text);
            print!("{}", text.trim_end());
            println!();
        }
        if last_blink.elapsed() >= Duration::from_millis(500) {
            *cursor_visible = !*cursor_visible;
            *last_blink = Instant::now();
        }
    }

    fn handle_key(&mut self, code: KeyCode, mods: KeyModifiers) -> Result<Option<ReplOutcome>> {
        if mods.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('x') {
            if let Some(exit_cmd) = self.policy.exit_literal_device_command.clone() {
                let _ = self.session.write_line(&exit_cmd);
                std::thread::sleep(Duration::from_millis(500));
            }
            return Ok(Some(ReplOutcome::Exited));
        }
        match code {
            KeyCode::Enter => return Ok(self.submit()),
            KeyCode::Backspace => self.editor.backspace(mods.contains(KeyModifiers::SHIFT)),
            KeyCode::Delete => self.editor.delete(mods.contains(KeyModifiers::SHIFT)),
            KeyCode::Left => self.editor.move_left(mods.contains(KeyModifiers::SHIFT)),
            KeyCode::Right => self.editor.move_right(mods.contains(KeyModifiers::SHIFT)),
            KeyCode::Home => self.editor.move_home(mods.contains(KeyModifiers::SHIFT)),
            KeyCode::End => self.editor.move_end(mods.contains(KeyModifiers::SHIFT)),
            KeyCode::Tab => {
                let sent = match &self.policy.on_tab {
                    Some(f) => f(self.editor.text()),
                    None => format!("{}\t", self.editor.text()),
                };
                self.session.write_line(&sent)?;
            }
            KeyCode::Esc => {
                if self.editor.history_menu_visible() {
                    self.editor.hide_history_menu();
                } else {
                    self.editor.clear();
                }
            }
            KeyCode::Up => self.navigate_history(true),
            KeyCode::Down => self.navigate_history(false),
            KeyCode::Char('x') if mods.contains(KeyModifiers::ALT) => {
                if let Some(selected) = self.editor.selected_history_item() {
                    self.history.remove_command(&selected);
                    self.editor.refresh_history_menu(&self.history);
                }
            }
            KeyCode::Char(c) if !mods.contains(KeyModifiers::CONTROL) => {
                self.editor.insert_char(c);
                self.editor.refresh_history_menu(&self.history);
            }
            _ => {}
        }
        Ok(None)
    }

    fn navigate_history(&mut self, up: bool) {
        if self.editor.history_menu_visible() {
            if self.editor.advance_history_menu(up) {
                return;
            }
            let restore = self.editor.original_typed().unwrap_or_default();
            self.editor.hide_history_menu();
            self.editor.set_text(&restore);
            return;
        }
        let entry = if up { self.history.previous() } else { self.history.next() };
        match entry {
            Some(cmd) => self.editor.set_text(cmd),
            None => {
                if !up {
                    self.editor.clear();
                }
            }
        }
    }

    fn submit(&mut self) -> Option<ReplOutcome> {
        let line = self.editor.text().to_string();
        self.editor.clear();
        if line.trim().is_empty() {
            return None;
        }
        if line.eq_ignore_ascii_case(&self.policy.exit_literal) || line.eq_ignore_ascii_case("exit") {
            return Some(ReplOutcome::Exited);
        }
        if let Some(rest) = line.strip_prefix(self.policy.command_branch) {
            self.history.add(&line);
            self.state = ReplState::Paused;
            return Some(ReplOutcome::NestedCommand(rest.to_string()));
        }

        let mapped = self.policy.apply_alias(&line);
        println!("{}{}", self.policy.prompt_prefix, line);
        let _ = self.session.write_line(&mapped);
        self.history.add(&line);
        None
    }
}

fn collapse_blank_runs(text: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    // `split('\n')` yields a trailing "" when `text` ends in '\n' — that element is an
    // artifact of the split, not a real blank line, so it must not feed the blank-run counter.
    if text.ends_with('\n') {
        lines.pop();
    }

    let mut out = String::new();
    let mut blank_run = 0;
    for line in lines {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Credential;

    #[test]
    fn collapses_three_or_more_blank_lines_to_two() {
        let input = "a\n\n\n\n\nb\n";
        let out = collapse_blank_runs(input);
        assert_eq!(out, "a\n\n\nb\n");
    }

    fn test_repl() -> Repl {
        let credential = Credential::Password { username: "test".to_string(), password: "test".to_string() };
        let session = HostSession::new("127.0.0.1".to_string(), 22, credential, 0);
        Repl::new(session, ReplPolicy::default(), History::new(crate::history::default_max_size()))
    }

    #[test]
    fn nested_command_pauses_and_is_recorded_in_history() {
        let mut repl = test_repl();
        repl.editor.set_text(":book list");

        let outcome = repl.submit();
        match outcome {
            Some(ReplOutcome::NestedCommand(rest)) => assert_eq!(rest, "book list"),
            _ => panic!("expected a nested command outcome"),
        }
        assert_eq!(repl.state, ReplState::Paused);
        assert_eq!(repl.history.previous(), Some(":book list"));
    }

    #[test]
    fn exit_literal_submits_exited_outcome() {
        let mut repl = test_repl();
        repl.editor.set_text("exit");
        assert!(matches!(repl.submit(), Some(ReplOutcome::Exited)));
    }

    #[test]
    fn resume_clears_accumulated_buffer_and_returns_to_live() {
        let mut repl = test_repl();
        repl.state = ReplState::Reconnecting;
        repl.buffer.text.lock().unwrap().push_str("stale output from before the drop\n");

        repl.resume();

        assert_eq!(repl.state, ReplState::Live);
        assert!(repl.buffer.text.lock().unwrap().is_empty());
    }
}
