//! Device-specific REPL behavior carried as a plain data object rather than through virtual
//! dispatch, per the design decision recorded in DESIGN.md: one concrete `ReplPolicy` type,
//! constructed differently per device family instead of a trait hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

pub struct ReplPolicy {
    /// Text the user can type to exit (compared case-insensitively, alongside the literal `"exit"`).
    pub exit_literal: String,
    /// Device command sent on `Ctrl+X` before disconnecting, if the shell is still connected.
    pub exit_literal_device_command: Option<String>,
    /// Prefix character that marks a line as a nested out-of-band command (default `:`).
    pub command_branch: char,
    /// Case-insensitive first-word aliasing map; arguments after the first word are preserved.
    pub aliases: HashMap<String, String>,
    /// Printed before the echoed original command text.
    pub prompt_prefix: String,
    pub on_tab: Option<Arc<dyn Fn(&str) -> String + Send + Sync>>,
    pub on_connected: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for ReplPolicy {
    fn default() -> Self {
        ReplPolicy {
            exit_literal: "exit".to_string(),
            exit_literal_device_command: None,
            command_branch: ':',
            aliases: HashMap::new(),
            prompt_prefix: "> ".to_string(),
            on_tab: None,
            on_connected: None,
        }
    }
}

impl ReplPolicy {
    /// Substitute the first whitespace-delimited word if it matches `aliases` case-insensitively,
    /// preserving the rest of the line untouched.
    pub fn apply_alias(&self, line: &str) -> String {
        let Some(first_space) = line.find(char::is_whitespace) else {
            return self.alias_lookup(line).unwrap_or_else(|| line.to_string());
        };
        let (first_word, rest) = line.split_at(first_space);
        match self.alias_lookup(first_word) {
            Some(mapped) => format!("{}{}", mapped, rest),
            None => line.to_string(),
        }
    }

    fn alias_lookup(&self, word: &str) -> Option<String> {
        self.aliases.iter().find(|(from, _)| from.eq_ignore_ascii_case(word)).map(|(_, to)| to.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_alias_preserves_arguments() {
        let mut policy = ReplPolicy::default();
        policy.aliases.insert("ls".to_string(), "dir".to_string());
        assert_eq!(policy.apply_alias("LS -la"), "dir -la");
        assert_eq!(policy.apply_alias("pwd"), "pwd");
    }
}
