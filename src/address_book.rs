//! Address book (C11): resolves a short alias to connection details by reading `*.xadr`
//! files listed in `Config::address_book_locations`. Built on the
//! `StorageObject`/JSON-document loading style, adapted to the book's own plain
//! `alias=host:port,username[,password|keypath]` line format rather than a SQLite table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ActError, Result};
use crate::session::Credential;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub alias: String,
    pub host_address: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
}

impl AddressBookEntry {
    pub fn to_credential(&self) -> Result<Credential> {
        if let Some(key) = &self.private_key_path {
            return Ok(Credential::PrivateKey {
                username: self.username.clone(),
                private_key_path: key.clone(),
            });
        }
        match &self.password {
            Some(password) => {
                Ok(Credential::Password { username: self.username.clone(), password: password.clone() })
            }
            None => Err(ActError::AddressBookEntryIncomplete(self.alias.clone())),
        }
    }
}

/// Load and merge every `*.xadr` file found across `locations`, later files winning on
/// duplicate alias.
pub fn load_entries(locations: &[PathBuf]) -> Vec<AddressBookEntry> {
    let mut by_alias = std::collections::BTreeMap::new();
    for loc in locations {
        for path in xadr_files_under(loc) {
            if let Ok(text) = std::fs::read_to_string(&path) {
                for entry in parse_xadr(&text) {
                    by_alias.insert(entry.alias.clone(), entry);
                }
            }
        }
    }
    by_alias.into_values().collect()
}

fn xadr_files_under(loc: &Path) -> Vec<PathBuf> {
    if loc.is_file() {
        return vec![loc.to_path_buf()];
    }
    if !loc.is_dir() {
        return Vec::new();
    }
    walkdir::WalkDir::new(loc)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("xadr"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// One line per entry: `alias=host:port,username[,password=...|keypath=...]`.
fn parse_xadr(text: &str) -> Vec<AddressBookEntry> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((alias, rest)) = line.split_once('=') else { continue };
        let mut fields = rest.split(',');
        let Some(host_port) = fields.next() else { continue };
        let Some(username) = fields.next() else { continue };
        let (host_address, port) = match host_port.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().unwrap_or(22)),
            None => (host_port.to_string(), 22),
        };
        let mut password = None;
        let mut private_key_path = None;
        for field in fields {
            if let Some(p) = field.strip_prefix("password=") {
                password = Some(p.to_string());
            } else if let Some(p) = field.strip_prefix("keypath=") {
                private_key_path = Some(PathBuf::from(p));
            }
        }
        out.push(AddressBookEntry {
            alias: alias.trim().to_string(),
            host_address,
            port,
            username: username.trim().to_string(),
            password,
            private_key_path,
        });
    }
    out
}

pub fn find<'a>(entries: &'a [AddressBookEntry], alias: &str) -> Option<&'a AddressBookEntry> {
    entries.iter().find(|e| e.alias.eq_ignore_ascii_case(alias))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_password_entry() {
        let text = "home=10.0.0.5:22,admin,password=secret\n";
        let entries = parse_xadr(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].alias, "home");
        assert_eq!(entries[0].password.as_deref(), Some("secret"));
    }

    #[test]
    fn parses_keypath_entry_and_default_port() {
        let text = "lab=lab.local,root,keypath=/home/root/.ssh/id_rsa\n";
        let entries = parse_xadr(text);
        assert_eq!(entries[0].port, 22);
        assert!(entries[0].private_key_path.is_some());
    }

    #[test]
    fn incomplete_entry_fails_to_build_credential() {
        let entry = AddressBookEntry {
            alias: "x".to_string(),
            host_address: "h".to_string(),
            port: 22,
            username: "u".to_string(),
            password: None,
            private_key_path: None,
        };
        assert!(entry.to_credential().is_err());
    }
}
