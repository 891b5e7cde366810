//! Ambient configuration layer.
//!
//! A single on-disk JSON document at `<app-dir>/config.json`, loaded once at startup and
//! explicitly rewritten by `config set`. Mirrors `~/.hostpilot/config.json`
//! convention, renamed to this toolkit's own app directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::StorageObject;

/// -1 = infinite, 0 = disabled, N>0 = bounded. Matches `PassThrough.NumberOfReconnectionAttempts`.
pub const RECONNECT_INFINITE: i32 = -1;
pub const RECONNECT_DISABLED: i32 = 0;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub pub_key_path: PathBuf,
    pub ssh_client_app_path: PathBuf,
    /// `Connection.AddressBooksLocation`: files or directories; directories are scanned for `*.xadr`.
    pub address_book_locations: Vec<PathBuf>,
    /// `PassThrough.UseHistoryForPassThrough`.
    pub use_history_for_pass_through: bool,
    /// `PassThrough.NumberOfReconnectionAttempts`.
    pub number_of_reconnection_attempts: i32,
    pub version: Option<u32>,
    #[serde(skip)]
    pub mode: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pub_key_path: PathBuf::new(),
            ssh_client_app_path: PathBuf::from("ssh"),
            address_book_locations: Vec::new(),
            use_history_for_pass_through: true,
            number_of_reconnection_attempts: 6,
            version: Some(1),
            mode: 0,
        }
    }
}

impl Config {
    pub fn init(mode: u8) -> Self {
        let home_dir = match dirs::home_dir() {
            Some(h) => h,
            None => {
                eprintln!("cannot find the user's home directory");
                std::process::exit(1);
            }
        };
        let app_dir = match crate::ops::ensure_app_dir(&home_dir) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("unable to prepare config directory: {}", e);
                std::process::exit(1);
            }
        };
        let config_file_path = app_dir.join("config.json");
        let chosen_config = if mode == 1 {
            let test_path = app_dir.join("config_test.json");
            if test_path.exists() { test_path } else { config_file_path.clone() }
        } else {
            config_file_path.clone()
        };

        if !config_file_path.exists() {
            let config = Config {
                pub_key_path: home_dir.join(".ssh").join("id_rsa.pub"),
                mode,
                ..Config::default()
            };
            config.save_to(&config_file_path);
            return config;
        }

        let mut conf: Config = Config::read_from(chosen_config);
        conf.mode = mode;
        conf
    }

    /// Save this config back to `<app-dir>/config.json` (or `config_test.json` under test mode).
    pub fn save_to_storage(&self) {
        let Some(home_dir) = dirs::home_dir() else {
            eprintln!("cannot find the user's home directory, unable to save config");
            return;
        };
        let app_dir = match crate::ops::ensure_app_dir(&home_dir) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("unable to prepare config directory: {}", e);
                return;
            }
        };
        let config_path = if self.mode == 1 {
            app_dir.join("config_test.json")
        } else {
            app_dir.join("config.json")
        };
        self.save_to(&config_path);
    }

    /// `config get <key>`: returns the textual value of a known key, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "pub_key_path" => Some(self.pub_key_path.to_string_lossy().to_string()),
            "ssh_client_app_path" => Some(self.ssh_client_app_path.to_string_lossy().to_string()),
            "use_history_for_pass_through" => Some(self.use_history_for_pass_through.to_string()),
            "number_of_reconnection_attempts" => {
                Some(self.number_of_reconnection_attempts.to_string())
            }
            "address_book_locations" => Some(
                self.address_book_locations
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
            _ => None,
        }
    }

    /// `config set <key> <value>`: returns `Ok(())` on a recognized key, `Err(())` otherwise.
    pub fn set(&mut self, key: &str, value: &str) -> std::result::Result<(), ()> {
        match key {
            "pub_key_path" => self.pub_key_path = PathBuf::from(value),
            "ssh_client_app_path" => self.ssh_client_app_path = PathBuf::from(value),
            "use_history_for_pass_through" => {
                self.use_history_for_pass_through = matches!(value, "true" | "1" | "yes")
            }
            "number_of_reconnection_attempts" => {
                self.number_of_reconnection_attempts = value.parse().map_err(|_| ())?
            }
            "address_book_locations" => {
                self.address_book_locations =
                    value.split([';', ',']).map(str::trim).filter(|s| !s.is_empty()).map(PathBuf::from).collect()
            }
            _ => return Err(()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let mut cfg = Config::default();
        cfg.set("number_of_reconnection_attempts", "3").unwrap();
        assert_eq!(cfg.get("number_of_reconnection_attempts").as_deref(), Some("3"));
        assert!(cfg.set("not_a_real_key", "x").is_err());
    }

    #[test]
    fn address_book_locations_split_on_semicolon_or_comma() {
        let mut cfg = Config::default();
        cfg.set("address_book_locations", "/a/b.xadr;/c/d, /e").unwrap();
        assert_eq!(cfg.address_book_locations.len(), 3);
    }
}
