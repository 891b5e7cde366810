//! Command handlers: thin glue between the CLI surface and the session/shell/archive/
//! upload/history/repl subsystems. Follows the crate's `commands.rs` style — anyhow
//! `Result` returns, an error printed to stderr rather than unwound where a command's
//! failure shouldn't tear down the whole process.

use std::path::PathBuf;
use std::sync::Arc;

use crate::address_book::{self, AddressBookEntry};
use crate::cli::{BookCommand, Cli, Commands, ConfigCommand};
use crate::config::Config;
use crate::error::{ActError, Result};
use crate::history::History;
use crate::repl::{Repl, ReplOutcome, ReplPolicy};
use crate::session::{Credential, HostSession};
use crate::upload::{self, UploadOptions};

pub struct UploadArgs {
    pub target: String,
    pub program_file: PathBuf,
    pub slot: u32,
    pub changed_only: bool,
    pub kill_program: bool,
    pub do_not_start: bool,
    pub no_ip_table: bool,
    pub no_zig: bool,
    pub verbose: bool,
    pub force: bool,
}

/// Resolve `target` against the address book first, falling back to `user@host[:port]`
/// syntax with credentials sourced from a public key file if one is configured.
fn resolve_target(config: &Config, target: &str) -> Result<(String, u16, Credential)> {
    let entries = address_book::load_entries(&config.address_book_locations);
    if let Some(entry) = address_book::find(&entries, target) {
        let credential = entry.to_credential()?;
        return Ok((entry.host_address.clone(), entry.port, credential));
    }

    let (username, host, port) = crate::parse::parse_remote_host(target)
        .map_err(|e| ActError::CredentialsMissing(e.to_string()))?;

    if config.pub_key_path.as_os_str().is_empty() || !config.pub_key_path.exists() {
        return Err(ActError::CredentialsMissing(target.to_string()));
    }
    let private_key_path = private_key_path_from_pub(&config.pub_key_path);
    Ok((host, port, Credential::PrivateKey { username, private_key_path }))
}

fn private_key_path_from_pub(pub_key_path: &std::path::Path) -> PathBuf {
    let s = pub_key_path.to_string_lossy();
    if let Some(stripped) = s.strip_suffix(".pub") {
        PathBuf::from(stripped)
    } else {
        pub_key_path.to_path_buf()
    }
}

fn new_host_session(config: &Config, host: String, port: u16, credential: Credential) -> Arc<HostSession> {
    HostSession::new(host, port, credential, config.number_of_reconnection_attempts)
}

pub fn handle_upload(config: &Config, args: UploadArgs) -> Result<()> {
    if !(1..=10).contains(&args.slot) {
        return Err(ActError::InvalidSlot(args.slot));
    }
    let (host, port, credential) = resolve_target(config, &args.target)?;
    let session = new_host_session(config, host, port, credential);

    let opts = UploadOptions {
        slot: args.slot,
        program_file: args.program_file,
        changed_only: args.changed_only,
        kill_program: args.kill_program,
        do_not_start: args.do_not_start,
        no_ip_table: args.no_ip_table,
        no_zig: args.no_zig,
        verbose: args.verbose,
        force: args.force,
    };
    let summary = upload::run_upload(&session, &opts)?;
    session.dispose();

    if summary.no_changes {
        return Ok(());
    }
    println!(
        "uploaded {} file(s), {} byte(s), {} IP table entr(ies), {} failure(s)",
        summary.files_uploaded,
        summary.bytes_uploaded,
        summary.ip_table_entries_added,
        summary.failures.len()
    );
    if !summary.failures.is_empty() {
        for f in &summary.failures {
            eprintln!("  - {}", f);
        }
    }
    Ok(())
}

pub fn handle_connect(config: &Config, target: String) -> Result<()> {
    let (host, port, credential) = resolve_target(config, &target)?;
    let session = new_host_session(config, host.clone(), port, credential);
    session.connect_shell()?;

    let local_app_data = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    let history_path = crate::history::history_path_for_host(&local_app_data, &host);
    let history = if config.use_history_for_pass_through {
        History::load(&history_path, crate::history::default_max_size())
    } else {
        History::new(crate::history::default_max_size())
    };

    crate::ops::setup_terminal()?;
    let mut repl = Repl::new(session.clone(), ReplPolicy::default(), history);
    loop {
        match repl.run()? {
            ReplOutcome::Exited => break,
            ReplOutcome::NestedCommand(nested) => {
                crate::ops::restore_terminal()?;
                if let Err(e) = dispatch_nested(config, &nested) {
                    eprintln!("{}", e);
                }
                crate::ops::setup_terminal()?;
                repl.resume();
            }
        }
    }
    crate::ops::restore_terminal()?;
    if config.use_history_for_pass_through {
        repl.history().save(&history_path);
    }
    session.dispose();
    Ok(())
}

/// Dispatch a `:`-prefixed line submitted mid-REPL to the same command table `main` uses,
/// so e.g. `:book list` prints the address book without leaving the pass-through session.
/// `upload`/`connect` are refused here — re-entering either one from inside an already-open
/// session isn't meaningful.
fn dispatch_nested(config: &Config, nested: &str) -> Result<()> {
    let mut argv = vec!["act".to_string()];
    argv.extend(nested.split_whitespace().map(str::to_string));

    let cli = match Cli::try_parse_from(&argv) {
        Ok(cli) => cli,
        Err(e) => {
            println!("{}", e);
            return Ok(());
        }
    };

    match cli.command {
        Commands::Book(cmd) => handle_book(config, cmd),
        Commands::Config(cmd) => handle_config(config.clone(), cmd),
        Commands::About => handle_about(),
        Commands::Upload { .. } | Commands::Connect { .. } => {
            println!("'{}' cannot be run as a nested command", nested);
            Ok(())
        }
    }
}

pub fn handle_book(config: &Config, command: BookCommand) -> Result<()> {
    let entries = address_book::load_entries(&config.address_book_locations);
    match command {
        BookCommand::List => {
            if entries.is_empty() {
                println!("no address-book entries found");
            }
            for entry in &entries {
                println!("{}\t{}@{}:{}", entry.alias, entry.username, entry.host_address, entry.port);
            }
        }
        BookCommand::Show { alias } => match address_book::find(&entries, &alias) {
            Some(entry) => print_entry(entry),
            None => println!("no address-book entry named '{}'", alias),
        },
    }
    Ok(())
}

fn print_entry(entry: &AddressBookEntry) {
    println!("alias:    {}", entry.alias);
    println!("host:     {}", entry.host_address);
    println!("port:     {}", entry.port);
    println!("username: {}", entry.username);
    println!("auth:     {}", if entry.private_key_path.is_some() { "private key" } else { "password" });
}

pub fn handle_config(mut config: Config, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => println!("unknown configuration key: {}", key),
        },
        ConfigCommand::Set { key, value } => match config.set(&key, &value) {
            Ok(()) => {
                config.save_to_storage();
                println!("{} = {}", key, value);
            }
            Err(()) => println!("unknown configuration key: {}", key),
        },
    }
    Ok(())
}

pub fn handle_about() -> Result<()> {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    Ok(())
}
