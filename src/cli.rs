use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version, about = "SSH/SFTP toolkit for Crestron control-system program uploads", long_about = None)]
pub struct Cli {
    #[clap(long, global = true, help = "Write debug-level tracing to <app-dir>/logs/debug.log")]
    pub debug: bool,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Upload a program package and (re)start it on a device", display_order = 1)]
    Upload {
        #[clap(help = "Address book alias, or user@host[:port]")]
        target: String,
        #[clap(help = "Local .cpz/.clz/.lpz program package")]
        program_file: PathBuf,
        #[clap(short, long, help = "Program slot, 1-10")]
        slot: u32,
        #[clap(short = 'c', long, help = "Upload only new/changed files instead of the whole package")]
        changed_only: bool,
        #[clap(short = 'k', long, help = "Stop and unregister the running program before uploading")]
        kill_program: bool,
        #[clap(short = 'n', long, help = "Load the program but do not start it")]
        do_not_start: bool,
        #[clap(long, help = "Skip IP table configuration from the package's .dip file")]
        no_ip_table: bool,
        #[clap(long, help = "Skip packaging and uploading a .sig signature as .zig")]
        no_zig: bool,
        #[clap(short, long, help = "Print device command/response traces")]
        verbose: bool,
        #[clap(long, help = "Upload all files even if nothing appears to have changed")]
        force: bool,
    },
    #[clap(about = "Open an interactive pass-through session to a device shell", display_order = 2)]
    Connect {
        #[clap(help = "Address book alias, or user@host[:port]")]
        target: String,
    },
    #[clap(subcommand, about = "Manage the saved address book", display_order = 3)]
    Book(BookCommand),
    #[clap(subcommand, about = "View or change persisted configuration", display_order = 4)]
    Config(ConfigCommand),
    #[clap(about = "Print version and build information", display_order = 5)]
    About,
}

#[derive(Subcommand, Debug)]
pub enum BookCommand {
    #[clap(name = "list", about = "List every known address-book alias")]
    List,
    #[clap(name = "show", about = "Show the resolved connection details for one alias")]
    Show { alias: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    #[clap(name = "get", about = "Print the value of a configuration key")]
    Get { key: String },
    #[clap(name = "set", about = "Set a configuration key and persist it")]
    Set { key: String, value: String },
}
