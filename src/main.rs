use clap::Parser;
use std::fs::OpenOptions;
use tracing_appender::non_blocking;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use avconsole_toolkit::cli;
use avconsole_toolkit::commands;
use avconsole_toolkit::config::Config;
use avconsole_toolkit::ops;

fn main() {
    let cli = cli::Cli::parse();
    let config = Config::init(0);
    init_tracing(&config, cli.debug);

    let result = match cli.command {
        cli::Commands::Upload { target, program_file, slot, changed_only, kill_program, do_not_start, no_ip_table, no_zig, verbose, force } => {
            commands::handle_upload(
                &config,
                commands::UploadArgs {
                    target,
                    program_file,
                    slot,
                    changed_only,
                    kill_program,
                    do_not_start,
                    no_ip_table,
                    no_zig,
                    verbose,
                    force,
                },
            )
        }
        cli::Commands::Connect { target } => commands::handle_connect(&config, target),
        cli::Commands::Book(book_cmd) => commands::handle_book(&config, book_cmd),
        cli::Commands::Config(config_cmd) => commands::handle_config(config, config_cmd),
        cli::Commands::About => commands::handle_about(),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn init_tracing(cfg: &Config, debug: bool) {
    let logs_dir = match dirs::home_dir().and_then(|home_dir| ops::ensure_app_dir(&home_dir).ok()) {
        Some(p) => p.join("logs"),
        None => {
            let home = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
            home.join(".avconsoletoolkit").join("logs")
        }
    };
    let _ = std::fs::create_dir_all(&logs_dir);

    let log_path = logs_dir.join("debug.log");
    let level_str = if debug { "debug" } else { "warn" };
    let _ = cfg;

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let (non_blocking_writer, guard) = non_blocking(file);
            let _ = Box::leak(Box::new(guard));
            let file_layer = fmt::layer()
                .with_writer(non_blocking_writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new(level_str));
            let _ = tracing_subscriber::registry().with(file_layer).try_init();
        }
        Err(e) => {
            eprintln!("warning: could not open debug log at {}: {}", log_path.display(), e);
        }
    }
}
