// src/bin/dragon.rs

use clap::Parser;
use colored::Colorize;
use dragon::cli::{self, Cli, args::Options};
use std::env;
use std::io::Write as _;
use std::process;

/// The main entry point: parses the raw argument stream, sets up logging,
/// dispatches, and performs centralized error handling. Library code never
/// exits the process; every early-exit path surfaces here as an exit code.
fn main() {
    let cli = Cli::parse();
    let options = match Options::parse(&cli.args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    setup_logging(&options);

    // Root-owned artifacts make the workspace unusable for everyone else.
    if env::var("USER").ok().as_deref() == Some("root") {
        log::error!("Please do not run this script as root.");
        process::exit(1);
    }

    match cli::run(options) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("\n{}: {}", "Error".red().bold(), err);
            process::exit(1);
        }
    }
}

/// Compact colored level tags on stderr; verbose mode raises the filter to
/// debug. `RUST_LOG` still wins over both.
fn setup_logging(options: &Options) {
    if !options.colors {
        colored::control::set_override(false);
    }

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(if options.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            let tag = match record.level() {
                log::Level::Error => "[E]".red(),
                log::Level::Warn => "[W]".yellow(),
                log::Level::Info => "[I]".green(),
                log::Level::Debug => "[D]".normal(),
                log::Level::Trace => "[T]".dimmed(),
            };
            writeln!(buf, "{} {}", tag, record.args())
        })
        .init();
}
