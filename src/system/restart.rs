// src/system/restart.rs

use crate::core::{context::RunOptions, task::TaskError};
use std::env;
use std::process::Command;

/// Rebuilds the flag set a child invocation needs to behave like its parent:
/// product/variant selector, job count, whichever global flags were active,
/// then the delegated task arguments (split on whitespace, since they were
/// composed as `-t <name>` strings).
pub fn restart_args(
    opts: &RunOptions,
    product: &str,
    variant: &str,
    args: &[String],
) -> Vec<String> {
    let mut cmd_args = vec![
        "-p".to_string(),
        format!("{product}-{variant}"),
        "-j".to_string(),
        opts.jobs.to_string(),
    ];

    let flags = [
        (opts.verbose, "-v"),
        (opts.dry_run, "-n"),
        (opts.append_args, "-a"),
        (opts.keep_going, "-k"),
        (opts.license_scan, "--license-scan"),
        (opts.license_packages, "--license-packages"),
    ];
    for (active, flag) in flags {
        if active {
            cmd_args.push(flag.to_string());
        }
    }
    if let Some(build_id) = &opts.build_id {
        cmd_args.push("-b".to_string());
        cmd_args.push(build_id.clone());
    }

    for arg in args {
        cmd_args.extend(arg.split_whitespace().map(str::to_string));
    }
    cmd_args
}

/// Re-invokes the program as a fresh process against another product/variant.
///
/// This is a deliberate process boundary: the child constructs its own
/// context from scratch instead of inheriting any in-memory state. In
/// dry-run mode the re-invocation is only logged, like any other command.
pub fn restart(
    opts: &RunOptions,
    product: &str,
    variant: &str,
    args: &[String],
) -> Result<(), TaskError> {
    let cmd_args = restart_args(opts, product, variant, args);
    let exe = env::current_exe().map_err(|source| TaskError::Spawn {
        command: "restart".to_string(),
        source,
    })?;
    let display = format!("{} {}", exe.display(), cmd_args.join(" "));

    if opts.dry_run {
        log::info!("Dry run: {display}");
        return Ok(());
    }
    log::info!("Restarting: {display}");

    let status = Command::new(&exe)
        .args(&cmd_args)
        .status()
        .map_err(|source| TaskError::Spawn {
            command: display.clone(),
            source,
        })?;

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(TaskError::CommandFailed(code)),
        None => Err(TaskError::Interrupted),
    }
}
