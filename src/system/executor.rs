// src/system/executor.rs

use crate::core::task::TaskError;
use std::collections::BTreeMap;
use std::env;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Prepends the environment overlay as inline `KEY="value"` assignments.
/// The overlay is a `BTreeMap`, so the prefix order is deterministic.
fn with_env_prefix(command_line: &str, extra_env: &BTreeMap<String, String>) -> String {
    let mut command = String::with_capacity(command_line.len());
    for (key, value) in extra_env {
        let _ = write!(command, "{key}=\"{value}\" ");
    }
    command.push_str(command_line);
    command
}

fn resolve_cwd(cwd: Option<&Path>) -> PathBuf {
    match cwd {
        Some(path) => path.to_path_buf(),
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Runs a command line through the shell, in `cwd` (current directory when
/// `None`), with `extra_env` both exported and embedded in the logged line.
///
/// In dry-run mode the fully composed command is only logged. If a dry-run
/// suffix is supplied instead, the suffix is appended and the command still
/// runs (for tools that have their own pretend mode).
///
/// A non-zero exit status surfaces as [`TaskError::CommandFailed`] with the
/// code; death by signal as [`TaskError::Interrupted`].
pub fn exec_cmd(
    command_line: &str,
    cwd: Option<&Path>,
    extra_env: &BTreeMap<String, String>,
    dry_run: bool,
    dry_run_suffix: Option<&str>,
) -> Result<(), TaskError> {
    let cwd = resolve_cwd(cwd);
    let clean_cwd = dunce::simplified(&cwd);
    let mut command = with_env_prefix(command_line, extra_env);

    if dry_run {
        match dry_run_suffix {
            None | Some("") => {
                log::info!("Dry run in '{}': {}", clean_cwd.display(), command);
                return Ok(());
            }
            Some(suffix) => {
                command.push(' ');
                command.push_str(suffix);
            }
        }
    }

    log::info!("In '{}': {}", clean_cwd.display(), command);

    let status = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(clean_cwd)
        .envs(extra_env)
        .status()
        .map_err(|source| TaskError::Spawn {
            command: command.clone(),
            source,
        })?;

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(TaskError::CommandFailed(code)),
        None => Err(TaskError::Interrupted),
    }
}

/// Runs a command line and returns its standard output as a string.
/// Failures are ignored: a spawn error logs a warning and yields an empty
/// string, a non-zero exit yields whatever was captured. With `single_line`
/// the output is collapsed to one trimmed line.
pub fn exec_shell(
    command_line: &str,
    cwd: Option<&Path>,
    extra_env: &BTreeMap<String, String>,
    single_line: bool,
) -> String {
    let cwd = resolve_cwd(cwd);

    let output = Command::new("sh")
        .arg("-c")
        .arg(command_line)
        .current_dir(dunce::simplified(&cwd))
        .envs(extra_env)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output();

    match output {
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stdout).into_owned();
            if single_line {
                text.replace('\n', " ").trim().to_string()
            } else {
                text
            }
        }
        Err(err) => {
            log::warn!("{command_line}: {err}");
            String::new()
        }
    }
}
