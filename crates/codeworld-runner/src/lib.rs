//! Shared entry point for the single-shot sandbox runners.
//!
//! Both binaries take the program path as their only argument, read one JSON
//! payload from stdin, and print exactly one JSON line to stdout. Diagnostics
//! go to stderr at `warn` unless `RUST_LOG` says otherwise.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::Level;

use codeworld_core::sandbox::protocol::{error_line, EXIT_USAGE};
use codeworld_core::{init_tracing, serve, spawn_worker, ResourceLimits, RunnerKind};

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run one sandboxed CodeWorld program against a JSON payload on stdin")]
pub struct RunnerArgs {
    /// Path to the candidate program
    pub program: PathBuf,
}

/// What a runner process should print and the status it exits with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerExit {
    pub line: String,
    pub code: i32,
}

/// Parse `args` for `kind`. Help and version requests are printed and exit
/// the process as usual; any other usage error becomes a protocol line.
pub fn parse_args<I, T>(kind: RunnerKind, args: I) -> std::result::Result<RunnerArgs, RunnerExit>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let command = <RunnerArgs as clap::CommandFactory>::command().name(kind.binary_name());
    let matches = command.try_get_matches_from(args).and_then(|m| {
        <RunnerArgs as clap::FromArgMatches>::from_arg_matches(&m)
    });
    match matches {
        Ok(args) => Ok(args),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(_) => Err(RunnerExit {
            line: error_line(&format!("usage: {} <program>", kind.binary_name())),
            code: EXIT_USAGE,
        }),
    }
}

/// Serve one request on a worker thread with the default resource limits.
pub fn execute(kind: RunnerKind, args: RunnerArgs) -> Result<RunnerExit> {
    let limits = ResourceLimits::default();
    let (line, code) = spawn_worker(move || serve(kind, &args.program, std::io::stdin(), &limits))
        .with_context(|| format!("{} worker failed", kind.binary_name()))?;
    Ok(RunnerExit { line, code })
}

/// Full runner `main`: returns the process exit status.
pub fn run(kind: RunnerKind) -> Result<i32> {
    init_tracing(false, Level::WARN);

    let exit = match parse_args(kind, std::env::args_os()) {
        Ok(args) => execute(kind, args)?,
        Err(usage) => usage,
    };
    println!("{}", exit.line);
    Ok(exit.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_parse_args_accepts_program_path() {
        let args = parse_args(RunnerKind::Strategy, ["strategy-runner", "/tmp/p.cw"]).unwrap();
        assert_eq!(args.program, PathBuf::from("/tmp/p.cw"));
    }

    #[test]
    fn test_missing_program_is_usage_line() {
        let exit = parse_args(RunnerKind::Scoring, ["scoring-runner"]).unwrap_err();
        assert_eq!(exit.code, EXIT_USAGE);
        let doc: Value = serde_json::from_str(&exit.line).unwrap();
        assert_eq!(doc["error"], "usage: scoring-runner <program>");
    }

    #[test]
    fn test_extra_arguments_are_usage_error() {
        let exit = parse_args(RunnerKind::Strategy, ["strategy-runner", "a", "b"]).unwrap_err();
        assert_eq!(exit.code, EXIT_USAGE);
    }
}
