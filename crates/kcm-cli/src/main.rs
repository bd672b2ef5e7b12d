//! CLI entrypoint for the kcm local cluster manager.
//!
//! The binary delegates to [`kcm_cli::run`], which loads configuration,
//! reconciles recorded processes, and dispatches the requested command.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    kcm_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
