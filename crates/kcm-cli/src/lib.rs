//! Command-line runtime for the kcm local cluster manager.
//!
//! The runtime parses arguments, loads layered configuration, serialises
//! mutating commands through the writer lock, reconciles recorded processes
//! against the operating system, and dispatches the command. Configuration
//! loading and IO streams can be substituted in tests.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use kcm_config::{Config, Layout};
use kcm_core::lifecycle::LifecycleSettings;
use kcm_core::{
    ArtifactProvisioner, HttpFetcher, LifecycleManager, LockError, Store, SystemSupervisor,
    WriterLock, telemetry,
};
use tracing::{error, warn};

mod cli;
mod commands;
mod config;
mod errors;
mod output;

use cli::{Cli, CliCommand};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
use config::split_config_arguments;
pub(crate) use errors::AppError;

/// Exit status for an invariant violation that must stop the tool
/// (`EX_SOFTWARE`).
const EXIT_FATAL: u8 = 70;

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    stdout: &'a mut W,
    stderr: &'a mut E,
    loader: &'a L,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    const fn new(stdout: &'a mut W, stderr: &'a mut E, loader: &'a L) -> Self {
        Self {
            stdout,
            stderr,
            loader,
        }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);

        let cli = match Cli::try_parse_from(&split.command_arguments) {
            Ok(cli) => cli,
            Err(usage) => return self.report_usage(&usage),
        };

        match self.execute(cli.command, &split.config_arguments) {
            Ok(exit_code) => exit_code,
            Err(failure) if failure.is_fatal() => {
                error!(target: "kcm::cli", error = %failure, "aborting after a fatal error");
                let _ = writeln!(self.stderr, "fatal: {failure}");
                ExitCode::from(EXIT_FATAL)
            }
            Err(failure) => {
                let _ = writeln!(self.stderr, "{failure}");
                ExitCode::FAILURE
            }
        }
    }

    fn report_usage(&mut self, usage: &clap::Error) -> ExitCode {
        if usage.use_stderr() {
            let _ = write!(self.stderr, "{usage}");
            ExitCode::from(2)
        } else {
            let _ = write!(self.stdout, "{usage}");
            ExitCode::SUCCESS
        }
    }

    fn execute(
        &mut self,
        command: CliCommand,
        config_arguments: &[OsString],
    ) -> Result<ExitCode, AppError> {
        let config = self.loader.load(config_arguments)?;
        telemetry::initialise(&config)?;
        if matches!(command, CliCommand::Version) {
            commands::write_version(self.stdout)?;
            return Ok(ExitCode::SUCCESS);
        }

        let layout = Layout::from_config(&config)?;
        layout.prepare()?;
        let lock = if command.is_mutating() {
            Some(WriterLock::acquire(&layout.lock_path())?)
        } else {
            None
        };

        let mut manager = open_manager(&config, layout)?;
        reconcile(&mut manager, lock.is_some())?;
        let exit_code = commands::execute(command, &mut manager, self.stdout)?;
        self.stdout.flush()?;
        Ok(exit_code)
    }
}

type SystemManager = LifecycleManager<SystemSupervisor, HttpFetcher>;

fn open_manager(config: &Config, layout: Layout) -> Result<SystemManager, AppError> {
    let store = Store::open(&layout.database_path())?;
    let provisioner = ArtifactProvisioner::new(
        layout,
        config.mirror_url.clone(),
        config.archive_url.clone(),
        HttpFetcher::default(),
    );
    Ok(LifecycleManager::new(
        store,
        SystemSupervisor,
        provisioner,
        LifecycleSettings::from_config(config)?,
    ))
}

/// Drops status rows of dead processes before any command runs.
///
/// Read-only commands take the lock just for the sweep and skip it when
/// another invocation is busy.
fn reconcile(manager: &mut SystemManager, holds_lock: bool) -> Result<(), AppError> {
    let _sweep_lock = if holds_lock {
        None
    } else {
        match WriterLock::acquire(&manager.layout().lock_path()) {
            Ok(lock) => Some(lock),
            Err(LockError::Held { pid }) => {
                warn!(
                    target: "kcm::cli",
                    holder = ?pid,
                    "another invocation holds the lock; skipping reconciliation"
                );
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        }
    };
    manager.reconcile()?;
    Ok(())
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(stdout, stderr, loader).run(args)
}
