//! Dispatch of parsed subcommands onto the lifecycle manager.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitCode, ExitStatus};

use kcm_core::model::NewCluster;
use kcm_core::script::script_invocation;
use kcm_core::{CreateOutcome, EntityKey, Fetcher, LifecycleManager, ProcessSupervisor};
use tracing::debug;

use crate::AppError;
use crate::cli::CliCommand;
use crate::output;

const CLI_TARGET: &str = "kcm::cli";

/// Runs one command to completion, writing human output to `stdout`.
pub(crate) fn execute<S, F, W>(
    command: CliCommand,
    manager: &mut LifecycleManager<S, F>,
    stdout: &mut W,
) -> Result<ExitCode, AppError>
where
    S: ProcessSupervisor,
    F: Fetcher,
    W: Write,
{
    match command {
        CliCommand::Create {
            name,
            version,
            brokers,
            broker_addrs,
        } => {
            let definition = if broker_addrs.is_empty() {
                NewCluster::with_default_brokers(name, version, brokers)?
            } else {
                NewCluster::with_addresses(name, version, broker_addrs)?
            };
            match manager.create_cluster(&definition)? {
                CreateOutcome::Created(cluster) => {
                    write!(stdout, "{}", output::render_cluster(&cluster))?;
                }
                CreateOutcome::AlreadyExists { name } => {
                    writeln!(stdout, "cluster \"{name}\" already exists")?;
                }
            }
        }
        CliCommand::List { pattern } => {
            let clusters = manager
                .store()
                .search_clusters(pattern.as_deref().unwrap_or_default())?;
            let rendered: Vec<_> = clusters.iter().map(output::render_cluster).collect();
            write!(stdout, "{}", rendered.join("\n"))?;
        }
        CliCommand::Status { cluster } => {
            let version = manager.settings().zookeeper_version.clone();
            let state = manager.state_of(EntityKey::Coordination)?;
            writeln!(stdout, "{}", output::render_coordination(&version, state))?;
            let names = match cluster {
                Some(name) => vec![name],
                None => manager
                    .store()
                    .clusters()?
                    .into_iter()
                    .map(|cluster| cluster.name)
                    .collect(),
            };
            let rendered = names
                .iter()
                .map(|name| manager.cluster_status(name).map(|s| output::render_status(&s)))
                .collect::<Result<Vec<_>, _>>()?;
            write!(stdout, "{}", rendered.join("\n"))?;
        }
        CliCommand::Start { cluster } => {
            let started = manager.start_cluster(&cluster)?;
            writeln!(
                stdout,
                "{}",
                output::render_start("zookeeper", started.coordination)
            )?;
            for (id, outcome) in started.brokers {
                writeln!(
                    stdout,
                    "{}",
                    output::render_start(&format!("broker {id}"), outcome)
                )?;
            }
            writeln!(stdout, "launched cluster \"{cluster}\"")?;
        }
        CliCommand::Stop { cluster, zk } => stop(manager, cluster.as_deref(), zk, stdout)?,
        CliCommand::Delete { cluster } => {
            manager.delete_cluster(&cluster)?;
            writeln!(stdout, "deleted cluster \"{cluster}\"")?;
        }
        CliCommand::Logs {
            cluster,
            zk,
            follow,
        } => return tail_logs(manager, cluster.as_deref(), zk, follow),
        CliCommand::RunScript {
            cluster,
            script,
            arguments,
        } => {
            let target = manager.cluster(&cluster)?;
            let invocation = script_invocation(
                manager.layout(),
                &target,
                &manager.settings().zk_addr,
                &script,
                &arguments,
            )?;
            return run_foreground(invocation.program, &invocation.args);
        }
        CliCommand::Version => write_version(stdout)?,
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn write_version<W: Write>(stdout: &mut W) -> Result<(), AppError> {
    writeln!(stdout, "kcm version {}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

fn stop<S, F, W>(
    manager: &mut LifecycleManager<S, F>,
    cluster: Option<&str>,
    zk: bool,
    stdout: &mut W,
) -> Result<(), AppError>
where
    S: ProcessSupervisor,
    F: Fetcher,
    W: Write,
{
    let report = manager.stop(cluster, zk)?;
    for (name, outcomes) in &report.clusters {
        write!(stdout, "{}", output::render_stops(name, outcomes))?;
    }
    if let Some(outcome) = report.coordination {
        writeln!(stdout, "{}", output::render_coordination_stop(outcome))?;
    }
    Ok(())
}

fn tail_logs<S, F>(
    manager: &LifecycleManager<S, F>,
    cluster: Option<&str>,
    zk: bool,
    follow: bool,
) -> Result<ExitCode, AppError>
where
    S: ProcessSupervisor,
    F: Fetcher,
{
    let clusters = match cluster {
        Some(name) => vec![manager.cluster(name)?],
        None => manager.store().clusters()?,
    };
    let layout = manager.layout();
    let mut files: Vec<PathBuf> = clusters
        .iter()
        .flat_map(|cluster| {
            cluster
                .brokers
                .iter()
                .map(move |broker| layout.broker_log(&cluster.name, broker.id))
        })
        .collect();
    if zk {
        files.push(layout.zookeeper_log());
    }
    files.retain(|file| file.is_file());
    if files.is_empty() {
        debug!(target: CLI_TARGET, "no log files to tail");
        return Ok(ExitCode::SUCCESS);
    }

    let mut args: Vec<OsString> = Vec::with_capacity(files.len() + 1);
    if follow {
        args.push(OsString::from("-f"));
    }
    args.extend(files.into_iter().map(PathBuf::into_os_string));
    run_foreground(PathBuf::from("tail"), &args)
}

/// Runs `program` with inherited standard streams and mirrors its exit code.
fn run_foreground(program: PathBuf, args: &[OsString]) -> Result<ExitCode, AppError> {
    debug!(target: CLI_TARGET, program = %program.display(), "running in foreground");
    let status = Command::new(&program)
        .args(args)
        .status()
        .map_err(|source| AppError::Exec { program, source })?;
    Ok(exit_code_from_status(status))
}

fn exit_code_from_status(status: ExitStatus) -> ExitCode {
    match status.code().map(u8::try_from) {
        Some(Ok(code)) => ExitCode::from(code),
        _ => ExitCode::FAILURE,
    }
}
