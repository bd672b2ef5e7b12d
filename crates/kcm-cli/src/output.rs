//! Human-readable rendering of clusters and process state.

use std::fmt::Write as _;

use kcm_core::lifecycle::{ClusterStatus, StartOutcome, StopOutcome};
use kcm_core::{Cluster, EntityState};

/// Renders a two-column table with labels padded to a common width.
fn table(rows: &[(String, String)]) -> String {
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    rows.iter().fold(String::new(), |mut out, (label, value)| {
        out.push_str(format!("  {label:<width$}  {value}").trim_end());
        out.push('\n');
        out
    })
}

fn heading(cluster: &Cluster) -> String {
    format!("Cluster #{} \"{}\"\n", cluster.id, cluster.name)
}

pub(crate) fn render_cluster(cluster: &Cluster) -> String {
    let mut rows = vec![("Version".to_owned(), cluster.version.clone())];
    rows.extend(cluster.brokers.iter().map(|broker| {
        (format!("Broker {} address", broker.id), broker.addr.clone())
    }));
    heading(cluster) + &table(&rows)
}

fn describe(state: EntityState) -> String {
    match state {
        EntityState::Running { pid } => format!("pid:{pid}"),
        EntityState::Absent | EntityState::RecordedDead { .. } => "not started".to_owned(),
    }
}

pub(crate) fn render_coordination(version: &str, state: EntityState) -> String {
    let rows = [
        ("version".to_owned(), version.to_owned()),
        ("status".to_owned(), describe(state)),
    ];
    String::from("Zookeeper\n") + &table(&rows)
}

pub(crate) fn render_status(status: &ClusterStatus) -> String {
    let rows: Vec<_> = status
        .brokers
        .iter()
        .map(|(id, state)| (format!("Broker {id}"), describe(*state)))
        .collect();
    heading(&status.cluster) + &table(&rows)
}

pub(crate) fn render_start(entity: &str, outcome: StartOutcome) -> String {
    match outcome {
        StartOutcome::Started { pid } => format!("launched {entity} (pid {pid})"),
        StartOutcome::AlreadyRunning { pid } => format!("{entity} already running (pid {pid})"),
    }
}

pub(crate) fn render_stops(cluster: &str, outcomes: &[(u32, StopOutcome)]) -> String {
    let mut out = String::new();
    for (id, outcome) in outcomes {
        if let StopOutcome::Stopped { pid } = outcome {
            let _ = writeln!(out, "stopped broker {id} (pid {pid})");
        }
    }
    let _ = writeln!(out, "stopped cluster \"{cluster}\"");
    out
}

pub(crate) fn render_coordination_stop(outcome: StopOutcome) -> String {
    match outcome {
        StopOutcome::Stopped { pid } => format!("stopped zookeeper (pid {pid})"),
        StopOutcome::NotRunning => "zookeeper was not running".to_owned(),
    }
}
