//! Behavioural coverage for the start/stop state machine.

mod support;

use std::cell::RefCell;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use kcm_core::{LifecycleError, StopOutcome, SupervisorError};
use support::Sandbox;

struct LifecycleWorld {
    sandbox: Sandbox,
    last_stop: Option<Vec<(u32, StopOutcome)>>,
    last_error: Option<LifecycleError>,
}

impl LifecycleWorld {
    fn new() -> Self {
        Self {
            sandbox: Sandbox::new(),
            last_stop: None,
            last_error: None,
        }
    }

    fn record<T>(&mut self, result: Result<T, LifecycleError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.last_error = Some(error);
                None
            }
        }
    }

    fn broker_running(&self, cluster: &str, broker_id: u32) -> bool {
        self.sandbox
            .broker_pid(cluster, broker_id)
            .and_then(|pid| u32::try_from(pid).ok())
            .is_some_and(|pid| self.sandbox.supervisor.is_running(pid))
    }
}

#[fixture]
fn world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::new())
}

#[given("a registered cluster \"{name}\" with {count} brokers")]
fn given_registered_cluster(world: &RefCell<LifecycleWorld>, name: String, count: u32) {
    world.borrow().sandbox.register(&name, count);
}

#[given("the stop timeout is {seconds} seconds")]
fn given_stop_timeout(world: &RefCell<LifecycleWorld>, seconds: u64) {
    world.borrow_mut().sandbox.settings.stop_timeout = Duration::from_secs(seconds);
}

#[given("processes ignore termination")]
fn given_stubborn_processes(world: &RefCell<LifecycleWorld>) {
    world.borrow().sandbox.supervisor.table().stubborn = true;
}

#[when("the cluster \"{name}\" is started")]
fn when_cluster_started(world: &RefCell<LifecycleWorld>, name: String) {
    let mut world = world.borrow_mut();
    let result = world.sandbox.manager().start_cluster(&name);
    world.record(result);
}

#[when("the cluster \"{name}\" is stopped")]
fn when_cluster_stopped(world: &RefCell<LifecycleWorld>, name: String) {
    let mut world = world.borrow_mut();
    let result = world.sandbox.manager().stop_cluster(&name);
    let outcomes = world.record(result);
    world.last_stop = outcomes;
}

#[when("broker {broker_id} of \"{name}\" dies")]
fn when_broker_dies(world: &RefCell<LifecycleWorld>, broker_id: u32, name: String) {
    let world = world.borrow();
    let pid = world
        .sandbox
        .broker_pid(&name, broker_id)
        .and_then(|pid| u32::try_from(pid).ok())
        .expect("broker should be recorded");
    world.sandbox.supervisor.kill(pid);
}

#[when("broker {broker_id} of \"{name}\" is taken over by another user")]
fn when_broker_taken_over(world: &RefCell<LifecycleWorld>, broker_id: u32, name: String) {
    let world = world.borrow();
    let pid = world
        .sandbox
        .broker_pid(&name, broker_id)
        .and_then(|pid| u32::try_from(pid).ok())
        .expect("broker should be recorded");
    let mut table = world.sandbox.supervisor.table();
    table.alive.remove(&pid);
    table.foreign.insert(pid);
}

#[when("reconciliation runs")]
fn when_reconciliation_runs(world: &RefCell<LifecycleWorld>) {
    let mut world = world.borrow_mut();
    let result = world.sandbox.manager().reconcile();
    world.record(result);
}

#[then("the coordination service is recorded as running")]
fn then_coordination_running(world: &RefCell<LifecycleWorld>) {
    let world = world.borrow();
    let pid = world
        .sandbox
        .coordination_pid()
        .and_then(|pid| u32::try_from(pid).ok())
        .expect("coordination service should be recorded");
    assert!(world.sandbox.supervisor.is_running(pid));
}

#[then("{count} brokers of \"{name}\" are recorded as running")]
fn then_brokers_running(world: &RefCell<LifecycleWorld>, count: u32, name: String) {
    let world = world.borrow();
    assert!(world.last_error.is_none(), "unexpected error: {:?}", world.last_error);
    for broker_id in 1..=count {
        assert!(
            world.broker_running(&name, broker_id),
            "broker {broker_id} should be running"
        );
    }
}

#[then("each distribution was downloaded once")]
fn then_downloaded_once(world: &RefCell<LifecycleWorld>) {
    assert_eq!(world.borrow().sandbox.fetcher.request_count(), 2);
}

#[then("{count} processes were spawned in total")]
fn then_spawn_count(world: &RefCell<LifecycleWorld>, count: usize) {
    assert_eq!(world.borrow().sandbox.supervisor.spawn_count(), count);
}

#[then("no brokers of \"{name}\" are recorded")]
fn then_no_brokers_recorded(world: &RefCell<LifecycleWorld>, name: String) {
    let world = world.borrow();
    for broker_id in 1..=3 {
        assert_eq!(world.sandbox.broker_pid(&name, broker_id), None);
    }
}

#[then("only the coordination service is alive")]
fn then_only_coordination_alive(world: &RefCell<LifecycleWorld>) {
    assert_eq!(world.borrow().sandbox.supervisor.live_count(), 1);
}

#[then("every broker of \"{name}\" reported not running")]
fn then_all_not_running(world: &RefCell<LifecycleWorld>, name: String) {
    let world = world.borrow();
    let outcomes = world
        .last_stop
        .as_ref()
        .unwrap_or_else(|| panic!("stopping '{name}' failed: {:?}", world.last_error));
    assert_eq!(outcomes.len(), 3);
    assert!(
        outcomes
            .iter()
            .all(|(_, outcome)| *outcome == StopOutcome::NotRunning)
    );
}

#[then("no termination was requested")]
fn then_no_termination(world: &RefCell<LifecycleWorld>) {
    assert!(world.borrow().sandbox.supervisor.terminated().is_empty());
}

#[then("broker {broker_id} of \"{name}\" is not recorded")]
fn then_broker_not_recorded(world: &RefCell<LifecycleWorld>, broker_id: u32, name: String) {
    assert_eq!(world.borrow().sandbox.broker_pid(&name, broker_id), None);
}

#[then("broker {broker_id} of \"{name}\" is still recorded")]
fn then_broker_recorded(world: &RefCell<LifecycleWorld>, broker_id: u32, name: String) {
    assert!(world.borrow().sandbox.broker_pid(&name, broker_id).is_some());
}

#[then("the last command failed fatally")]
fn then_failed_fatally(world: &RefCell<LifecycleWorld>) {
    let world = world.borrow();
    let error = world.last_error.as_ref().expect("command should fail");
    assert!(error.is_fatal(), "expected a fatal error, got {error}");
    assert!(matches!(
        error,
        LifecycleError::Supervisor(SupervisorError::OwnershipViolation { .. })
    ));
}

#[then("the last command timed out")]
fn then_timed_out(world: &RefCell<LifecycleWorld>) {
    let world = world.borrow();
    assert!(matches!(
        world.last_error,
        Some(LifecycleError::StopTimeout { .. })
    ));
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Starting a cluster brings up coordination and every broker"
)]
fn start_brings_up_everything(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Starting a running cluster spawns nothing"
)]
fn start_is_idempotent(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Stopping a cluster leaves the coordination service running"
)]
fn stop_leaves_coordination(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Stopping a cluster that never started is a no-op"
)]
fn stop_without_start(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reconciliation drops rows of processes that died"
)]
fn reconcile_drops_dead_rows(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Starting again replaces a dead broker only"
)]
fn restart_replaces_dead_broker(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "A pid owned by another user is fatal"
)]
fn foreign_pid_is_fatal(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "A broker that ignores termination times out"
)]
fn stubborn_broker_times_out(world: RefCell<LifecycleWorld>) {
    drop(world);
}
