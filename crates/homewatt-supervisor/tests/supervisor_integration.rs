#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity
#![cfg(unix)]

//! End-to-end tests for the supervisor loop.
//!
//! Children are /bin/sh scripts that write markers into a tempdir, which
//! lets the tests observe spawn ordering, signal delivery, and exit
//! propagation without a real worker or API server.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;

use homewatt_supervisor::process::{
    ChildRole, ChildSpec, Supervisor, SupervisorError, SupervisorSpec, TermSignal,
};

fn sh(role: ChildRole, script: &str) -> ChildSpec {
    ChildSpec::new(
        role,
        &["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
    )
    .unwrap()
}

fn spec(worker: ChildSpec, server: ChildSpec, startup_delay: Duration) -> SupervisorSpec {
    SupervisorSpec {
        worker,
        server,
        startup_delay,
        terminate_timeout: Duration::from_secs(2),
    }
}

/// Closed signal channel for runs that never receive a signal.
fn no_signals() -> mpsc::Receiver<TermSignal> {
    let (_, rx) = mpsc::channel(1);
    rx
}

/// Wait until `path` exists, panicking after a generous timeout.
async fn wait_for_file(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("file never appeared: {}", path.display());
}

#[tokio::test]
async fn both_children_successful_exit_propagates_zero() {
    let supervisor = Supervisor::start(spec(
        sh(ChildRole::Worker, "exit 0"),
        sh(ChildRole::Server, "sleep 5"),
        Duration::from_millis(10),
    ))
    .await
    .unwrap();

    let report = supervisor.run(no_signals()).await.unwrap();
    assert_eq!(report.role, ChildRole::Worker);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn worker_failure_code_becomes_supervisor_code() {
    let supervisor = Supervisor::start(spec(
        sh(ChildRole::Worker, "exit 3"),
        sh(ChildRole::Server, "sleep 5"),
        Duration::from_millis(10),
    ))
    .await
    .unwrap();

    let report = supervisor.run(no_signals()).await.unwrap();
    assert_eq!(report.role, ChildRole::Worker);
    assert_eq!(report.exit_code(), 3);
}

#[tokio::test]
async fn server_exit_first_propagates_its_code() {
    let supervisor = Supervisor::start(spec(
        sh(ChildRole::Worker, "sleep 5"),
        sh(ChildRole::Server, "exit 7"),
        Duration::from_millis(10),
    ))
    .await
    .unwrap();

    let report = supervisor.run(no_signals()).await.unwrap();
    assert_eq!(report.role, ChildRole::Server);
    assert_eq!(report.exit_code(), 7);
}

#[tokio::test]
async fn server_never_starts_before_the_startup_delay() {
    let dir = tempfile::TempDir::new().unwrap();
    let worker_marker = dir.path().join("worker.at");
    let server_marker = dir.path().join("server.at");
    let delay = Duration::from_millis(300);

    let supervisor = Supervisor::start(spec(
        sh(
            ChildRole::Worker,
            &format!("date +%s%N > {}; sleep 1", worker_marker.display()),
        ),
        sh(
            ChildRole::Server,
            &format!("date +%s%N > {}; sleep 5", server_marker.display()),
        ),
        delay,
    ))
    .await
    .unwrap();

    wait_for_file(&worker_marker).await;
    wait_for_file(&server_marker).await;

    let report = supervisor.run(no_signals()).await.unwrap();
    assert_eq!(report.role, ChildRole::Worker);

    let worker_ns: u128 = std::fs::read_to_string(&worker_marker)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let server_ns: u128 = std::fs::read_to_string(&server_marker)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(
        server_ns - worker_ns >= delay.as_nanos(),
        "server started {}ns after worker, expected at least {}ns",
        server_ns - worker_ns,
        delay.as_nanos()
    );
}

#[tokio::test]
async fn one_signal_is_relayed_to_each_child_exactly_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let worker_log = dir.path().join("worker.terms");
    let server_log = dir.path().join("server.terms");

    // The worker exits immediately on SIGTERM and is therefore the first
    // exiter: the only SIGTERM it can ever receive is the relayed one. The
    // server ignores further SIGTERMs once handled, so the survivor
    // shutdown cannot add a second line.
    let worker = sh(
        ChildRole::Worker,
        &format!(
            "trap 'echo term >> {}; exit 0' TERM; while :; do sleep 0.05; done",
            worker_log.display()
        ),
    );
    let server = sh(
        ChildRole::Server,
        &format!(
            "trap 'trap \"\" TERM; echo term >> {}; sleep 0.3; exit 0' TERM; while :; do sleep 0.05; done",
            server_log.display()
        ),
    );

    let supervisor = Supervisor::start(spec(worker, server, Duration::from_millis(10)))
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(1);
    let run = tokio::spawn(supervisor.run(rx));

    // Give both shells time to install their traps
    tokio::time::sleep(Duration::from_millis(300)).await;
    tx.send(TermSignal::Terminate).await.unwrap();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.role, ChildRole::Worker);
    assert_eq!(report.exit_code(), 0);

    let worker_terms = std::fs::read_to_string(&worker_log).unwrap();
    assert_eq!(
        worker_terms.lines().count(),
        1,
        "worker should see exactly one SIGTERM: {worker_terms:?}"
    );
    let server_terms = std::fs::read_to_string(&server_log).unwrap();
    assert_eq!(
        server_terms.lines().count(),
        1,
        "server should see exactly one relayed SIGTERM: {server_terms:?}"
    );
}

#[tokio::test]
async fn relaying_to_an_already_exited_child_is_a_noop() {
    let supervisor = Supervisor::start(spec(
        sh(ChildRole::Worker, "exit 0"),
        sh(ChildRole::Server, "sleep 5"),
        Duration::from_millis(10),
    ))
    .await
    .unwrap();

    // Let the worker die before relaying
    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.relay_termination(TermSignal::Terminate);

    let report = supervisor.run(no_signals()).await.unwrap();
    assert_eq!(report.role, ChildRole::Worker);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn signal_killed_child_maps_to_128_plus_signal() {
    // The worker dies from an un-trapped SIGTERM relayed by the supervisor
    let supervisor = Supervisor::start(spec(
        sh(ChildRole::Worker, "sleep 5"),
        sh(ChildRole::Server, "sleep 5"),
        Duration::from_millis(10),
    ))
    .await
    .unwrap();

    let (tx, rx) = mpsc::channel(1);
    let run = tokio::spawn(supervisor.run(rx));
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(TermSignal::Terminate).await.unwrap();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.exit_code(), 128 + libc::SIGTERM);
}

#[tokio::test]
async fn worker_spawn_failure_surfaces_the_role() {
    let worker = ChildSpec::new(
        ChildRole::Worker,
        &["/nonexistent/homewatt-worker".to_string()],
    )
    .unwrap();
    let server = sh(ChildRole::Server, "sleep 1");

    let result = Supervisor::start(spec(worker, server, Duration::from_millis(10))).await;
    match result {
        Err(SupervisorError::Spawn { role, .. }) => assert_eq!(role, ChildRole::Worker),
        other => panic!("expected worker spawn failure, got {other:?}"),
    }
}

#[tokio::test]
async fn server_spawn_failure_kills_the_worker() {
    let dir = tempfile::TempDir::new().unwrap();
    let marker = dir.path().join("worker.pid");

    let worker = sh(
        ChildRole::Worker,
        &format!("echo $$ > {}; sleep 30", marker.display()),
    );
    let server = ChildSpec::new(
        ChildRole::Server,
        &["/nonexistent/homewatt-server".to_string()],
    )
    .unwrap();

    // A long enough delay that the worker shell has written its marker
    // before the server spawn fails
    let result = Supervisor::start(spec(worker, server, Duration::from_millis(300))).await;
    assert!(matches!(
        result,
        Err(SupervisorError::Spawn {
            role: ChildRole::Server,
            ..
        })
    ));

    // The worker shell must be gone; signal 0 probes for existence
    wait_for_file(&marker).await;
    let pid: i32 = std::fs::read_to_string(&marker)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    for _ in 0..200 {
        // SAFETY: signal 0 performs no delivery, only an existence check
        #[allow(unsafe_code)]
        let gone = unsafe { libc::kill(pid, 0) } != 0;
        if gone {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("worker (pid {pid}) still alive after server spawn failure");
}
