//! Completion-barrier semantics: zero-worker refusal, discovery
//! counts, the all-or-nothing timeout, and late-report handling.

use std::sync::Arc;
use std::time::Duration;

use bus_bench::bus::{Command, LocalBus, MessageBus, Role, Target, WorkerReport, CALL_TIMEOUT};
use bus_bench::cli::Executor;
use bus_bench::controller::Controller;
use bus_bench::error::Error;
use bus_bench::minion::{RpcClientMinion, RpcServerMinion};
use bus_bench::stats::SummaryStat;

fn loopback() -> Arc<dyn MessageBus> {
    Arc::new(LocalBus::new())
}

/// Register a minion that answers discovery pings as an RPC client but
/// never runs a test loop, so dispatched runs are left hanging.
async fn spawn_silent_rpc_client(bus: Arc<dyn MessageBus>, topic: &str, name: &str) {
    let endpoint_target = Target::server(format!("client-{}", topic), name);
    let controller = Target::topic(format!("controller-{}", topic));
    let worker = name.to_string();
    let mut endpoint = bus.serve(&endpoint_target).await.unwrap();
    tokio::spawn(async move {
        while let Some(inbound) = endpoint.recv().await {
            if matches!(inbound.command, Command::Ping) {
                let pong = Command::Pong {
                    role: Role::RpcClient,
                    worker: worker.clone(),
                };
                let _ = bus.call(&controller, pong, CALL_TIMEOUT).await;
            }
        }
    });
}

#[tokio::test]
async fn zero_workers_never_dispatches() {
    let bus = loopback();
    let controller = Controller::connect(bus, "barrier-empty", None).await.unwrap();

    let outcome = controller.run_call_test(10, 64, false).await;
    assert!(matches!(
        outcome,
        Err(Error::NoWorkersVisible {
            role: Role::RpcClient
        })
    ));

    let outcome = controller.run_notify_test(1, 8, bus_bench::Severity::Debug, false).await;
    assert!(matches!(
        outcome,
        Err(Error::NoWorkersVisible {
            role: Role::Notifier
        })
    ));
}

#[tokio::test]
async fn discovery_counts_roles_regardless_of_reply_order() {
    let bus = loopback();
    for _ in 0..5 {
        let client = RpcClientMinion::start(bus.clone(), "barrier-census").await.unwrap();
        tokio::spawn(client.run());
    }
    for _ in 0..2 {
        let server = RpcServerMinion::start(bus.clone(), "barrier-census", Executor::Serial)
            .await
            .unwrap();
        tokio::spawn(server.run());
    }

    let controller = Controller::connect(bus, "barrier-census", None).await.unwrap();
    let registry = controller.registry();
    assert_eq!(registry.count(Role::RpcClient), 5);
    assert_eq!(registry.count(Role::RpcServer), 2);
    assert_eq!(registry.count(Role::Notifier), 0);
    assert_eq!(registry.total(), 7);

    // A fresh discovery round resets and recounts.
    let registry = controller.discover().await.unwrap();
    assert_eq!(registry.count(Role::RpcClient), 5);
    assert_eq!(registry.total(), 7);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_reporters_time_the_run_out() {
    let bus = loopback();
    spawn_silent_rpc_client(bus.clone(), "barrier-timeout", "silent-1").await;

    let deadline = Duration::from_millis(300);
    let controller = Controller::connect(bus, "barrier-timeout", Some(deadline))
        .await
        .unwrap();
    assert_eq!(controller.registry().count(Role::RpcClient), 1);

    let outcome = controller.run_call_test(1, 16, false).await;
    match outcome {
        Err(Error::TestTimeout { timeout, .. }) => assert_eq!(timeout, deadline),
        other => panic!("expected timeout, got {:?}", other.map(|r| r.reporters)),
    }
}

#[tokio::test]
async fn late_reports_are_dropped_and_runs_reset() {
    let bus = loopback();
    spawn_silent_rpc_client(bus.clone(), "barrier-late", "silent-2").await;

    let controller = Controller::connect(bus.clone(), "barrier-late", Some(Duration::from_millis(200)))
        .await
        .unwrap();

    let first = controller.run_call_test(1, 16, false).await;
    assert!(matches!(first, Err(Error::TestTimeout { .. })));

    // A report that straggles in after the deadline has no run to join
    // and must not satisfy a later barrier either.
    let mut latency = SummaryStat::new();
    latency.update(1.0);
    let stale = Command::Report(WorkerReport {
        latency,
        throughput: 100.0,
        calls: 1,
        worker: "silent-2".to_string(),
    });
    bus.cast(&Target::topic("controller-barrier-late"), stale)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = controller.run_call_test(1, 16, false).await;
    assert!(matches!(second, Err(Error::TestTimeout { .. })));
}
