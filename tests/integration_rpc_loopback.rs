//! End-to-end RPC tests over the in-process loopback bus: discovery,
//! fanout dispatch, per-worker reports and the merged aggregate.

use std::sync::Arc;
use std::time::Duration;

use bus_bench::bus::{LocalBus, MessageBus};
use bus_bench::cli::Executor;
use bus_bench::controller::Controller;
use bus_bench::minion::{RpcClientMinion, RpcServerMinion};

fn loopback() -> Arc<dyn MessageBus> {
    Arc::new(LocalBus::new())
}

const TEST_TIMEOUT: Option<Duration> = Some(Duration::from_secs(30));

#[tokio::test]
async fn call_test_reports_one_client() {
    let bus = loopback();
    let server = RpcServerMinion::start(bus.clone(), "rpc-single", Executor::Serial)
        .await
        .unwrap();
    tokio::spawn(server.run());
    let client = RpcClientMinion::start(bus.clone(), "rpc-single").await.unwrap();
    let client_task = tokio::spawn(client.run());

    let controller = Controller::connect(bus, "rpc-single", TEST_TIMEOUT)
        .await
        .unwrap();
    let report = controller.run_call_test(10, 64, false).await.unwrap();

    assert_eq!(report.reporters, 1);
    assert_eq!(report.latency_ms.count(), 10);
    assert_eq!(report.throughput.count(), 1);
    assert!(report.throughput.min().unwrap() > 0.0);

    controller.shutdown().await.unwrap();
    client_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn call_test_merges_every_client_report() {
    let bus = loopback();
    let server = RpcServerMinion::start(bus.clone(), "rpc-many", Executor::Serial)
        .await
        .unwrap();
    tokio::spawn(server.run());
    for _ in 0..3 {
        let client = RpcClientMinion::start(bus.clone(), "rpc-many").await.unwrap();
        tokio::spawn(client.run());
    }

    let controller = Controller::connect(bus, "rpc-many", TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        controller.registry().count(bus_bench::Role::RpcClient),
        3
    );

    let report = controller.run_call_test(10, 32, false).await.unwrap();

    // Exactly K merged per-minion statistics.
    assert_eq!(report.reporters, 3);
    assert_eq!(report.latency_ms.count(), 30);
    assert_eq!(report.throughput.count(), 3);

    let min = report.latency_ms.min().unwrap();
    let avg = report.latency_ms.average().unwrap();
    let max = report.latency_ms.max().unwrap();
    assert!(min <= avg && avg <= max);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn cast_test_uses_fire_and_forget() {
    let bus = loopback();
    let server = RpcServerMinion::start(bus.clone(), "rpc-cast", Executor::Serial)
        .await
        .unwrap();
    tokio::spawn(server.run());
    let client = RpcClientMinion::start(bus.clone(), "rpc-cast").await.unwrap();
    tokio::spawn(client.run());

    let controller = Controller::connect(bus, "rpc-cast", TEST_TIMEOUT)
        .await
        .unwrap();
    let report = controller.run_cast_test(25, 16, false).await.unwrap();

    assert_eq!(report.reporters, 1);
    assert_eq!(report.latency_ms.count(), 25);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_executor_answers_calls() {
    let bus = loopback();
    let server = RpcServerMinion::start(bus.clone(), "rpc-conc", Executor::Concurrent)
        .await
        .unwrap();
    tokio::spawn(server.run());
    let client = RpcClientMinion::start(bus.clone(), "rpc-conc").await.unwrap();
    tokio::spawn(client.run());

    let controller = Controller::connect(bus, "rpc-conc", TEST_TIMEOUT)
        .await
        .unwrap();
    let report = controller.run_call_test(20, 128, false).await.unwrap();
    assert_eq!(report.latency_ms.count(), 20);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn calls_round_robin_across_servers() {
    let bus = loopback();
    for _ in 0..2 {
        let server = RpcServerMinion::start(bus.clone(), "rpc-rr", Executor::Serial)
            .await
            .unwrap();
        tokio::spawn(server.run());
    }
    let client = RpcClientMinion::start(bus.clone(), "rpc-rr").await.unwrap();
    tokio::spawn(client.run());

    let controller = Controller::connect(bus, "rpc-rr", TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(controller.registry().count(bus_bench::Role::RpcServer), 2);

    // Both servers take part; the run completes either way.
    let report = controller.run_call_test(10, 8, false).await.unwrap();
    assert_eq!(report.latency_ms.count(), 10);

    controller.shutdown().await.unwrap();
}
