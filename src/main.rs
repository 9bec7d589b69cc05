//! Entry point: parse the command line, join the bus in the requested
//! mode, and drive it to completion.
//!
//! Mode selection mirrors the deployment shapes of the harness:
//! long-running minion modes (`rpc-server`, `rpc-client`, `listener`,
//! `notifier`) serve until a controller broadcasts shutdown; the
//! `controller` mode drives one test against whatever minions answer
//! discovery; the `rpc` and `notify` standalone modes wire a full
//! topology in-process for loopback measurements.

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::error;

use bus_bench::bus::{LocalBus, MessageBus, Severity};
use bus_bench::cli::{self, Args, Executor, Mode, NotifyTestArgs, RpcTestArgs, TestKind};
use bus_bench::controller::Controller;
use bus_bench::minion::{ListenerMinion, NotifierMinion, RpcClientMinion, RpcServerMinion};
use bus_bench::results::{self, TestReport};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    bus_bench::logging::init(args.debug);

    match &args.mode {
        Mode::Controller { test, args: pairs } => {
            run_controller(&args, test, pairs).await
        }
        Mode::Rpc {
            calls,
            length,
            cast,
            executor,
        } => run_rpc_standalone(&args, *calls, *length, *cast, *executor).await,
        Mode::Notify {
            calls,
            length,
            severity,
        } => run_notify_standalone(&args, *calls, *length, *severity).await,
        Mode::RpcServer { executor } => {
            let executor = *executor;
            let bus = connect_bus(&args.url)?;
            let server = RpcServerMinion::start(bus, &args.topic, executor).await?;
            Ok(server.run().await?)
        }
        Mode::RpcClient => {
            let bus = connect_bus(&args.url)?;
            let client = RpcClientMinion::start(bus, &args.topic).await?;
            Ok(client.run().await?)
        }
        Mode::Listener => {
            let bus = connect_bus(&args.url)?;
            let listener = ListenerMinion::start(bus, &args.topic).await?;
            Ok(listener.run().await?)
        }
        Mode::Notifier => {
            let bus = connect_bus(&args.url)?;
            let notifier = NotifierMinion::start(bus, &args.topic).await?;
            Ok(notifier.run().await?)
        }
    }
}

/// Resolve the bus URL to a transport.
fn connect_bus(url: &str) -> Result<Arc<dyn MessageBus>> {
    match url.split_once("://") {
        Some(("local", _)) => Ok(Arc::new(LocalBus::new())),
        _ => bail!(
            "unsupported bus url {:?}; the built-in transport is local:// \
             (external brokers plug in behind the MessageBus trait)",
            url
        ),
    }
}

/// What a validated `controller` invocation will dispatch.
enum Plan {
    Rpc(TestKind, RpcTestArgs),
    Notify(NotifyTestArgs),
    Shutdown,
}

/// Drive one test against already-running minions.
async fn run_controller(args: &Args, test: &str, pairs: &[String]) -> Result<()> {
    // Validate the test name and its arguments before touching the bus.
    let kind = TestKind::parse(test)?;
    let plan = match kind {
        TestKind::RpcCall | TestKind::RpcCast => Plan::Rpc(kind, cli::parse_rpc_test_args(pairs)?),
        TestKind::Notify => Plan::Notify(cli::parse_notify_test_args(pairs)?),
        TestKind::Shutdown => Plan::Shutdown,
    };

    let bus = connect_bus(&args.url)?;
    let controller = Controller::connect(bus, &args.topic, args.timeout).await?;

    match plan {
        Plan::Rpc(TestKind::RpcCall, rpc) => {
            let report = controller
                .run_call_test(rpc.calls, rpc.length, args.debug)
                .await?;
            emit_report(args, &report)?;
        }
        Plan::Rpc(_, rpc) => {
            let report = controller
                .run_cast_test(rpc.calls, rpc.length, args.debug)
                .await?;
            emit_report(args, &report)?;
        }
        Plan::Notify(notify) => {
            let report = controller
                .run_notify_test(
                    notify.calls,
                    notify.length,
                    notify.severity,
                    notify.verbose || args.debug,
                )
                .await?;
            emit_report(args, &report)?;
        }
        Plan::Shutdown => {
            controller.shutdown().await?;
        }
    }
    Ok(())
}

/// Standalone RPC test: server, client and controller in one process.
async fn run_rpc_standalone(
    args: &Args,
    calls: u64,
    length: usize,
    cast: bool,
    executor: Executor,
) -> Result<()> {
    cli::ensure_calls(calls)?;

    let bus = connect_bus(&args.url)?;
    let server = RpcServerMinion::start(bus.clone(), &args.topic, executor).await?;
    let server_task = tokio::spawn(supervise("rpc-server", server.run()));
    let client = RpcClientMinion::start(bus.clone(), &args.topic).await?;
    let client_task = tokio::spawn(supervise("rpc-client", client.run()));

    let controller = Controller::connect(bus, &args.topic, args.timeout).await?;
    let report = if cast {
        controller.run_cast_test(calls, length, args.debug).await?
    } else {
        controller.run_call_test(calls, length, args.debug).await?
    };
    emit_report(args, &report)?;

    controller.shutdown().await?;
    let _ = tokio::join!(server_task, client_task);
    Ok(())
}

/// Standalone notification test: listener, notifier and controller.
async fn run_notify_standalone(
    args: &Args,
    calls: u64,
    length: usize,
    severity: Severity,
) -> Result<()> {
    cli::ensure_calls(calls)?;

    let bus = connect_bus(&args.url)?;
    let listener = ListenerMinion::start(bus.clone(), &args.topic).await?;
    let listener_task = tokio::spawn(supervise("listener", listener.run()));
    let notifier = NotifierMinion::start(bus.clone(), &args.topic).await?;
    let notifier_task = tokio::spawn(supervise("notifier", notifier.run()));

    let controller = Controller::connect(bus, &args.topic, args.timeout).await?;
    let report = controller
        .run_notify_test(calls, length, severity, args.debug)
        .await?;
    emit_report(args, &report)?;

    controller.shutdown().await?;
    let _ = tokio::join!(listener_task, notifier_task);
    Ok(())
}

fn emit_report(args: &Args, report: &TestReport) -> Result<()> {
    println!();
    println!("{}", report);
    if let Some(path) = &args.output_file {
        results::write_report(path, report)?;
    }
    Ok(())
}

/// A minion task failing mid-run is a local fatal error for that
/// worker; the controller sees it as a non-reporter.
async fn supervise(role: &'static str, task: impl Future<Output = bus_bench::Result<()>>) {
    if let Err(e) = task.await {
        error!("{} minion failed: {}", role, e);
    }
}
