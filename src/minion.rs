//! Worker role variants and their test loops.
//!
//! Every minion owns a base control node on `client-<topic>` (discovery
//! ping, shutdown, readiness) plus role-specific plumbing: RPC clients
//! and notifiers serve a command endpoint the controller fanouts test
//! parameters to, RPC servers serve the test traffic itself, and
//! listeners subscribe to the notification channel. Test loops time
//! each operation into a local [`SummaryStat`] and ship one
//! [`WorkerReport`] to the controller when they finish.
//!
//! A shutdown that lands while a loop is active does not abort it: the
//! control endpoint goes away, the loop runs to natural completion, and
//! its report send is best effort.

use std::sync::Arc;
use std::time::Instant;

use tokio::select;
use tracing::{debug, error, info, warn};

use crate::bus::{
    CallPattern, Command, Endpoint, Inbound, MessageBus, Notification, NotificationStream, Reply,
    Role, Severity, Target, WorkerReport, CALL_TIMEOUT,
};
use crate::cli::Executor;
use crate::error::Result;
use crate::node::{node_name, CommandStream, Node};
use crate::stats::SummaryStat;

/// Event type attached to every benchmark notification.
const NOTIFICATION_EVENT: &str = "notification-test";

/// Log progress every tenth of the way through a verbose loop.
fn progress_stride(calls: u64) -> u64 {
    calls.max(10) / 10
}

/// Answer a lifecycle command forwarded by the base node. A discovery
/// ping is answered by calling `Pong` on the controller so delivery is
/// confirmed; failure to reach the controller is logged, not fatal.
async fn answer_lifecycle(
    bus: &Arc<dyn MessageBus>,
    controller: &Target,
    role: Role,
    worker: &str,
    inbound: Inbound,
) {
    match inbound.command {
        Command::Ping => {
            let pong = Command::Pong {
                role,
                worker: worker.to_string(),
            };
            if let Err(e) = bus.call(controller, pong, CALL_TIMEOUT).await {
                warn!("{} could not answer discovery ping: {}", worker, e);
            }
        }
        other => warn!("{} ignoring unexpected command: {:?}", worker, other),
    }
}

/// Time `calls` repetitions of `op`, then report to the controller.
///
/// Any operation failure aborts the loop immediately and is surfaced to
/// the caller; no retry, no partial report.
async fn run_timed_loop<F, Fut>(
    bus: &Arc<dyn MessageBus>,
    controller: &Target,
    worker: &str,
    calls: u64,
    verbose: bool,
    mut op: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<(), crate::bus::BusError>>,
{
    let mut latency = SummaryStat::new();
    let started = Instant::now();
    for call in 1..=calls {
        let begin = Instant::now();
        if let Err(e) = op().await {
            error!("{}: test failure: {}", worker, e);
            return Err(e.into());
        }
        latency.update(begin.elapsed().as_secs_f64() * 1_000.0);
        if verbose && call % progress_stride(calls) == 0 {
            info!("call {} of {} completed", call, calls);
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    let throughput = if elapsed > 0.0 {
        calls as f64 / elapsed
    } else {
        0.0
    };
    let report = WorkerReport {
        latency,
        throughput,
        calls,
        worker: worker.to_string(),
    };
    bus.cast(controller, Command::Report(report)).await?;
    Ok(())
}

/// Minion that drives RPC request loops against the test servers.
pub struct RpcClientMinion {
    node: Node,
    lifecycle: CommandStream,
    commands: Endpoint,
    bus: Arc<dyn MessageBus>,
    controller: Target,
    server: Target,
}

impl RpcClientMinion {
    pub async fn start(bus: Arc<dyn MessageBus>, topic: &str) -> Result<Self> {
        let name = node_name(Role::RpcClient.tag(), topic);
        let (node, lifecycle) =
            Node::start(bus.clone(), &format!("client-{}", topic), name.clone()).await?;
        let commands = bus
            .serve(&Target::server(format!("rpc-client-{}", topic), name))
            .await?;
        Ok(Self {
            node,
            lifecycle,
            commands,
            bus,
            controller: Target::topic(format!("controller-{}", topic)),
            server: Target::topic(format!("rpc-server-{}", topic)),
        })
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Serve until shutdown. Returns early with the failure when a test
    /// loop aborts.
    pub async fn run(mut self) -> Result<()> {
        loop {
            select! {
                lifecycle = self.lifecycle.recv() => match lifecycle {
                    Some(inbound) => {
                        answer_lifecycle(
                            &self.bus,
                            &self.controller,
                            Role::RpcClient,
                            self.node.name(),
                            inbound,
                        )
                        .await
                    }
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(Inbound {
                        command: Command::StartRpc { pattern, calls, payload, verbose },
                        ..
                    }) => {
                        self.run_rpc_loop(pattern, calls, payload, verbose).await?;
                    }
                    Some(inbound) => warn!(
                        "{} ignoring unexpected command: {:?}",
                        self.node.name(),
                        inbound.command
                    ),
                    None => break,
                },
            }
        }
        debug!("{} leaving the bus", self.node.name());
        Ok(())
    }

    async fn run_rpc_loop(
        &self,
        pattern: CallPattern,
        calls: u64,
        payload: Vec<u8>,
        verbose: bool,
    ) -> Result<()> {
        let bus = &self.bus;
        let server = &self.server;
        run_timed_loop(
            bus,
            &self.controller,
            self.node.name(),
            calls,
            verbose,
            move || {
                let payload = payload.clone();
                async move {
                    match pattern {
                        CallPattern::Call => bus
                            .call(server, Command::Echo { payload }, CALL_TIMEOUT)
                            .await
                            .map(|_| ()),
                        CallPattern::Cast => bus.cast(server, Command::Absorb { payload }).await,
                    }
                }
            },
        )
        .await
    }
}

/// Minion that serves the RPC test traffic.
pub struct RpcServerMinion {
    node: Node,
    lifecycle: CommandStream,
    service: Endpoint,
    bus: Arc<dyn MessageBus>,
    controller: Target,
    executor: Executor,
}

impl RpcServerMinion {
    pub async fn start(bus: Arc<dyn MessageBus>, topic: &str, executor: Executor) -> Result<Self> {
        let name = node_name(Role::RpcServer.tag(), topic);
        let (node, lifecycle) =
            Node::start(bus.clone(), &format!("client-{}", topic), name.clone()).await?;
        let service = bus
            .serve(&Target::server(format!("rpc-server-{}", topic), name))
            .await?;
        Ok(Self {
            node,
            lifecycle,
            service,
            bus,
            controller: Target::topic(format!("controller-{}", topic)),
            executor,
        })
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            select! {
                lifecycle = self.lifecycle.recv() => match lifecycle {
                    Some(inbound) => {
                        answer_lifecycle(
                            &self.bus,
                            &self.controller,
                            Role::RpcServer,
                            self.node.name(),
                            inbound,
                        )
                        .await
                    }
                    None => break,
                },
                request = self.service.recv() => match request {
                    Some(inbound) => self.dispatch(inbound),
                    None => break,
                },
            }
        }
        debug!("{} leaving the bus", self.node.name());
        Ok(())
    }

    fn dispatch(&self, inbound: Inbound) {
        match self.executor {
            Executor::Serial => Self::answer(inbound, self.node.name()),
            Executor::Concurrent => {
                let worker = self.node.name().to_string();
                tokio::spawn(async move { Self::answer(inbound, &worker) });
            }
        }
    }

    fn answer(inbound: Inbound, worker: &str) {
        let Inbound { command, reply } = inbound;
        match command {
            Command::Echo { payload } => {
                if let Some(tx) = reply {
                    let _ = tx.send(Ok(Reply::Payload(payload)));
                }
            }
            // Absorbed for cast testing.
            Command::Absorb { .. } => {}
            other => warn!("{} ignoring unexpected command: {:?}", worker, other),
        }
    }
}

/// Minion that emits benchmark notifications.
pub struct NotifierMinion {
    node: Node,
    lifecycle: CommandStream,
    commands: Endpoint,
    bus: Arc<dyn MessageBus>,
    controller: Target,
    topic: String,
}

impl NotifierMinion {
    pub async fn start(bus: Arc<dyn MessageBus>, topic: &str) -> Result<Self> {
        let name = node_name(Role::Notifier.tag(), topic);
        let (node, lifecycle) =
            Node::start(bus.clone(), &format!("client-{}", topic), name.clone()).await?;
        let commands = bus
            .serve(&Target::server(format!("notifier-{}", topic), name))
            .await?;
        Ok(Self {
            node,
            lifecycle,
            commands,
            bus,
            controller: Target::topic(format!("controller-{}", topic)),
            topic: topic.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            select! {
                lifecycle = self.lifecycle.recv() => match lifecycle {
                    Some(inbound) => {
                        answer_lifecycle(
                            &self.bus,
                            &self.controller,
                            Role::Notifier,
                            self.node.name(),
                            inbound,
                        )
                        .await
                    }
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(Inbound {
                        command: Command::StartNotify { calls, payload, severity, verbose },
                        ..
                    }) => {
                        self.run_notify_loop(calls, payload, severity, verbose).await?;
                    }
                    Some(inbound) => warn!(
                        "{} ignoring unexpected command: {:?}",
                        self.node.name(),
                        inbound.command
                    ),
                    None => break,
                },
            }
        }
        debug!("{} leaving the bus", self.node.name());
        Ok(())
    }

    async fn run_notify_loop(
        &self,
        calls: u64,
        payload: Vec<u8>,
        severity: Severity,
        verbose: bool,
    ) -> Result<()> {
        let bus = &self.bus;
        let topic = &self.topic;
        let publisher = self.node.name();
        run_timed_loop(
            bus,
            &self.controller,
            self.node.name(),
            calls,
            verbose,
            move || {
                let notification = Notification {
                    publisher: publisher.to_string(),
                    event_type: NOTIFICATION_EVENT.to_string(),
                    severity,
                    payload: payload.clone(),
                };
                async move { bus.notify(topic, notification).await }
            },
        )
        .await
    }
}

/// Minion that subscribes to the notification channel and logs what it
/// hears.
pub struct ListenerMinion {
    node: Node,
    lifecycle: CommandStream,
    stream: NotificationStream,
    bus: Arc<dyn MessageBus>,
    controller: Target,
}

impl ListenerMinion {
    pub async fn start(bus: Arc<dyn MessageBus>, topic: &str) -> Result<Self> {
        let name = node_name(Role::Listener.tag(), topic);
        let (node, lifecycle) =
            Node::start(bus.clone(), &format!("client-{}", topic), name.clone()).await?;
        let stream = bus.listen(topic, &name).await?;
        Ok(Self {
            node,
            lifecycle,
            stream,
            bus,
            controller: Target::topic(format!("controller-{}", topic)),
        })
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            select! {
                lifecycle = self.lifecycle.recv() => match lifecycle {
                    Some(inbound) => {
                        answer_lifecycle(
                            &self.bus,
                            &self.controller,
                            Role::Listener,
                            self.node.name(),
                            inbound,
                        )
                        .await
                    }
                    None => break,
                },
                notification = self.stream.recv() => match notification {
                    Some(n) => debug!(
                        "{} notification {}:{}:{} ({} bytes)",
                        self.node.name(),
                        n.severity,
                        n.publisher,
                        n.event_type,
                        n.payload.len()
                    ),
                    None => break,
                },
            }
        }
        debug!("{} leaving the bus", self.node.name());
        Ok(())
    }
}
