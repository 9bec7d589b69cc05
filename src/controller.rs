//! The orchestrating process: discovers minions, dispatches tests, and
//! aggregates results.
//!
//! All per-run mutable state lives in a single mutex-guarded slot.
//! Reports can arrive concurrently from any number of minions in any
//! order; each one is folded in — merge the latency summary, update the
//! throughput aggregate, bump the received count, check the completion
//! barrier — as one critical section, so no report is lost and the
//! barrier fires exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::bus::{CallPattern, Command, Inbound, MessageBus, Reply, Role, Severity, Target};
use crate::cli::TestKind;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::results::TestReport;
use crate::stats::SummaryStat;

/// Grace interval during which discovery replies accumulate.
pub const DISCOVERY_WINDOW: Duration = Duration::from_millis(200);

/// Drain period granted to minions after a shutdown broadcast.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Minions seen per role during the current discovery window.
///
/// Replies race with the grace-interval wait, so this is an
/// eventually-consistent snapshot: minions that answer after the window
/// closes are silently absent from that run's expected-reporter count.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    counts: HashMap<Role, usize>,
    total: usize,
}

impl RoleRegistry {
    fn record(&mut self, role: Role) {
        *self.counts.entry(role).or_insert(0) += 1;
        self.total += 1;
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.total = 0;
    }

    pub fn count(&self, role: Role) -> usize {
        self.counts.get(&role).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Transient state for one dispatched test.
struct TestRun {
    expected: usize,
    received: usize,
    latency: SummaryStat,
    throughput: SummaryStat,
    done: oneshot::Sender<RunResult>,
}

/// Aggregates handed over the completion barrier.
struct RunResult {
    latency: SummaryStat,
    throughput: SummaryStat,
    reporters: usize,
}

pub struct Controller {
    node: Node,
    bus: Arc<dyn MessageBus>,
    topic: String,
    timeout: Option<Duration>,
    registry: Arc<Mutex<RoleRegistry>>,
    run: Arc<Mutex<Option<TestRun>>>,
}

impl Controller {
    /// Join the bus under `controller-<topic>` and run one discovery
    /// round.
    pub async fn connect(
        bus: Arc<dyn MessageBus>,
        topic: &str,
        timeout: Option<Duration>,
    ) -> Result<Controller> {
        let name = format!("bench-controller-{}", topic);
        let (node, commands) =
            Node::start(bus.clone(), &format!("controller-{}", topic), name).await?;

        let registry = Arc::new(Mutex::new(RoleRegistry::default()));
        let run: Arc<Mutex<Option<TestRun>>> = Arc::new(Mutex::new(None));
        tokio::spawn(dispatch(commands, Arc::clone(&registry), Arc::clone(&run)));

        let controller = Controller {
            node,
            bus,
            topic: topic.to_string(),
            timeout,
            registry,
            run,
        };
        controller.discover().await?;
        Ok(controller)
    }

    /// Broadcast a discovery ping and accumulate identification replies
    /// for the fixed grace window. Resets the registry first.
    pub async fn discover(&self) -> Result<RoleRegistry> {
        self.registry.lock().unwrap().clear();
        self.bus
            .fanout(&Target::topic(format!("client-{}", self.topic)), Command::Ping)
            .await?;
        tokio::time::sleep(DISCOVERY_WINDOW).await;
        let snapshot = self.registry.lock().unwrap().clone();
        debug!(
            "discovery window closed: {} minion(s) visible",
            snapshot.total()
        );
        Ok(snapshot)
    }

    /// Current registry snapshot without re-running discovery.
    pub fn registry(&self) -> RoleRegistry {
        self.registry.lock().unwrap().clone()
    }

    pub async fn run_call_test(&self, calls: u64, length: usize, verbose: bool) -> Result<TestReport> {
        self.run_rpc_test(CallPattern::Call, calls, length, verbose).await
    }

    pub async fn run_cast_test(&self, calls: u64, length: usize, verbose: bool) -> Result<TestReport> {
        self.run_rpc_test(CallPattern::Cast, calls, length, verbose).await
    }

    async fn run_rpc_test(
        &self,
        pattern: CallPattern,
        calls: u64,
        length: usize,
        verbose: bool,
    ) -> Result<TestReport> {
        let test = match pattern {
            CallPattern::Call => TestKind::RpcCall,
            CallPattern::Cast => TestKind::RpcCast,
        };
        let start = Command::StartRpc {
            pattern,
            calls,
            payload: vec![b'X'; length],
            verbose,
        };
        self.run_test(test, Role::RpcClient, format!("rpc-client-{}", self.topic), start)
            .await
    }

    pub async fn run_notify_test(
        &self,
        calls: u64,
        length: usize,
        severity: Severity,
        verbose: bool,
    ) -> Result<TestReport> {
        let start = Command::StartNotify {
            calls,
            payload: vec![b'X'; length],
            severity,
            verbose,
        };
        self.run_test(
            TestKind::Notify,
            Role::Notifier,
            format!("notifier-{}", self.topic),
            start,
        )
        .await
    }

    /// Dispatch one test and wait on the completion barrier.
    async fn run_test(
        &self,
        test: TestKind,
        role: Role,
        start_topic: String,
        start: Command,
    ) -> Result<TestReport> {
        // Expected-reporter count is the role count at dispatch time.
        let expected = self.registry.lock().unwrap().count(role);
        if expected == 0 {
            return Err(Error::NoWorkersVisible { role });
        }

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut slot = self.run.lock().unwrap();
            *slot = Some(TestRun {
                expected,
                received: 0,
                latency: SummaryStat::new(),
                throughput: SummaryStat::new(),
                done: done_tx,
            });
        }

        debug!("dispatching {} to {} {} worker(s)", test, expected, role);
        self.bus.fanout(&Target::topic(start_topic), start).await?;

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, done_rx).await {
                Ok(received) => received,
                Err(_) => {
                    // All-or-nothing: a timed-out run reports failure,
                    // and whatever partial aggregate accumulated is
                    // discarded with the run state.
                    let _ = self.run.lock().unwrap().take();
                    return Err(Error::TestTimeout { test, timeout: limit });
                }
            },
            None => done_rx.await,
        };

        match result {
            Ok(run) => Ok(TestReport::new(test, run.latency, run.throughput, run.reporters)),
            // The barrier sender vanished without firing; the run state
            // was torn down underneath us.
            Err(_) => Err(Error::Bus(crate::bus::BusError::Closed)),
        }
    }

    /// Broadcast shutdown to every minion on the topic, give them the
    /// drain grace period, then tear down the controller's own node.
    pub async fn shutdown(mut self) -> Result<()> {
        self.bus
            .fanout(
                &Target::topic(format!("client-{}", self.topic)),
                Command::Shutdown,
            )
            .await?;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        self.bus.cast(self.node.target(), Command::Shutdown).await?;
        self.node.wait().await;
        Ok(())
    }
}

/// Inbound-command loop: identification replies and worker reports.
async fn dispatch(
    mut commands: mpsc::Receiver<Inbound>,
    registry: Arc<Mutex<RoleRegistry>>,
    run: Arc<Mutex<Option<TestRun>>>,
) {
    while let Some(inbound) = commands.recv().await {
        let Inbound { command, reply } = inbound;
        match command {
            Command::Pong { role, worker } => {
                registry.lock().unwrap().record(role);
                debug!("{} identified as {}", worker, role);
                if let Some(tx) = reply {
                    let _ = tx.send(Ok(Reply::Ack));
                }
            }
            Command::Report(report) => {
                let mut slot = run.lock().unwrap();
                let complete = match slot.as_mut() {
                    Some(state) => {
                        state.latency.merge(&report.latency);
                        state.throughput.update(report.throughput);
                        state.received += 1;
                        debug!(
                            "result {} of {} - throughput: {:.0}, latency: {}",
                            state.received, state.expected, report.throughput, report.latency
                        );
                        state.received == state.expected
                    }
                    None => {
                        debug!("dropping report from {} (no active run)", report.worker);
                        false
                    }
                };
                if complete {
                    if let Some(state) = slot.take() {
                        let _ = state.done.send(RunResult {
                            latency: state.latency,
                            throughput: state.throughput,
                            reporters: state.received,
                        });
                    }
                }
            }
            other => warn!("controller ignoring unexpected command: {:?}", other),
        }
    }
}
