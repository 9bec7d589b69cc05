//! Wire protocol and the message-bus seam.
//!
//! Everything the harness needs from the underlying messaging substrate
//! is expressed by the [`MessageBus`] trait: addressed request/response
//! (`call`), addressed fire-and-forget (`cast`), broadcast to all
//! subscribers of a topic (`fanout`), inbound endpoint registration
//! (`serve`), and a separate severity-leveled notification channel
//! (`notify`/`listen`). The crate ships one implementation, the
//! in-process [`LocalBus`]; external brokers plug in behind the same
//! trait.
//!
//! Commands are an explicit tagged enum rather than name-based method
//! dispatch, and cross the bus boundary as bincode frames so that what
//! a peer receives really is a byte-level snapshot of what was sent.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::stats::SummaryStat;

pub mod local;

pub use local::LocalBus;

/// Exchange shared by every harness endpoint.
pub const EXCHANGE: &str = "bus-bench";

/// Per-operation timeout for request/response calls issued by minions.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker role a minion performs in a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    RpcClient,
    RpcServer,
    Notifier,
    Listener,
}

impl Role {
    /// Short tag used in endpoint and node names.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::RpcClient => "rpc-client",
            Role::RpcServer => "rpc-server",
            Role::Notifier => "notifier",
            Role::Listener => "listener",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::RpcClient => write!(f, "RPC client"),
            Role::RpcServer => write!(f, "RPC server"),
            Role::Notifier => write!(f, "notifier"),
            Role::Listener => write!(f, "listener"),
        }
    }
}

/// Notification severity levels offered by the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Audit,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Audit => "audit",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "audit" => Ok(Severity::Audit),
            "info" => Ok(Severity::Info),
            "warn" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity {:?} (expected debug, audit, info, warn, error or critical)",
                other
            )),
        }
    }
}

/// Whether an RPC test loop uses request/response or fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPattern {
    Call,
    Cast,
}

/// Per-minion result shipped to the controller when a test loop ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Latency summary in milliseconds, one sample per operation.
    pub latency: SummaryStat,
    /// Operations per second over the whole loop.
    pub throughput: f64,
    pub calls: u64,
    pub worker: String,
}

/// Commands carried in bus frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Controller → minions (fanout): identify yourselves.
    Ping,
    /// Minion → controller (call): discovery reply.
    Pong { role: Role, worker: String },
    /// Readiness probe against a node's own control endpoint.
    SelfReady,
    /// Cooperative teardown.
    Shutdown,
    /// Controller → RPC clients (fanout): run a request loop.
    StartRpc {
        pattern: CallPattern,
        calls: u64,
        payload: Vec<u8>,
        verbose: bool,
    },
    /// Controller → notifiers (fanout): run an emission loop.
    StartNotify {
        calls: u64,
        payload: Vec<u8>,
        severity: Severity,
        verbose: bool,
    },
    /// Minion → controller (cast): per-worker result.
    Report(WorkerReport),
    /// RPC client → RPC server (call): payload comes back in the reply.
    Echo { payload: Vec<u8> },
    /// RPC client → RPC server (cast): payload is absorbed, no reply.
    Absorb { payload: Vec<u8> },
}

/// Replies to `call` deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Ack,
    Ready(bool),
    Payload(Vec<u8>),
}

/// One event on the notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub publisher: String,
    pub event_type: String,
    pub severity: Severity,
    pub payload: Vec<u8>,
}

/// Bus address: fixed exchange, a topic, and an optional server name.
///
/// An addressed target reaches one named endpoint. An unaddressed
/// `call`/`cast` reaches a single subscriber of the topic; `fanout`
/// reaches all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub exchange: String,
    pub topic: String,
    pub server: Option<String>,
}

impl Target {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            exchange: EXCHANGE.to_string(),
            topic: topic.into(),
            server: None,
        }
    }

    pub fn server(topic: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            exchange: EXCHANGE.to_string(),
            topic: topic.into(),
            server: Some(server.into()),
        }
    }

    /// Printable address, used in diagnostics.
    pub fn address(&self) -> String {
        match &self.server {
            Some(server) => format!("{}/{}/{}", self.exchange, self.topic, server),
            None => format!("{}/{}", self.exchange, self.topic),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("call timed out")]
    Timeout,

    #[error("no route to {address}")]
    NoRoute { address: String },

    #[error("endpoint closed")]
    Closed,

    #[error("frame codec error: {0}")]
    Codec(String),
}

/// Encode a value into an opaque bus frame.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BusError> {
    bincode::serialize(value).map_err(|e| BusError::Codec(e.to_string()))
}

/// Decode an opaque bus frame.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BusError> {
    bincode::deserialize(bytes).map_err(|e| BusError::Codec(e.to_string()))
}

/// An inbound command delivered to a served endpoint.
///
/// `reply` is present for `call` deliveries and absent for
/// `cast`/`fanout` ones.
#[derive(Debug)]
pub struct Inbound {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Result<Reply, BusError>>>,
}

impl Inbound {
    /// Answer the delivery when a reply is expected; a cast ignores it.
    pub fn respond(self, reply: Reply) {
        if let Some(tx) = self.reply {
            let _ = tx.send(Ok(reply));
        }
    }
}

/// Handle to a served command endpoint.
///
/// Dropping or stopping the endpoint removes it from the bus routing
/// table; already-queued deliveries are discarded.
pub struct Endpoint {
    pub(crate) inbound: mpsc::Receiver<Inbound>,
    pub(crate) unregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Endpoint {
    /// Next delivery; `None` once the endpoint has been stopped.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    pub fn stop(mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

/// Subscriber half of the notification channel.
pub struct NotificationStream {
    pub(crate) inbound: mpsc::Receiver<Notification>,
    pub(crate) unregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl NotificationStream {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.inbound.recv().await
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

/// The narrow interface the harness consumes from the messaging
/// substrate. Delivery is best effort within the substrate's own
/// guarantees; the orchestration layer never assumes more than that.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Point-to-point request/response. Fails with [`BusError::Timeout`]
    /// when no reply arrives in time.
    async fn call(
        &self,
        target: &Target,
        command: Command,
        timeout: Duration,
    ) -> Result<Reply, BusError>;

    /// Point-to-point fire-and-forget.
    async fn cast(&self, target: &Target, command: Command) -> Result<(), BusError>;

    /// Fire-and-forget to every current subscriber of the target topic.
    /// Broadcasting to zero subscribers is not an error.
    async fn fanout(&self, target: &Target, command: Command) -> Result<(), BusError>;

    /// Register an inbound command endpoint for the target address.
    async fn serve(&self, target: &Target) -> Result<Endpoint, BusError>;

    /// Emit one event on the notification channel for a topic.
    async fn notify(&self, topic: &str, notification: Notification) -> Result<(), BusError>;

    /// Subscribe to the notification channel for a topic.
    async fn listen(&self, topic: &str, server: &str) -> Result<NotificationStream, BusError>;
}
