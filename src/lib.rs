//! # Bus Bench
//!
//! A distributed load-testing harness for message-oriented
//! request/response and publish/subscribe substrates.
//!
//! A single controller discovers an unknown, dynamically-sized
//! population of worker processes ("minions"), dispatches a test to all
//! of them simultaneously, waits for completion under a timeout, and
//! combines per-worker performance summaries into one statistically
//! correct aggregate — without ever collecting raw per-call samples
//! centrally. Each minion times its operations into a commutative,
//! mergeable [`SummaryStat`]; the controller merges snapshots in
//! whatever order they arrive.
//!
//! ## Module layout
//!
//! - `stats`: the streaming summary statistic and its merge algebra
//! - `bus`: wire commands, addressing, the [`MessageBus`] seam, and the
//!   in-process [`LocalBus`] transport
//! - `node`: base lifecycle shared by every process on the bus
//!   (endpoint registration, readiness probe, cooperative shutdown)
//! - `minion`: the four worker role variants and their test loops
//! - `controller`: discovery, the role registry, and the test-run
//!   coordinator (completion barrier + merge + timeout)
//! - `results`: combined test reports and output
//! - `cli`: command-line surface and `key=value` test arguments
//!
//! ## Usage example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bus_bench::bus::{LocalBus, MessageBus};
//! use bus_bench::controller::Controller;
//! use bus_bench::minion::{RpcClientMinion, RpcServerMinion};
//! use bus_bench::cli::Executor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
//!
//!     let server = RpcServerMinion::start(bus.clone(), "demo", Executor::Serial).await?;
//!     tokio::spawn(server.run());
//!     let client = RpcClientMinion::start(bus.clone(), "demo").await?;
//!     tokio::spawn(client.run());
//!
//!     let controller = Controller::connect(bus, "demo", None).await?;
//!     let report = controller.run_call_test(1000, 1024, false).await?;
//!     println!("{}", report);
//!     controller.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod cli;
pub mod controller;
pub mod error;
pub mod logging;
pub mod minion;
pub mod node;
pub mod results;
pub mod stats;

pub use bus::{LocalBus, MessageBus, Role, Severity};
pub use cli::{Args, Mode, TestKind};
pub use controller::Controller;
pub use error::{Error, Result};
pub use results::TestReport;
pub use stats::SummaryStat;

/// The current version of the harness, populated from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values.
pub mod defaults {
    /// Payload length in bytes shipped with each test operation.
    pub const PAYLOAD_LEN: usize = 1024;

    /// Number of operations a test loop performs.
    pub const CALLS: u64 = 1;

    /// Topic minions and controller coordinate on.
    pub const TOPIC: &str = "test-topic";
}
