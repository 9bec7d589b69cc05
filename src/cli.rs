//! Command-line interface and test-argument parsing.
//!
//! Arguments are validated eagerly: malformed `key=value` pairs,
//! unknown keys and unrecognized test names are rejected with a usage
//! diagnostic before any bus activity starts.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::bus::Severity;
use crate::error::{Error, Result};

/// Distributed load-testing harness for message-oriented substrates
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Address of the messaging service
    #[clap(long, default_value = "local://")]
    pub url: String,

    /// Service topic to coordinate on
    #[clap(long, default_value = crate::defaults::TOPIC)]
    pub topic: String,

    /// Enable DEBUG logging
    #[clap(long, default_value_t = false)]
    pub debug: bool,

    /// Fail a test that has not completed after this long (e.g. "30s", "2m")
    #[clap(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Write the combined report as JSON
    #[clap(long)]
    pub output_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub mode: Mode,
}

/// Operational mode.
#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Standalone RPC test: server, client and controller in-process
    Rpc {
        /// Number of RPC calls to perform
        #[clap(long, default_value_t = crate::defaults::CALLS)]
        calls: u64,

        /// Length in bytes of the payload
        #[clap(long, default_value_t = crate::defaults::PAYLOAD_LEN)]
        length: usize,

        /// RPC cast instead of RPC call
        #[clap(long, default_value_t = false)]
        cast: bool,

        /// How the test server dispatches requests
        #[clap(long, value_enum, default_value_t = Executor::Serial)]
        executor: Executor,
    },

    /// Standalone notification test: listener, notifier and controller
    Notify {
        /// Number of notifications to emit
        #[clap(long, default_value_t = crate::defaults::CALLS)]
        calls: u64,

        /// Length in bytes of the payload
        #[clap(long, default_value_t = crate::defaults::PAYLOAD_LEN)]
        length: usize,

        /// Severity to emit at
        #[clap(long, default_value = "debug", value_parser = parse_severity)]
        severity: Severity,
    },

    /// Drive a test against already-running minions
    Controller {
        /// The test to run (rpc-call, rpc-cast, notify, shutdown)
        test: String,

        /// Test arguments as key=value pairs
        args: Vec<String>,
    },

    /// RPC server minion
    RpcServer {
        /// How the test server dispatches requests
        #[clap(long, value_enum, default_value_t = Executor::Serial)]
        executor: Executor,
    },

    /// RPC client minion
    RpcClient,

    /// Notification listener minion
    Listener,

    /// Notifier minion
    Notifier,
}

/// Endpoint dispatch strategy for request-serving minions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Executor {
    /// Answer each request inline on the service loop
    Serial,
    /// Spawn a task per request
    Concurrent,
}

/// Tests the controller can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestKind {
    RpcCall,
    RpcCast,
    Notify,
    Shutdown,
}

impl TestKind {
    pub const NAMES: [&'static str; 4] = ["rpc-call", "rpc-cast", "notify", "shutdown"];

    pub fn parse(name: &str) -> Result<TestKind> {
        match name.to_ascii_lowercase().as_str() {
            "rpc-call" => Ok(TestKind::RpcCall),
            "rpc-cast" => Ok(TestKind::RpcCast),
            "notify" => Ok(TestKind::Notify),
            "shutdown" => Ok(TestKind::Shutdown),
            _ => Err(Error::UnknownTest {
                name: name.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::RpcCall => "rpc-call",
            TestKind::RpcCast => "rpc-cast",
            TestKind::Notify => "notify",
            TestKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments accepted by the `rpc-call` and `rpc-cast` tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTestArgs {
    pub calls: u64,
    pub length: usize,
}

/// Arguments accepted by the `notify` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyTestArgs {
    pub calls: u64,
    pub length: usize,
    pub severity: Severity,
    pub verbose: bool,
}

pub fn parse_rpc_test_args(args: &[String]) -> Result<RpcTestArgs> {
    let mut parsed = RpcTestArgs {
        calls: crate::defaults::CALLS,
        length: crate::defaults::PAYLOAD_LEN,
    };
    for arg in args {
        let (key, value) = split_pair(arg)?;
        match key.as_str() {
            "calls" => parsed.calls = parse_value(&key, value)?,
            "length" => parsed.length = parse_value(&key, value)?,
            _ => return Err(unknown_key(&key, &["calls", "length"])),
        }
    }
    ensure_calls(parsed.calls)?;
    Ok(parsed)
}

pub fn parse_notify_test_args(args: &[String]) -> Result<NotifyTestArgs> {
    let mut parsed = NotifyTestArgs {
        calls: crate::defaults::CALLS,
        length: crate::defaults::PAYLOAD_LEN,
        severity: Severity::Debug,
        verbose: false,
    };
    for arg in args {
        let (key, value) = split_pair(arg)?;
        match key.as_str() {
            "calls" => parsed.calls = parse_value(&key, value)?,
            "length" => parsed.length = parse_value(&key, value)?,
            "severity" => {
                parsed.severity = value.parse().map_err(Error::InvalidArgument)?;
            }
            "verbose" => parsed.verbose = parse_value(&key, value)?,
            _ => {
                return Err(unknown_key(
                    &key,
                    &["calls", "length", "severity", "verbose"],
                ))
            }
        }
    }
    ensure_calls(parsed.calls)?;
    Ok(parsed)
}

/// Zero-call loops are rejected up front; every dispatched loop has a
/// concrete iteration count.
pub fn ensure_calls(calls: u64) -> Result<()> {
    if calls == 0 {
        return Err(Error::InvalidArgument(
            "calls must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn split_pair(arg: &str) -> Result<(String, &str)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_ascii_lowercase(), value)),
        _ => Err(Error::InvalidArgument(format!(
            "argument format is key=value; {:?} is not valid",
            arg
        ))),
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    value.parse().map_err(|_| {
        Error::InvalidArgument(format!("invalid value {:?} for key {:?}", value, key))
    })
}

fn unknown_key(key: &str, recognized: &[&str]) -> Error {
    Error::InvalidArgument(format!(
        "unrecognized argument {:?} (recognized: {})",
        key,
        recognized.join(", ")
    ))
}

/// clap adapter for `--severity`.
fn parse_severity(s: &str) -> std::result::Result<Severity, String> {
    s.parse()
}

/// Parse a duration from a string (e.g. "500ms", "10s", "5m", "1h").
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        // Bare numbers default to seconds.
        (s, "s")
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", num_str))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs(num as u64),
        "m" => Duration::from_secs((num * 60.0) as u64),
        "h" => Duration::from_secs((num * 3600.0) as u64),
        _ => return Err(format!("invalid duration unit: {}", unit)),
    };

    Ok(duration)
}
