//! In-process loopback bus.
//!
//! Routes frames between endpoints living in the same process over
//! tokio channels. The standalone modes and the test suite run on this
//! transport; an external broker would implement [`MessageBus`] behind
//! the same seam. Commands still pass through the frame codec on every
//! delivery, so receivers observe snapshots exactly as they would
//! across a real wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{
    decode, encode, BusError, Command, Endpoint, Inbound, MessageBus, Notification,
    NotificationStream, Reply, Target,
};

/// Queued deliveries per endpoint before senders back off.
const INBOX_DEPTH: usize = 1024;

type TopicKey = (String, String);

struct Subscriber {
    id: u64,
    server: String,
    tx: mpsc::Sender<Inbound>,
}

struct ListenerSub {
    id: u64,
    tx: mpsc::Sender<Notification>,
}

#[derive(Default)]
struct Router {
    next_id: u64,
    endpoints: HashMap<TopicKey, Vec<Subscriber>>,
    /// Round-robin cursor per topic for unaddressed sends.
    cursors: HashMap<TopicKey, usize>,
    listeners: HashMap<String, Vec<ListenerSub>>,
}

impl Router {
    fn resolve_one(&mut self, target: &Target) -> Result<mpsc::Sender<Inbound>, BusError> {
        let key = (target.exchange.clone(), target.topic.clone());
        let no_route = || BusError::NoRoute {
            address: target.address(),
        };
        let subs = self
            .endpoints
            .get(&key)
            .filter(|subs| !subs.is_empty())
            .ok_or_else(no_route)?;
        match &target.server {
            Some(name) => subs
                .iter()
                .find(|sub| sub.server == *name)
                .map(|sub| sub.tx.clone())
                .ok_or_else(no_route),
            None => {
                let cursor = self.cursors.entry(key).or_insert(0);
                let sub = &subs[*cursor % subs.len()];
                *cursor = (*cursor + 1) % subs.len();
                Ok(sub.tx.clone())
            }
        }
    }

    fn resolve_all(&self, target: &Target) -> Vec<mpsc::Sender<Inbound>> {
        let key = (target.exchange.clone(), target.topic.clone());
        self.endpoints
            .get(&key)
            .map(|subs| subs.iter().map(|sub| sub.tx.clone()).collect())
            .unwrap_or_default()
    }
}

/// The built-in `local://` transport.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<Mutex<Router>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-encode a command so the receiver gets a byte-level snapshot,
    /// never a value shared with the sender.
    fn snapshot(command: &Command) -> Result<Command, BusError> {
        let frame = encode(command)?;
        decode(&frame)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn call(
        &self,
        target: &Target,
        command: Command,
        timeout: Duration,
    ) -> Result<Reply, BusError> {
        let tx = self.inner.lock().unwrap().resolve_one(target)?;
        let command = Self::snapshot(&command)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Inbound {
            command,
            reply: Some(reply_tx),
        })
        .await
        .map_err(|_| BusError::Closed)?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Err(_) => Err(BusError::Timeout),
            Ok(Err(_)) => Err(BusError::Closed),
            Ok(Ok(result)) => result,
        }
    }

    async fn cast(&self, target: &Target, command: Command) -> Result<(), BusError> {
        let tx = self.inner.lock().unwrap().resolve_one(target)?;
        let command = Self::snapshot(&command)?;
        tx.send(Inbound {
            command,
            reply: None,
        })
        .await
        .map_err(|_| BusError::Closed)
    }

    async fn fanout(&self, target: &Target, command: Command) -> Result<(), BusError> {
        let txs = self.inner.lock().unwrap().resolve_all(target);
        for tx in txs {
            let command = Self::snapshot(&command)?;
            // A subscriber that disappeared mid-fanout is not an error.
            let _ = tx
                .send(Inbound {
                    command,
                    reply: None,
                })
                .await;
        }
        Ok(())
    }

    async fn serve(&self, target: &Target) -> Result<Endpoint, BusError> {
        let server = target.server.clone().ok_or_else(|| BusError::NoRoute {
            address: target.address(),
        })?;
        let key = (target.exchange.clone(), target.topic.clone());
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);

        let id = {
            let mut router = self.inner.lock().unwrap();
            let id = router.next_id;
            router.next_id += 1;
            router.endpoints.entry(key.clone()).or_default().push(Subscriber {
                id,
                server: server.clone(),
                tx,
            });
            id
        };
        debug!("endpoint registered at {}", target.address());

        let inner = Arc::clone(&self.inner);
        let address = target.address();
        let unregister = move || {
            let mut router = inner.lock().unwrap();
            if let Some(subs) = router.endpoints.get_mut(&key) {
                subs.retain(|sub| sub.id != id);
                if subs.is_empty() {
                    router.endpoints.remove(&key);
                    router.cursors.remove(&key);
                }
            }
            debug!("endpoint removed from {}", address);
        };

        Ok(Endpoint {
            inbound: rx,
            unregister: Some(Box::new(unregister)),
        })
    }

    async fn notify(&self, topic: &str, notification: Notification) -> Result<(), BusError> {
        let txs: Vec<_> = {
            let router = self.inner.lock().unwrap();
            router
                .listeners
                .get(topic)
                .map(|subs| subs.iter().map(|sub| sub.tx.clone()).collect())
                .unwrap_or_default()
        };
        for tx in txs {
            let frame = encode(&notification)?;
            let snapshot: Notification = decode(&frame)?;
            let _ = tx.send(snapshot).await;
        }
        Ok(())
    }

    async fn listen(&self, topic: &str, server: &str) -> Result<NotificationStream, BusError> {
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        let id = {
            let mut router = self.inner.lock().unwrap();
            let id = router.next_id;
            router.next_id += 1;
            router
                .listeners
                .entry(topic.to_string())
                .or_default()
                .push(ListenerSub { id, tx });
            id
        };
        debug!("{} listening for notifications on {}", server, topic);

        let inner = Arc::clone(&self.inner);
        let topic = topic.to_string();
        let unregister = move || {
            let mut router = inner.lock().unwrap();
            if let Some(subs) = router.listeners.get_mut(&topic) {
                subs.retain(|sub| sub.id != id);
                if subs.is_empty() {
                    router.listeners.remove(&topic);
                }
            }
        };

        Ok(NotificationStream {
            inbound: rx,
            unregister: Some(Box::new(unregister)),
        })
    }
}
