//! Transport seam used by the connection protocol.
//!
//! The protocol only needs two operations: push a message towards a peer and
//! poll the queue for one (sender, receiver) pair. Queue keys follow the
//! `sender + "-" + receiver` convention.

use super::message::{AgentId, ConnectMessage, Message};
use crate::error::{Result, SimError};
use crate::mailbox::{ChannelHandler, Mailbox};
use crossbeam::queue::SegQueue;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Channel id connect messages travel on when routed through a mailbox.
pub const CONNECT_CHANNEL: &str = "HierarchicalConnectCommunicationChannel";

pub fn queue_key(sender: &str, receiver: &str) -> String {
    format!("{}-{}", sender, receiver)
}

pub trait Transport: Send + Sync {
    /// Hands `message` to the transport. `Ok(false)` means it was dropped in transit.
    fn send_remote(&self, message: &ConnectMessage) -> Result<bool>;

    /// Pops the oldest message on `queue_key`, if any. Never blocks.
    fn receive_remote(&self, queue_key: &str) -> Result<Option<ConnectMessage>>;

    /// Stops listening on `queue_key`: drops what is queued there now and
    /// anything that arrives later. Returns how many messages were dropped.
    fn close_queue(&self, queue_key: &str) -> Result<usize>;
}

/// Broker stand-in: named queues of serialized messages, optionally lossy.
///
/// Messages are stored as JSON so everything crossing it must survive a
/// process boundary.
pub struct InMemoryBroker {
    queues: DashMap<String, SegQueue<String>>,
    closed_queues: DashSet<String>,
    closed: AtomicBool,
    loss: f64,
    rng: Mutex<Option<ChaCha8Rng>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            closed_queues: DashSet::new(),
            closed: AtomicBool::new(false),
            loss: 0.0,
            rng: Mutex::new(None),
        }
    }

    /// A broker that drops each message with probability `loss`.
    pub fn with_loss(loss: f64, rng: ChaCha8Rng) -> Self {
        Self {
            loss: loss.clamp(0.0, 1.0),
            rng: Mutex::new(Some(rng)),
            ..Self::new()
        }
    }

    /// Every later send/receive fails with a transport error.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn pending(&self, queue_key: &str) -> usize {
        self.queues.get(queue_key).map(|q| q.len()).unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SimError::transport("broker connection closed"));
        }
        Ok(())
    }

    fn lost_in_transit(&self) -> bool {
        if self.loss <= 0.0 {
            return false;
        }
        match self.rng.lock().as_mut() {
            Some(rng) => rng.r#gen::<f64>() < self.loss,
            None => false,
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryBroker {
    fn send_remote(&self, message: &ConnectMessage) -> Result<bool> {
        self.ensure_open()?;

        let key = queue_key(message.sender().abbrev(), message.receiver().abbrev());
        let wire = serde_json::to_string(message).map_err(SimError::transport)?;

        if self.lost_in_transit() {
            debug!("Broker dropped message on {}", key);
            return Ok(false);
        }

        if self.closed_queues.contains(&key) {
            trace!("Broker discarded message on closed queue {}", key);
            return Ok(true);
        }
        trace!("Broker queued message on {}", key);
        self.queues.entry(key).or_default().push(wire);
        Ok(true)
    }

    fn receive_remote(&self, queue_key: &str) -> Result<Option<ConnectMessage>> {
        self.ensure_open()?;

        let wire = match self.queues.get(queue_key) {
            Some(queue) => queue.pop(),
            None => None,
        };

        wire.map(|w| serde_json::from_str(&w).map_err(SimError::transport))
            .transpose()
    }

    fn close_queue(&self, queue_key: &str) -> Result<usize> {
        self.ensure_open()?;
        self.closed_queues.insert(queue_key.to_string());
        Ok(self.queues.remove(queue_key).map(|(_, q)| q.len()).unwrap_or(0))
    }
}

/// Channel handler that files connect messages by queue key.
#[derive(Default)]
pub struct ConnectInbox {
    queues: DashMap<String, SegQueue<ConnectMessage>>,
    closed: DashSet<String>,
}

impl ConnectInbox {
    pub fn pop(&self, queue_key: &str) -> Option<ConnectMessage> {
        self.queues.get(queue_key).and_then(|q| q.pop())
    }

    /// Drops the messages filed under `queue_key` and refuses later ones.
    pub fn close(&self, queue_key: &str) -> usize {
        self.closed.insert(queue_key.to_string());
        self.queues.remove(queue_key).map(|(_, q)| q.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChannelHandler for ConnectInbox {
    fn channel_content(&self, payload: Value) -> Result<()> {
        let message: ConnectMessage = serde_json::from_value(payload).map_err(SimError::transport)?;
        let key = queue_key(message.sender().abbrev(), message.receiver().abbrev());
        if self.closed.contains(&key) {
            trace!("Inbox discarded late message on {}", key);
            return Ok(());
        }
        self.queues.entry(key).or_default().push(message);
        Ok(())
    }
}

/// Routes connect messages through the local mailbox, so they pick up the
/// mailbox's failure rates and its one-turn latency.
pub struct MailboxTransport {
    mailbox: Arc<Mailbox>,
    inbox: Arc<ConnectInbox>,
}

impl MailboxTransport {
    /// Installs a [`ConnectInbox`] on `CONNECT_CHANNEL` of `mailbox`.
    pub fn attach(mailbox: Arc<Mailbox>) -> Result<Self> {
        let inbox = Arc::new(ConnectInbox::default());
        if !mailbox.add_channel(CONNECT_CHANNEL, inbox.clone()) {
            return Err(SimError::config(format!(
                "{} already has a handler on {}",
                mailbox.owner(),
                CONNECT_CHANNEL
            )));
        }
        Ok(Self { mailbox, inbox })
    }

    pub fn inbox(&self) -> &ConnectInbox {
        &self.inbox
    }
}

impl Transport for MailboxTransport {
    fn send_remote(&self, message: &ConnectMessage) -> Result<bool> {
        let target = AgentId::new(message.receiver().abbrev())?;
        let local = Message::local(
            self.mailbox.owner().clone(),
            target.clone(),
            message.performative(),
            message.content().clone(),
        );
        let payload = serde_json::to_value(&local).map_err(SimError::transport)?;
        self.mailbox.send(&target, Some(CONNECT_CHANNEL), payload)
    }

    fn receive_remote(&self, queue_key: &str) -> Result<Option<ConnectMessage>> {
        Ok(self.inbox.pop(queue_key))
    }

    fn close_queue(&self, queue_key: &str) -> Result<usize> {
        Ok(self.inbox.close(queue_key))
    }
}
