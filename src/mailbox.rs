//! Per-agent local mailbox.
//!
//! Packets land in the target's *incoming* queue the instant they are sent.
//! They become visible to the owner only after its next [`Mailbox::reset`],
//! which releases every packet stamped before the current turn, subjects each
//! one to the receive-failure draw and routes it to a channel handler or to
//! the generic contents queue.

use crate::agent::Agent;
use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::network::{AgentId, Packet};
use crate::registry::AgentRegistry;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace};

pub const MIN_RANGE: u32 = 1;
pub const MAX_RANGE: u32 = 5;

/// Receivers starting with this prefix address every live agent, self included.
pub const BROADCAST_PREFIX: &str = "broadcast";

/// Consumer for one channel id. Invoked from the owner's `reset()`.
pub trait ChannelHandler: Send + Sync {
    fn channel_content(&self, payload: Value) -> Result<()>;
}

impl<F> ChannelHandler for F
where
    F: Fn(Value) -> Result<()> + Send + Sync,
{
    fn channel_content(&self, payload: Value) -> Result<()> {
        self(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub range: u32,
    pub send_failure: f64,
    pub receive_failure: f64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            range: MAX_RANGE,
            send_failure: 0.0,
            receive_failure: 0.0,
        }
    }
}

impl MailboxConfig {
    pub fn lossy(send_failure: f64, receive_failure: f64) -> Self {
        Self {
            send_failure,
            receive_failure,
            ..Self::default()
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            range: self.range.clamp(MIN_RANGE, MAX_RANGE),
            send_failure: clamp_rate(self.send_failure),
            receive_failure: clamp_rate(self.receive_failure),
        }
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) }
}

/// Counts produced by one [`Mailbox::reset`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResetStats {
    pub delivered: usize,
    pub routed: usize,
    pub lost: usize,
}

pub struct Mailbox {
    owner: AgentId,
    config: RwLock<MailboxConfig>,
    incoming: Mutex<VecDeque<Packet>>,
    contents: Mutex<VecDeque<Packet>>,
    channels: RwLock<HashMap<String, Arc<dyn ChannelHandler>>>,
    rng: Mutex<ChaCha8Rng>,
    directory: Weak<AgentRegistry>,
    ctx: Arc<SimContext>,
}

impl Mailbox {
    pub fn new(
        owner: AgentId,
        config: MailboxConfig,
        directory: Weak<AgentRegistry>,
        ctx: Arc<SimContext>,
    ) -> Self {
        let rng = ctx.derive_rng_for(owner.as_str());
        Self {
            owner,
            config: RwLock::new(config.clamped()),
            incoming: Mutex::new(VecDeque::new()),
            contents: Mutex::new(VecDeque::new()),
            channels: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
            directory,
            ctx,
        }
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    /// Directed send. `Ok(false)` when the send draw fails or the target is
    /// unknown or disabled.
    pub fn send(&self, target: &AgentId, channel: Option<&str>, payload: Value) -> Result<bool> {
        self.ensure_payload(&payload)?;

        if !self.draw_send() {
            self.ctx.metrics.packet_dropped();
            debug!("{} -> {}: send dropped", self.owner, target);
            return Ok(false);
        }

        let Some(directory) = self.directory.upgrade() else {
            return Ok(false);
        };
        match directory.get(target) {
            Some(agent) => self.hand_off(&agent, channel, payload, false),
            None => {
                debug!("{} -> {}: no such agent", self.owner, target);
                Ok(false)
            }
        }
    }

    /// Directed send or broadcast, picked by the receiver string.
    pub fn send_local(&self, receiver: &str, channel: Option<&str>, payload: Value) -> Result<bool> {
        if receiver.starts_with(BROADCAST_PREFIX) {
            return Ok(self.broadcast_include_self(channel, payload)? > 0);
        }
        let target = AgentId::new(receiver)?;
        self.send(&target, channel, payload)
    }

    /// Sends to every live agent under the registry's compound lock, one
    /// independent send draw per target. Returns how many agents got it.
    pub fn broadcast(&self, channel: Option<&str>, payload: Value, include_self: bool) -> Result<usize> {
        self.ensure_payload(&payload)?;

        let Some(directory) = self.directory.upgrade() else {
            return Ok(0);
        };

        let _guard = directory.lock_data();
        let mut delivered = 0;
        for agent in directory.live_agents() {
            if !include_self && agent.id() == &self.owner {
                continue;
            }
            if !self.draw_send() {
                self.ctx.metrics.packet_dropped();
                continue;
            }
            if self.hand_off(&agent, channel, payload.clone(), true)? {
                delivered += 1;
            }
        }

        trace!("{} broadcast on {:?} reached {} agents", self.owner, channel, delivered);
        Ok(delivered)
    }

    pub fn broadcast_include_self(&self, channel: Option<&str>, payload: Value) -> Result<usize> {
        self.broadcast(channel, payload, true)
    }

    fn hand_off(&self, agent: &Agent, channel: Option<&str>, payload: Value, broadcast: bool) -> Result<bool> {
        if !agent.is_alive() {
            return Ok(false);
        }
        let receiver = if broadcast { None } else { Some(agent.id().clone()) };
        let packet = Packet::new(
            self.owner.clone(),
            receiver,
            channel.map(str::to_string),
            payload,
            self.ctx.turn(),
        )?;
        agent.mailbox().accept(packet);
        self.ctx.metrics.packet_sent();
        Ok(true)
    }

    pub(crate) fn accept(&self, packet: Packet) {
        self.incoming.lock().push_back(packet);
    }

    /// Moves packets sent in earlier turns from incoming into contents.
    ///
    /// Handler errors are logged and the packet counts as consumed.
    pub fn reset(&self) -> ResetStats {
        let turn = self.ctx.turn();
        let ready: Vec<Packet> = {
            let mut incoming = self.incoming.lock();
            // Stamps are monotonic in queue order, so stop at the first
            // packet from the current turn.
            let mut ready = Vec::new();
            while incoming.front().is_some_and(|p| p.deliverable_at(turn)) {
                if let Some(packet) = incoming.pop_front() {
                    ready.push(packet);
                }
            }
            ready
        };

        let mut stats = ResetStats::default();
        for packet in ready {
            if !self.draw_receive() {
                self.ctx.metrics.packet_lost();
                stats.lost += 1;
                debug!("{}: packet from {} lost on receive", self.owner, packet.sender);
                continue;
            }
            self.ctx.metrics.packet_delivered();
            stats.delivered += 1;

            let handler = packet
                .channel
                .as_deref()
                .and_then(|ch| self.channels.read().get(ch).cloned());

            match handler {
                Some(handler) => {
                    stats.routed += 1;
                    if let Err(e) = handler.channel_content(packet.payload) {
                        error!(
                            "{}: handler for {:?} failed: {}",
                            self.owner, packet.channel, e
                        );
                    }
                }
                None => self.contents.lock().push_back(packet),
            }
        }
        stats
    }

    /// Pops the next unrouted payload, if any.
    pub fn receive(&self) -> Option<Value> {
        self.receive_packet().map(|p| p.payload)
    }

    pub fn receive_packet(&self) -> Option<Packet> {
        self.contents.lock().pop_front()
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming.lock().len()
    }

    pub fn contents_len(&self) -> usize {
        self.contents.lock().len()
    }

    /// Returns false if a handler is already registered for `channel`.
    pub fn add_channel(&self, channel: &str, handler: Arc<dyn ChannelHandler>) -> bool {
        let mut channels = self.channels.write();
        if channels.contains_key(channel) {
            return false;
        }
        channels.insert(channel.to_string(), handler);
        true
    }

    pub fn remove_channel(&self, channel: &str) -> bool {
        self.channels.write().remove(channel).is_some()
    }

    pub fn replace_channel(&self, channel: &str, handler: Arc<dyn ChannelHandler>) -> bool {
        match self.channels.write().get_mut(channel) {
            Some(slot) => {
                *slot = handler;
                true
            }
            None => false,
        }
    }

    pub fn channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn config(&self) -> MailboxConfig {
        *self.config.read()
    }

    pub fn range(&self) -> u32 {
        self.config.read().range
    }

    pub fn set_range(&self, range: u32) {
        self.config.write().range = range.clamp(MIN_RANGE, MAX_RANGE);
    }

    pub fn send_failure(&self) -> f64 {
        self.config.read().send_failure
    }

    pub fn set_send_failure(&self, rate: f64) {
        self.config.write().send_failure = clamp_rate(rate);
    }

    pub fn receive_failure(&self) -> f64 {
        self.config.read().receive_failure
    }

    pub fn set_receive_failure(&self, rate: f64) {
        self.config.write().receive_failure = clamp_rate(rate);
    }

    /// Score reported to capability-scoring callers.
    pub fn failure(&self) -> f64 {
        let config = self.config.read();
        (config.send_failure + config.receive_failure) / 2.0
    }

    fn ensure_payload(&self, payload: &Value) -> Result<()> {
        if payload.is_null() {
            return Err(SimError::config(format!("{}: payload cannot be null", self.owner)));
        }
        Ok(())
    }

    fn draw_send(&self) -> bool {
        let threshold = self.send_failure();
        self.rng.lock().r#gen::<f64>() > threshold
    }

    fn draw_receive(&self) -> bool {
        let threshold = self.receive_failure();
        self.rng.lock().r#gen::<f64>() > threshold
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("owner", &self.owner)
            .field("config", &*self.config.read())
            .field("incoming", &self.incoming_len())
            .field("contents", &self.contents_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organization::Organization;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn org_with(ids: &[&str], config: MailboxConfig) -> Organization {
        let org = Organization::new("test", SimContext::shared(42), None);
        for id in ids {
            org.create_agent(id, "node", config).unwrap();
        }
        org
    }

    fn mailbox(org: &Organization, id: &str) -> Arc<Mailbox> {
        let id = AgentId::new(id).unwrap();
        org.registry().get(&id).unwrap().mailbox().clone()
    }

    #[test]
    fn test_packet_invisible_until_next_turn() {
        let org = org_with(&["A", "B"], MailboxConfig::default());
        let a = mailbox(&org, "A");
        let b = mailbox(&org, "B");

        let target = AgentId::new("B").unwrap();
        assert!(a.send(&target, None, json!("ping")).unwrap());
        assert_eq!(b.incoming_len(), 1);

        // Same turn: nothing visible yet
        assert_eq!(b.reset().delivered, 0);
        assert!(b.receive().is_none());

        org.context().clock.advance();
        assert_eq!(b.reset().delivered, 1);
        assert_eq!(b.receive(), Some(json!("ping")));
        assert!(b.receive().is_none());
    }

    #[test]
    fn test_broadcast_fan_out() {
        let org = org_with(&["A", "B", "C", "D"], MailboxConfig::default());
        let a = mailbox(&org, "A");

        assert_eq!(a.broadcast_include_self(None, json!(1)).unwrap(), 4);
        assert_eq!(a.broadcast(None, json!(2), false).unwrap(), 3);
        assert_eq!(a.incoming_len(), 1);
        assert_eq!(mailbox(&org, "D").incoming_len(), 2);
    }

    #[test]
    fn test_broadcast_skips_disabled_agents() {
        let org = org_with(&["A", "B", "C"], MailboxConfig::default());
        let c = org.registry().get(&AgentId::new("C").unwrap()).unwrap();
        c.disable();

        let a = mailbox(&org, "A");
        assert_eq!(a.broadcast(None, json!("x"), false).unwrap(), 1);
        assert!(!a.send(c.id(), None, json!("x")).unwrap());
    }

    #[test]
    fn test_send_local_broadcast_prefix() {
        let org = org_with(&["A", "B"], MailboxConfig::default());
        let a = mailbox(&org, "A");
        assert!(a.send_local("broadcast-all", None, json!("hi")).unwrap());
        assert_eq!(a.incoming_len(), 1);
        assert!(a.send_local("B", None, json!("direct")).unwrap());
        assert!(!a.send_local("Nobody", None, json!("lost")).unwrap());
    }

    #[test]
    fn test_certain_send_failure_never_delivers() {
        let org = org_with(&["A", "B"], MailboxConfig::lossy(1.0, 0.0));
        let a = mailbox(&org, "A");
        let b = mailbox(&org, "B");
        let target = AgentId::new("B").unwrap();

        for _ in 0..50 {
            assert!(!a.send(&target, None, json!("x")).unwrap());
        }
        assert_eq!(a.broadcast(None, json!("x"), true).unwrap(), 0);
        org.context().clock.advance();
        assert_eq!(b.reset(), ResetStats::default());
        assert_eq!(org.context().metrics.snapshot(1).packets_sent, 0);
    }

    #[test]
    fn test_certain_receive_failure_discards_everything() {
        let org = org_with(&["A", "B"], MailboxConfig::lossy(0.0, 1.0));
        let a = mailbox(&org, "A");
        let b = mailbox(&org, "B");
        let target = AgentId::new("B").unwrap();

        for i in 0..20 {
            assert!(a.send(&target, None, json!(i)).unwrap());
        }
        org.context().clock.advance();
        let stats = b.reset();
        assert_eq!(stats.lost, 20);
        assert_eq!(b.contents_len(), 0);
        assert_eq!(b.incoming_len(), 0);
    }

    #[test]
    fn test_channel_routing_and_replacement() {
        let org = org_with(&["A", "B"], MailboxConfig::default());
        let a = mailbox(&org, "A");
        let b = mailbox(&org, "B");

        let first = Arc::new(AtomicUsize::new(0));
        let counter = first.clone();
        let handler = move |_: Value| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        assert!(b.add_channel("ctl", Arc::new(handler)));
        assert!(!b.add_channel("ctl", Arc::new(|_: Value| -> Result<()> { Ok(()) })));

        let target = AgentId::new("B").unwrap();
        a.send(&target, Some("ctl"), json!("on")).unwrap();
        a.send(&target, Some("other"), json!("plain")).unwrap();
        org.context().clock.advance();

        let stats = b.reset();
        assert_eq!(stats.routed, 1);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(b.receive(), Some(json!("plain")));

        let failing = |_: Value| -> Result<()> { Err(SimError::config("boom")) };
        assert!(b.replace_channel("ctl", Arc::new(failing)));
        assert!(!b.replace_channel("missing", Arc::new(|_: Value| -> Result<()> { Ok(()) })));
        a.send(&target, Some("ctl"), json!("again")).unwrap();
        org.context().clock.advance();
        // Handler error is swallowed and the packet is consumed
        assert_eq!(b.reset().routed, 1);
        assert!(b.receive().is_none());
        assert!(b.remove_channel("ctl"));
    }

    #[test]
    fn test_null_payload_rejected() {
        let org = org_with(&["A", "B"], MailboxConfig::default());
        let a = mailbox(&org, "A");
        let target = AgentId::new("B").unwrap();
        assert!(matches!(a.send(&target, None, Value::Null), Err(SimError::Config(_))));
    }

    #[test]
    fn test_config_clamping_and_failure_score() {
        let org = org_with(&["A"], MailboxConfig::default());
        let a = mailbox(&org, "A");
        a.set_range(99);
        assert_eq!(a.range(), MAX_RANGE);
        a.set_range(0);
        assert_eq!(a.range(), MIN_RANGE);
        a.set_send_failure(1.7);
        a.set_receive_failure(0.2);
        assert_eq!(a.send_failure(), 1.0);
        assert!((a.failure() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_fifo_per_sender_across_turns() {
        let org = org_with(&["A", "B"], MailboxConfig::default());
        let a = mailbox(&org, "A");
        let b = mailbox(&org, "B");
        let target = AgentId::new("B").unwrap();

        a.send(&target, None, json!(1)).unwrap();
        org.context().clock.advance();
        a.send(&target, None, json!(2)).unwrap();
        org.context().clock.advance();
        a.send(&target, None, json!(3)).unwrap();

        b.reset();
        assert_eq!(b.receive(), Some(json!(1)));
        assert_eq!(b.receive(), Some(json!(2)));
        assert!(b.receive().is_none());
        assert_eq!(b.incoming_len(), 1);
    }
}
