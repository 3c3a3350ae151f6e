//! Hello handshake that drives each guideline from unconnected to connected.
//!
//! Each `check_*` call is one protocol round for the links it covers. A link
//! is connected once the peer's hello addressed to us shows up on the
//! transport, or once any other path has already recorded it in the graph.
//! While a link waits, hellos are resent with exponential backoff counted in
//! rounds of that link.

use super::graph::ConnectionGraph;
use super::guideline::{ConnectionGuideline, Connections, LinkDirection};
use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::metrics::MetricsCollector;
use crate::network::{queue_key, AgentId, ConnectMessage, Performative, Transport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Hellos per link before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Rounds to wait after the first resend. 0 resends every round.
    pub backoff_base_rounds: u32,
    pub backoff_max_rounds: u32,
    pub handshake_timeout_ms: Option<u64>,
    /// Pause after a parent link completes.
    pub post_connect_pause_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(64),
            backoff_base_rounds: 1,
            backoff_max_rounds: 8,
            handshake_timeout_ms: None,
            post_connect_pause_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Resend on every round, forever.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff_base_rounds: 0,
            backoff_max_rounds: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.handshake_timeout_ms = timeout_ms;
        self
    }

    /// Rounds to hold off after `attempts` hellos have gone out.
    pub fn backoff_rounds(&self, attempts: u32) -> u64 {
        if self.backoff_base_rounds == 0 || attempts == 0 {
            return 0;
        }
        let shift = (attempts - 1).min(16);
        let rounds = (self.backoff_base_rounds as u64) << shift;
        rounds.min(self.backoff_max_rounds.max(self.backoff_base_rounds) as u64)
    }
}

#[derive(Debug)]
struct LinkState {
    guideline: ConnectionGuideline,
    attempts: u32,
    rounds: u64,
    next_send_round: u64,
    first_sent: Option<Instant>,
}

impl LinkState {
    fn new(guideline: ConnectionGuideline) -> Self {
        Self {
            guideline,
            attempts: 0,
            rounds: 0,
            next_send_round: 0,
            first_sent: None,
        }
    }
}

pub struct ConnectionProtocol {
    me: String,
    links: Mutex<Vec<LinkState>>,
    graph: Arc<ConnectionGraph>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl ConnectionProtocol {
    pub fn new(
        me: &AgentId,
        connections: Connections,
        ctx: &SimContext,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        connections.validate()?;
        if let Some(own) = connections.guidelines.iter().find(|g| g.peer() == me.as_str()) {
            return Err(SimError::config(format!(
                "{} has a guideline pointing at itself ({:?})",
                me,
                own.direction()
            )));
        }

        Ok(Self {
            me: me.as_str().to_string(),
            links: Mutex::new(connections.guidelines.into_iter().map(LinkState::new).collect()),
            graph: ctx.graph.clone(),
            transport,
            policy,
            metrics: ctx.metrics.clone(),
        })
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Initial hello to every parent.
    pub fn connect_up(&self) -> Result<()> {
        self.send_initial(LinkDirection::ToParent)
    }

    /// Initial hello to every child.
    pub fn connect_down(&self) -> Result<()> {
        self.send_initial(LinkDirection::ToChild)
    }

    /// One round over the parent links. True once all of them are connected.
    pub fn check_up_connections(&self) -> Result<bool> {
        self.drive(LinkDirection::ToParent, false)
    }

    /// Like [`check_up_connections`](Self::check_up_connections), followed by
    /// a resend pass over parents still unconnected.
    pub fn connect_to_parents(&self) -> Result<bool> {
        self.drive(LinkDirection::ToParent, true)
    }

    /// One round over the child links, with a final resend pass.
    pub fn check_down_connections(&self) -> Result<bool> {
        self.drive(LinkDirection::ToChild, true)
    }

    pub fn connect_to_children(&self) -> Result<bool> {
        self.check_down_connections()
    }

    pub fn is_all_connected(&self) -> bool {
        let mut links = self.links.lock();
        self.sync_from_graph(&mut links);
        links.iter().all(|l| l.guideline.is_connected())
    }

    pub fn parents_connected(&self) -> bool {
        let mut links = self.links.lock();
        self.sync_from_graph(&mut links);
        links
            .iter()
            .filter(|l| l.guideline.is_parent())
            .all(|l| l.guideline.is_connected())
    }

    pub fn unconnected_parents(&self) -> Vec<ConnectionGuideline> {
        self.unconnected(LinkDirection::ToParent)
    }

    pub fn unconnected_children(&self) -> Vec<ConnectionGuideline> {
        self.unconnected(LinkDirection::ToChild)
    }

    pub fn guidelines(&self) -> Vec<ConnectionGuideline> {
        self.links.lock().iter().map(|l| l.guideline.clone()).collect()
    }

    /// Hellos sent so far to `peer`.
    pub fn attempts(&self, peer: &str) -> Option<u32> {
        self.links
            .lock()
            .iter()
            .find(|l| l.guideline.peer() == peer)
            .map(|l| l.attempts)
    }

    pub fn connection_summary(&self) -> String {
        let summary = self.graph.summary();
        info!("{}: {}", self.me, summary);
        summary
    }

    fn unconnected(&self, direction: LinkDirection) -> Vec<ConnectionGuideline> {
        let mut links = self.links.lock();
        self.sync_from_graph(&mut links);
        links
            .iter()
            .filter(|l| l.guideline.direction() == direction && !l.guideline.is_connected())
            .map(|l| l.guideline.clone())
            .collect()
    }

    fn sync_from_graph(&self, links: &mut [LinkState]) {
        for link in links.iter_mut().filter(|l| !l.guideline.is_connected()) {
            if self.graph.contains(&self.me, link.guideline.peer()) {
                link.guideline.mark_connected();
                if let Err(e) = self.transport.close_queue(&queue_key(link.guideline.peer(), &self.me)) {
                    debug!("{}: could not close queue from {}: {}", self.me, link.guideline.peer(), e);
                }
            }
        }
    }

    fn send_initial(&self, direction: LinkDirection) -> Result<()> {
        let mut links = self.links.lock();
        for link in links
            .iter_mut()
            .filter(|l| l.guideline.direction() == direction && !l.guideline.is_connected())
        {
            self.send_hello(link)?;
        }
        Ok(())
    }

    fn drive(&self, direction: LinkDirection, resend_pass: bool) -> Result<bool> {
        let mut pause = false;
        let all_connected = {
            let mut links = self.links.lock();
            for link in links.iter_mut().filter(|l| l.guideline.direction() == direction) {
                if self.poll_link(link)? && link.guideline.is_parent() {
                    pause = true;
                }
            }

            if resend_pass {
                for link in links
                    .iter_mut()
                    .filter(|l| l.guideline.direction() == direction && !l.guideline.is_connected())
                {
                    self.maybe_resend(link)?;
                }
            }

            links
                .iter()
                .filter(|l| l.guideline.direction() == direction)
                .all(|l| l.guideline.is_connected())
        };

        if pause && self.policy.post_connect_pause_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.policy.post_connect_pause_ms));
        }
        Ok(all_connected)
    }

    /// Advances one link by a round. Returns true if it connected just now.
    fn poll_link(&self, link: &mut LinkState) -> Result<bool> {
        if link.guideline.is_connected() {
            return Ok(false);
        }
        link.rounds += 1;

        let peer = link.guideline.peer().to_string();
        if self.graph.contains(&self.me, &peer) {
            debug!("{}: link to {} already in graph", self.me, peer);
            link.guideline.mark_connected();
            self.transport.close_queue(&queue_key(&peer, &self.me))?;
            return Ok(true);
        }

        match self.transport.receive_remote(&queue_key(&peer, &self.me))? {
            Some(hello) => {
                self.validate_hello(&hello, &peer)?;
                link.guideline.mark_connected();
                self.graph.insert(&peer, &self.me);
                let stale = self.transport.close_queue(&queue_key(&peer, &self.me))?;
                if stale > 0 {
                    trace!("{}: dropped {} extra hellos from {}", self.me, stale, peer);
                }
                self.metrics.record_connections(self.graph.len());
                info!("CONNECTION_ESTABLISHED: {} -> {} ({})", peer, self.me, relation(&link.guideline));
                Ok(true)
            }
            None => {
                self.maybe_resend(link)?;
                Ok(false)
            }
        }
    }

    fn validate_hello(&self, hello: &ConnectMessage, peer: &str) -> Result<()> {
        let sender = hello.sender().abbrev();
        let receiver = hello.receiver().abbrev();
        if sender != peer || receiver != self.me {
            return Err(SimError::protocol(
                &self.me,
                format!(
                    "expected hello {} -> {}, got {} -> {}",
                    peer, self.me, sender, receiver
                ),
            ));
        }
        if hello.performative() != Performative::SendingHello {
            return Err(SimError::protocol(
                &self.me,
                format!("expected SendingHello from {}, got {:?}", peer, hello.performative()),
            ));
        }
        Ok(())
    }

    fn maybe_resend(&self, link: &mut LinkState) -> Result<()> {
        if let (Some(limit), Some(first)) = (self.policy.handshake_timeout_ms, link.first_sent) {
            let waited = first.elapsed();
            if waited > Duration::from_millis(limit) {
                return Err(SimError::HandshakeTimeout {
                    agent: self.me.clone(),
                    peer: link.guideline.peer().to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
        }

        if link.rounds < link.next_send_round {
            trace!("{}: backing off {} until round {}", self.me, link.guideline.peer(), link.next_send_round);
            return Ok(());
        }
        if let Some(max) = self.policy.max_attempts {
            if link.attempts >= max {
                return Err(SimError::HandshakeExhausted {
                    agent: self.me.clone(),
                    peer: link.guideline.peer().to_string(),
                    attempts: link.attempts,
                });
            }
        }
        self.send_hello(link)
    }

    fn send_hello(&self, link: &mut LinkState) -> Result<()> {
        let hello = ConnectMessage::hello(
            &self.me,
            link.guideline.peer(),
            link.guideline.organization(),
            link.guideline.expected_master(),
        )?;

        if !self.transport.send_remote(&hello)? {
            debug!("{}: hello to {} dropped", self.me, link.guideline.peer());
        }

        link.attempts += 1;
        link.first_sent.get_or_insert_with(Instant::now);
        link.next_send_round = link.rounds + self.policy.backoff_rounds(link.attempts);
        self.metrics.hello_sent();

        if link.attempts > 1 && link.attempts % 16 == 0 {
            warn!("{}: {} hellos to {} without reply", self.me, link.attempts, link.guideline.peer());
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProtocol")
            .field("me", &self.me)
            .field("links", &self.links.lock().len())
            .field("policy", &self.policy)
            .finish()
    }
}

fn relation(guideline: &ConnectionGuideline) -> &'static str {
    if guideline.is_parent() { "parent" } else { "child" }
}
