use crate::mailbox::Mailbox;
use crate::network::AgentId;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A participant in the simulation. Owns its mailbox; the registry owns the agent.
#[derive(Debug)]
pub struct Agent {
    id: AgentId,
    kind: String,
    alive: AtomicBool,
    capabilities: RwLock<Vec<String>>,
    mailbox: Arc<Mailbox>,
}

impl Agent {
    pub fn new(id: AgentId, kind: impl Into<String>, mailbox: Arc<Mailbox>) -> Self {
        Self {
            id,
            kind: kind.into(),
            alive: AtomicBool::new(true),
            capabilities: RwLock::new(Vec::new()),
            mailbox,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Stops the agent from receiving new traffic. Irreversible.
    pub(crate) fn disable(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!("Agent {} disabled", self.id);
        }
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities.read().clone()
    }

    /// Capability names are opaque labels; duplicates are ignored.
    pub fn add_capability(&self, name: impl Into<String>) {
        let name = name.into();
        let mut caps = self.capabilities.write();
        if !caps.contains(&name) {
            caps.push(name);
        }
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.read().iter().any(|c| c == name)
    }
}
