//! Live membership of one organization.
//!
//! Compound mutations take the coarse `data_lock`; single-key reads go
//! straight to the underlying maps.

use crate::agent::Agent;
use crate::error::{Result, SimError};
use crate::network::AgentId;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// A non-agent object tracked by the organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimObject {
    pub id: String,
    pub class: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl SimObject {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    Updated(String),
    Removed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Joined the live set right away.
    Admitted,
    /// Parked until the next turn boundary.
    Queued,
}

pub enum Removal {
    Live(Arc<Agent>),
    Queued(Arc<Agent>),
}

impl Removal {
    pub fn agent(&self) -> &Arc<Agent> {
        match self {
            Removal::Live(agent) | Removal::Queued(agent) => agent,
        }
    }
}

pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<Agent>>,
    waiting: Mutex<VecDeque<Arc<Agent>>>,
    by_kind: DashMap<String, Vec<AgentId>>,
    objects: DashMap<String, SimObject>,
    objects_by_class: DashMap<String, Vec<String>>,
    data_lock: Mutex<()>,
    changes_tx: Sender<ChangeNotice>,
    changes_rx: Receiver<ChangeNotice>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        let (changes_tx, changes_rx) = channel::unbounded();
        Self {
            agents: DashMap::new(),
            waiting: Mutex::new(VecDeque::new()),
            by_kind: DashMap::new(),
            objects: DashMap::new(),
            objects_by_class: DashMap::new(),
            data_lock: Mutex::new(()),
            changes_tx,
            changes_rx,
        }
    }

    /// Coarse lock for compound reads and writes (broadcast enumeration, add, remove).
    pub fn lock_data(&self) -> MutexGuard<'_, ()> {
        self.data_lock.lock()
    }

    /// Adds `agent`. At turn 0 it joins immediately; later it waits for the
    /// next turn boundary.
    pub fn add(&self, agent: Arc<Agent>, turn: u64) -> Result<Admission> {
        let _guard = self.data_lock.lock();
        let id = agent.id().clone();

        if self.agents.contains_key(&id) || self.is_waiting(&id) {
            return Err(SimError::DuplicateAgent(id.to_string()));
        }

        if turn == 0 {
            self.insert_live(agent);
            Ok(Admission::Admitted)
        } else {
            debug!("Agent {} queued to join at the next turn boundary", id);
            self.waiting.lock().push_back(agent);
            Ok(Admission::Queued)
        }
    }

    /// Moves every queued agent into the live set.
    pub fn admit_waiting(&self) -> Vec<Arc<Agent>> {
        let _guard = self.data_lock.lock();
        let admitted: Vec<Arc<Agent>> = self.waiting.lock().drain(..).collect();
        for agent in &admitted {
            info!("Agent {} admitted", agent.id());
            self.insert_live(agent.clone());
        }
        admitted
    }

    fn insert_live(&self, agent: Arc<Agent>) {
        let id = agent.id().clone();
        self.by_kind
            .entry(agent.kind().to_string())
            .or_default()
            .push(id.clone());
        self.agents.insert(id.clone(), agent);
        let _ = self.changes_tx.send(ChangeNotice::Updated(id.to_string()));
    }

    /// Drops `id` from the live set or from the waiting queue.
    pub fn remove(&self, id: &AgentId) -> Result<Removal> {
        let _guard = self.data_lock.lock();

        if let Some((_, agent)) = self.agents.remove(id) {
            if let Some(mut ids) = self.by_kind.get_mut(agent.kind()) {
                ids.retain(|other| other != id);
            }
            let _ = self.changes_tx.send(ChangeNotice::Removed(id.to_string()));
            return Ok(Removal::Live(agent));
        }

        let mut waiting = self.waiting.lock();
        match waiting.iter().position(|a| a.id() == id) {
            Some(pos) => match waiting.remove(pos) {
                Some(agent) => Ok(Removal::Queued(agent)),
                None => Err(SimError::UnknownAgent(id.to_string())),
            },
            None => Err(SimError::UnknownAgent(id.to_string())),
        }
    }

    pub fn get(&self, id: &AgentId) -> Option<Arc<Agent>> {
        self.agents.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains_agent(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn is_waiting(&self, id: &AgentId) -> bool {
        self.waiting.lock().iter().any(|a| a.id() == id)
    }

    /// Every live-set member, sorted by id.
    pub fn all(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<Arc<Agent>> = self.agents.iter().map(|e| e.value().clone()).collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }

    /// Members not yet disabled. Does not take the data lock.
    pub fn live_agents(&self) -> Vec<Arc<Agent>> {
        let mut agents = self.all();
        agents.retain(|a| a.is_alive());
        agents
    }

    pub fn by_kind(&self, kind: &str) -> Vec<Arc<Agent>> {
        let ids = self
            .by_kind
            .get(kind)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn add_object(&self, object: SimObject) -> Result<()> {
        let _guard = self.data_lock.lock();
        if self.objects.contains_key(&object.id) {
            return Err(SimError::config(format!("object {} already exists", object.id)));
        }
        self.objects_by_class
            .entry(object.class.clone())
            .or_default()
            .push(object.id.clone());
        let _ = self.changes_tx.send(ChangeNotice::Updated(object.id.clone()));
        self.objects.insert(object.id.clone(), object);
        Ok(())
    }

    pub fn remove_object(&self, id: &str) -> Option<SimObject> {
        let _guard = self.data_lock.lock();
        let (_, object) = self.objects.remove(id)?;
        if let Some(mut ids) = self.objects_by_class.get_mut(&object.class) {
            ids.retain(|other| other != id);
        }
        let _ = self.changes_tx.send(ChangeNotice::Removed(id.to_string()));
        Some(object)
    }

    pub fn object(&self, id: &str) -> Option<SimObject> {
        self.objects.get(id).map(|o| o.value().clone())
    }

    pub fn objects(&self) -> Vec<SimObject> {
        let mut objects: Vec<SimObject> = self.objects.iter().map(|o| o.value().clone()).collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects
    }

    pub fn objects_by_class(&self, class: &str) -> Vec<SimObject> {
        let ids = self
            .objects_by_class
            .get(class)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.object(id)).collect()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Takes every change notice emitted since the last call.
    pub fn drain_changes(&self) -> Vec<ChangeNotice> {
        self.changes_rx.try_iter().collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::mailbox::{Mailbox, MailboxConfig};
    use std::sync::Weak;

    fn agent(id: &str, kind: &str) -> Arc<Agent> {
        let id = AgentId::new(id).unwrap();
        let mailbox = Mailbox::new(id.clone(), MailboxConfig::default(), Weak::new(), SimContext::shared(1));
        Arc::new(Agent::new(id, kind, Arc::new(mailbox)))
    }

    #[test]
    fn test_add_at_turn_zero_is_immediate() {
        let registry = AgentRegistry::new();
        assert_eq!(registry.add(agent("A", "node"), 0).unwrap(), Admission::Admitted);
        assert!(registry.contains_agent(&AgentId::new("A").unwrap()));
        assert_eq!(registry.by_kind("node").len(), 1);
    }

    #[test]
    fn test_add_mid_run_is_deferred() {
        let registry = AgentRegistry::new();
        assert_eq!(registry.add(agent("Late", "node"), 3).unwrap(), Admission::Queued);
        let id = AgentId::new("Late").unwrap();
        assert!(!registry.contains_agent(&id));
        assert!(registry.is_waiting(&id));

        let admitted = registry.admit_waiting();
        assert_eq!(admitted.len(), 1);
        assert!(registry.contains_agent(&id));
        assert_eq!(registry.waiting_len(), 0);
    }

    #[test]
    fn test_duplicate_rejected_live_or_queued() {
        let registry = AgentRegistry::new();
        registry.add(agent("A", "node"), 0).unwrap();
        registry.add(agent("B", "node"), 2).unwrap();

        assert!(matches!(registry.add(agent("A", "node"), 0), Err(SimError::DuplicateAgent(_))));
        assert!(matches!(registry.add(agent("B", "node"), 0), Err(SimError::DuplicateAgent(_))));
    }

    #[test]
    fn test_remove_clears_indexes_and_notifies() {
        let registry = AgentRegistry::new();
        registry.add(agent("A", "node"), 0).unwrap();
        registry.add(agent("B", "node"), 0).unwrap();
        registry.drain_changes();

        let id = AgentId::new("A").unwrap();
        assert!(matches!(registry.remove(&id).unwrap(), Removal::Live(_)));
        assert_eq!(registry.by_kind("node").len(), 1);
        assert_eq!(registry.drain_changes(), vec![ChangeNotice::Removed("A".into())]);
        assert!(matches!(registry.remove(&id), Err(SimError::UnknownAgent(_))));
    }

    #[test]
    fn test_objects_indexed_by_class() {
        let registry = AgentRegistry::new();
        registry
            .add_object(SimObject::new("pv-1", "panel").with_attribute("kw", serde_json::json!(4.2)))
            .unwrap();
        registry.add_object(SimObject::new("bat-1", "battery")).unwrap();
        assert!(registry.add_object(SimObject::new("pv-1", "panel")).is_err());

        assert_eq!(registry.objects_by_class("panel").len(), 1);
        assert_eq!(registry.objects().len(), 2);
        assert!(registry.remove_object("pv-1").is_some());
        assert!(registry.objects_by_class("panel").is_empty());
    }
}
