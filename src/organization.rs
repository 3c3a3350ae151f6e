use crate::agent::Agent;
use crate::context::SimContext;
use crate::error::Result;
use crate::mailbox::{Mailbox, MailboxConfig};
use crate::network::AgentId;
use crate::registry::{Admission, AgentRegistry, Removal};
use crate::scheduler::TurnScheduler;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One organization: its registry, its turn barrier and the run context.
///
/// Queued agents are admitted by the barrier itself, at the boundary, so a
/// late joiner never observes half a turn. The same hook takes the per-turn
/// metrics snapshot while every party is parked.
pub struct Organization {
    name: String,
    ctx: Arc<SimContext>,
    registry: Arc<AgentRegistry>,
    scheduler: Arc<TurnScheduler>,
}

impl Organization {
    pub fn new(name: impl Into<String>, ctx: Arc<SimContext>, turn_timeout: Option<Duration>) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let scheduler = Arc::new(TurnScheduler::new(ctx.clock.clone()).with_timeout(turn_timeout));

        let admitting = registry.clone();
        let observed = ctx.clone();
        scheduler.set_advance_hook(Box::new(move |turn| {
            observed.metrics.record_connections(observed.graph.len());
            observed.metrics.save_snapshot(turn);
            admitting
                .admit_waiting()
                .iter()
                .map(|agent| agent.id().clone())
                .collect()
        }));

        Self {
            name: name.into(),
            ctx,
            registry,
            scheduler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TurnScheduler> {
        &self.scheduler
    }

    pub fn turn(&self) -> u64 {
        self.ctx.turn()
    }

    /// Builds an agent with its own mailbox and adds it.
    pub fn create_agent(&self, id: &str, kind: &str, mailbox: MailboxConfig) -> Result<Arc<Agent>> {
        let id = AgentId::new(id)?;
        let mailbox = Mailbox::new(id.clone(), mailbox, Arc::downgrade(&self.registry), self.ctx.clone());
        let agent = Arc::new(Agent::new(id, kind, Arc::new(mailbox)));
        self.add_agent(agent.clone())?;
        Ok(agent)
    }

    pub fn add_agent(&self, agent: Arc<Agent>) -> Result<Admission> {
        let id = agent.id().clone();
        let admission = self.registry.add(agent, self.turn())?;
        if admission == Admission::Admitted {
            self.scheduler.register(&id);
        }
        Ok(admission)
    }

    /// Removes `id` and, if it was a live party, takes it off the barrier.
    pub fn remove_agent(&self, id: &AgentId) -> Result<Arc<Agent>> {
        match self.registry.remove(id)? {
            Removal::Live(agent) => {
                self.scheduler.deregister(id)?;
                Ok(agent)
            }
            Removal::Queued(agent) => Ok(agent),
        }
    }

    pub fn disable_agent(&self, id: &AgentId) -> Result<Arc<Agent>> {
        let agent = self.remove_agent(id)?;
        agent.disable();
        info!("Agent {} left {}", id, self.name);
        Ok(agent)
    }

    /// Parks `id` at the barrier until the turn advances.
    pub fn end_turn(&self, id: &AgentId) -> Result<u64> {
        self.scheduler.end_turn(id)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: turn {}, {} agents ({} waiting), {} objects, {} parties",
            self.name,
            self.turn(),
            self.registry.len(),
            self.registry.waiting_len(),
            self.registry.object_count(),
            self.scheduler.registered()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;
    use std::thread;

    fn org() -> Organization {
        Organization::new("org", SimContext::shared(5), None)
    }

    #[test]
    fn test_turn_zero_agents_are_parties() {
        let org = org();
        org.create_agent("A", "node", MailboxConfig::default()).unwrap();
        org.create_agent("B", "node", MailboxConfig::default()).unwrap();
        assert_eq!(org.scheduler().registered(), 2);
        assert!(matches!(
            org.create_agent("A", "node", MailboxConfig::default()),
            Err(SimError::DuplicateAgent(_))
        ));
    }

    #[test]
    fn test_late_joiner_admitted_at_boundary() {
        let org = org();
        let a = org.create_agent("A", "node", MailboxConfig::default()).unwrap();
        assert_eq!(org.end_turn(a.id()).unwrap(), 1);

        let late = org.create_agent("Late", "node", MailboxConfig::default()).unwrap();
        assert!(!org.registry().contains_agent(late.id()));
        assert_eq!(org.scheduler().registered(), 1);

        assert_eq!(org.end_turn(a.id()).unwrap(), 2);
        assert!(org.registry().contains_agent(late.id()));
        assert_eq!(org.scheduler().registered(), 2);
    }

    #[test]
    fn test_disabling_a_party_unblocks_barrier() {
        let org = Arc::new(org());
        let a = org.create_agent("A", "node", MailboxConfig::default()).unwrap();
        let b = org.create_agent("B", "node", MailboxConfig::default()).unwrap();

        let waiter = {
            let org = org.clone();
            thread::spawn(move || org.end_turn(a.id()).unwrap())
        };
        while org.scheduler().arrived() < 1 {
            thread::yield_now();
        }

        org.disable_agent(b.id()).unwrap();
        assert_eq!(waiter.join().unwrap(), 1);
        assert!(!b.is_alive());
        assert_eq!(org.scheduler().registered(), 1);
    }

    #[test]
    fn test_disabling_a_parked_agent_does_not_count_its_arrival() {
        let org = Arc::new(org());
        let a = org.create_agent("A", "node", MailboxConfig::default()).unwrap();
        let b = org.create_agent("B", "node", MailboxConfig::default()).unwrap();
        let c = org.create_agent("C", "node", MailboxConfig::default()).unwrap();

        let parked = {
            let (org, a) = (org.clone(), a.clone());
            thread::spawn(move || org.end_turn(a.id()))
        };
        while org.scheduler().arrived() < 1 {
            thread::yield_now();
        }
        org.disable_agent(a.id()).unwrap();
        assert!(matches!(parked.join().unwrap(), Err(SimError::NotRegistered(_))));

        let waiter = {
            let (org, b) = (org.clone(), b.clone());
            thread::spawn(move || org.end_turn(b.id()).unwrap())
        };
        while org.scheduler().arrived() < 1 {
            thread::yield_now();
        }
        // C has not arrived yet
        assert_eq!(org.turn(), 0);

        assert_eq!(org.end_turn(c.id()).unwrap(), 1);
        assert_eq!(waiter.join().unwrap(), 1);
    }

    #[test]
    fn test_removing_queued_agent_keeps_party_count() {
        let org = org();
        let a = org.create_agent("A", "node", MailboxConfig::default()).unwrap();
        org.end_turn(a.id()).unwrap();
        let late = org.create_agent("Late", "node", MailboxConfig::default()).unwrap();

        org.remove_agent(late.id()).unwrap();
        assert_eq!(org.scheduler().registered(), 1);
        assert_eq!(org.end_turn(a.id()).unwrap(), 2);
        assert!(!org.registry().contains_agent(late.id()));
    }

    #[test]
    fn test_summary_mentions_counts() {
        let org = org();
        org.create_agent("A", "node", MailboxConfig::default()).unwrap();
        assert_eq!(org.summary(), "org: turn 0, 1 agents (0 waiting), 0 objects, 1 parties");
    }
}
