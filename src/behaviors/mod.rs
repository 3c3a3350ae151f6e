pub mod connect;
pub mod heartbeat;

use crate::agent::Agent;
use crate::connection::{Connections, RetryPolicy};
use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::network::Transport;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a behaviour sees on each turn.
pub struct TurnContext<'a> {
    pub agent: &'a Agent,
    pub turn: u64,
}

/// Per-turn agent logic, run between `mailbox.reset()` and `end_turn()`.
pub trait Behavior: Send + fmt::Debug {
    fn on_turn(&mut self, cx: &TurnContext<'_>) -> Result<()>;
    fn name(&self) -> &str;

    /// True once the behaviour has nothing left to converge on.
    fn is_done(&self) -> bool {
        true
    }
}

/// Everything a behaviour constructor may need for one agent.
pub struct BehaviorSetup {
    pub agent: Arc<Agent>,
    pub connections: Connections,
    pub ctx: Arc<SimContext>,
    pub transport: Arc<dyn Transport>,
    pub retry: RetryPolicy,
}

type Factory = Box<dyn Fn(&BehaviorSetup) -> Result<Box<dyn Behavior>> + Send + Sync>;

pub struct BehaviorRegistry {
    behaviors: HashMap<String, Factory>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            behaviors: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register("connect", |setup| Ok(Box::new(connect::Connect::new(setup)?)));
        self.register("hierarchical-connect", |setup| Ok(Box::new(connect::Connect::new(setup)?)));
        self.register("heartbeat", |_| Ok(Box::new(heartbeat::Heartbeat::new())));
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BehaviorSetup) -> Result<Box<dyn Behavior>> + Send + Sync + 'static,
    {
        self.behaviors.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn create(&self, name: &str, setup: &BehaviorSetup) -> Result<Box<dyn Behavior>> {
        match self.behaviors.get(&name.to_lowercase()) {
            Some(factory) => factory(setup),
            None => Err(SimError::config(format!(
                "unknown behavior {:?} (known: {})",
                name,
                self.list().join(", ")
            ))),
        }
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.behaviors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn global() -> &'static BehaviorRegistry {
        use std::sync::OnceLock;
        static REGISTRY: OnceLock<BehaviorRegistry> = OnceLock::new();
        REGISTRY.get_or_init(BehaviorRegistry::new)
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
