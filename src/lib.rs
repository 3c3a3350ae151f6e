pub mod error;
pub mod context;
pub mod network;
pub mod mailbox;
pub mod agent;
pub mod registry;
pub mod scheduler;
pub mod organization;
pub mod connection;
pub mod behaviors;
pub mod metrics;
pub mod simulation;

pub use agent::Agent;
pub use context::SimContext;
pub use error::{Result, SimError};
pub use organization::Organization;
pub use simulation::{SimConfig, Simulation};
pub use metrics::MetricsCollector;

pub mod prelude {
    pub use crate::agent::Agent;
    pub use crate::behaviors::{Behavior, BehaviorRegistry};
    pub use crate::connection::{ConnectionGraph, ConnectionGuideline, ConnectionProtocol, Connections, RetryPolicy};
    pub use crate::context::SimContext;
    pub use crate::error::{Result, SimError};
    pub use crate::mailbox::{Mailbox, MailboxConfig};
    pub use crate::network::{AgentId, ConnectMessage, InMemoryBroker, Packet, Transport};
    pub use crate::organization::Organization;
    pub use crate::scheduler::TurnScheduler;
    pub use crate::simulation::{SimConfig, Simulation};
    pub use crate::metrics::MetricsSnapshot;
}
