pub mod message;
pub mod packet;
pub mod transport;

pub use message::{AgentId, ConnectContent, ConnectMessage, Endpoint, Message, Performative};
pub use packet::Packet;
pub use transport::{
    queue_key, ConnectInbox, InMemoryBroker, MailboxTransport, Transport, CONNECT_CHANNEL,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which transport the connection protocol runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Shared in-memory broker, no turn latency.
    #[default]
    Broker,
    /// Each agent's own mailbox, subject to its failure rates.
    Mailbox,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "broker" => Ok(Self::Broker),
            "mailbox" | "local" => Ok(Self::Mailbox),
            other => Err(format!("Unknown transport: {}. Use: broker or mailbox", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broker => f.write_str("broker"),
            Self::Mailbox => f.write_str("mailbox"),
        }
    }
}
