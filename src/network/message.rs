use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process-unique agent identifier. Also used as the remote "abbrev".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(SimError::config("agent id cannot be blank"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Either an in-process identity or a string address on a remote transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Local(AgentId),
    Remote(String),
}

impl Endpoint {
    pub fn abbrev(&self) -> &str {
        match self {
            Endpoint::Local(id) => id.as_str(),
            Endpoint::Remote(addr) => addr,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Endpoint::Remote(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Performative {
    SendingHello,
    SendingHelloReply,
    ConnectRequest,
    ConnectConfirm,
}

/// Immutable envelope: sender, receiver, performative and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<C> {
    sender: Endpoint,
    receiver: Endpoint,
    performative: Performative,
    content: C,
}

impl<C> Message<C> {
    pub fn local(sender: AgentId, receiver: AgentId, performative: Performative, content: C) -> Self {
        Self {
            sender: Endpoint::Local(sender),
            receiver: Endpoint::Local(receiver),
            performative,
            content,
        }
    }

    pub fn remote(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        performative: Performative,
        content: C,
    ) -> Result<Self> {
        let sender = sender.into();
        let receiver = receiver.into();
        if sender.trim().is_empty() || receiver.trim().is_empty() {
            return Err(SimError::config(format!(
                "remote message needs a sender and a receiver (sender: {:?}, receiver: {:?})",
                sender, receiver
            )));
        }
        Ok(Self {
            sender: Endpoint::Remote(sender.trim().to_string()),
            receiver: Endpoint::Remote(receiver.trim().to_string()),
            performative,
            content,
        })
    }

    pub fn sender(&self) -> &Endpoint {
        &self.sender
    }

    pub fn receiver(&self) -> &Endpoint {
        &self.receiver
    }

    pub fn performative(&self) -> Performative {
        self.performative
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn into_content(self) -> C {
        self.content
    }
}

impl<C: fmt::Debug> fmt::Display for Message<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} from {} to {}: {:?}",
            self.performative, self.sender, self.receiver, self.content
        )
    }
}

/// Payload of a connection handshake message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectContent {
    pub sender: String,
    pub receiver: String,
    pub organization: String,
    pub expected_master: String,
    pub message: String,
    pub delay: f64,
}

pub type ConnectMessage = Message<ConnectContent>;

impl ConnectMessage {
    /// Builds the hello a connecting agent sends to `peer`.
    pub fn hello(me: &str, peer: &str, organization: &str, expected_master: &str) -> Result<Self> {
        let content = ConnectContent {
            sender: me.to_string(),
            receiver: peer.to_string(),
            organization: organization.to_string(),
            expected_master: expected_master.to_string(),
            message: "hello".to_string(),
            delay: 0.0,
        };
        Message::remote(me, peer, Performative::SendingHello, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_rejects_blank() {
        assert!(AgentId::new("").is_err());
        assert!(AgentId::new("   ").is_err());
        assert_eq!(AgentId::new(" Parent ").unwrap().as_str(), "Parent");
    }

    #[test]
    fn test_remote_message_requires_endpoints() {
        let err = Message::remote("", "Child1", Performative::SendingHello, ()).unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn test_hello_message() {
        let hello = ConnectMessage::hello("Parent", "Child1", "org", "Parent").unwrap();
        assert_eq!(hello.sender().abbrev(), "Parent");
        assert_eq!(hello.receiver().abbrev(), "Child1");
        assert!(hello.sender().is_remote());
        assert_eq!(hello.performative(), Performative::SendingHello);
        assert_eq!(hello.content().message, "hello");
    }

    #[test]
    fn test_message_survives_json() {
        let hello = ConnectMessage::hello("A", "B", "org", "A").unwrap();
        let wire = serde_json::to_string(&hello).unwrap();
        let back: ConnectMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, hello);
    }
}
