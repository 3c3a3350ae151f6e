use super::message::AgentId;
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of mailbox traffic. `receiver == None` marks a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub sender: AgentId,
    pub receiver: Option<AgentId>,
    pub channel: Option<String>,
    pub payload: Value,

    // Turn the sender was in when it handed the packet off. reset() only
    // releases packets stamped before the receiver's current turn.
    sent_turn: u64,
}

impl Packet {
    pub fn new(
        sender: AgentId,
        receiver: Option<AgentId>,
        channel: Option<String>,
        payload: Value,
        sent_turn: u64,
    ) -> Result<Self> {
        if payload.is_null() {
            return Err(SimError::config(format!(
                "packet from {} has no payload",
                sender
            )));
        }

        Ok(Self {
            sender,
            receiver,
            channel,
            payload,
            sent_turn,
        })
    }

    pub fn sent_turn(&self) -> u64 {
        self.sent_turn
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_none()
    }

    /// True once the turn the packet was sent in has ended.
    pub fn deliverable_at(&self, turn: u64) -> bool {
        self.sent_turn < turn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packet_rejects_null_payload() {
        let sender = AgentId::new("A").unwrap();
        assert!(Packet::new(sender, None, None, Value::Null, 0).is_err());
    }

    #[test]
    fn test_packet_deliverable_next_turn() {
        let sender = AgentId::new("A").unwrap();
        let packet = Packet::new(sender, None, Some("status".into()), json!(1), 4).unwrap();
        assert!(packet.is_broadcast());
        assert!(!packet.deliverable_at(4));
        assert!(packet.deliverable_at(5));
    }
}
