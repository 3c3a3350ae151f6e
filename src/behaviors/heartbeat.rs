use super::{Behavior, TurnContext};
use crate::error::Result;
use serde_json::json;
use tracing::trace;

pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// Broadcasts a beat every turn and counts the beats that reach it.
#[derive(Debug, Default)]
pub struct Heartbeat {
    sent: u64,
    received: u64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl Behavior for Heartbeat {
    fn on_turn(&mut self, cx: &TurnContext<'_>) -> Result<()> {
        let mailbox = cx.agent.mailbox();
        while let Some(packet) = mailbox.receive_packet() {
            if packet.channel.as_deref() == Some(HEARTBEAT_CHANNEL) {
                self.received += 1;
            }
        }

        let beat = json!({ "from": cx.agent.id().as_str(), "turn": cx.turn });
        self.sent += mailbox.broadcast(Some(HEARTBEAT_CHANNEL), beat, false)? as u64;
        trace!("{} heartbeat: {} sent, {} received", cx.agent.id(), self.sent, self.received);
        Ok(())
    }

    fn name(&self) -> &str {
        "heartbeat"
    }
}
