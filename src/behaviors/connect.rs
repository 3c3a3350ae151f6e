use super::{Behavior, BehaviorSetup, TurnContext};
use crate::connection::ConnectionProtocol;
use crate::error::Result;
use tracing::info;

/// Drives the agent's parent and child links every turn until all are up.
#[derive(Debug)]
pub struct Connect {
    protocol: ConnectionProtocol,
    connected_at: Option<u64>,
}

impl Connect {
    pub fn new(setup: &BehaviorSetup) -> Result<Self> {
        let protocol = ConnectionProtocol::new(
            setup.agent.id(),
            setup.connections.clone(),
            &setup.ctx,
            setup.transport.clone(),
            setup.retry.clone(),
        )?;
        Ok(Self {
            protocol,
            connected_at: None,
        })
    }

    pub fn protocol(&self) -> &ConnectionProtocol {
        &self.protocol
    }
}

impl Behavior for Connect {
    fn on_turn(&mut self, cx: &TurnContext<'_>) -> Result<()> {
        if self.connected_at.is_some() {
            return Ok(());
        }

        if cx.turn == 0 {
            self.protocol.connect_up()?;
            self.protocol.connect_down()?;
            return Ok(());
        }

        let up = self.protocol.check_up_connections()?;
        let down = self.protocol.check_down_connections()?;
        if up && down {
            self.connected_at = Some(cx.turn);
            info!("{} fully connected at turn {}", self.protocol.me(), cx.turn);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "connect"
    }

    fn is_done(&self) -> bool {
        self.connected_at.is_some()
    }
}
