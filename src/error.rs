//! Error types for the lockstep simulation core.
//!
//! Simulated packet loss is not represented here. A dropped send or a lost
//! receive is part of the unreliability model and surfaces as `Ok(false)` or
//! as a packet that never shows up, never as an `Err`.

use thiserror::Error;

/// Errors surfaced by the scheduler, mailbox, registry and connection protocol.
#[derive(Debug, Error)]
pub enum SimError {
    /// A required identifier or guideline field was missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The agent id is already registered or already waiting to join.
    #[error("Agent already exists: {0}")]
    DuplicateAgent(String),

    /// No agent with this id is known to the registry.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// A received message did not match what the protocol expected.
    #[error("Protocol violation at {agent}: {detail}")]
    ProtocolViolation { agent: String, detail: String },

    /// The transport failed to send or receive.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The opt-in per-turn timeout elapsed before every party arrived.
    #[error("Turn {turn} timed out with {arrived} of {registered} parties arrived")]
    TurnTimeout {
        turn: u64,
        arrived: usize,
        registered: usize,
    },

    /// The retry policy gave up on a handshake.
    #[error("{agent} gave up connecting to {peer} after {attempts} hellos")]
    HandshakeExhausted {
        agent: String,
        peer: String,
        attempts: u32,
    },

    /// The handshake did not complete within the configured deadline.
    #[error("{agent} timed out connecting to {peer} after {waited_ms}ms")]
    HandshakeTimeout {
        agent: String,
        peer: String,
        waited_ms: u64,
    },

    /// The party is not (or no longer) registered on the barrier.
    #[error("{0} is not a registered party")]
    NotRegistered(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a transport error.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates a protocol violation attributed to `agent`.
    pub fn protocol(agent: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            agent: agent.into(),
            detail: detail.into(),
        }
    }

    /// True for errors that should stop the affected agent rather than be retried.
    pub fn is_fatal_for_agent(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::TurnTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
