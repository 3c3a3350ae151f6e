//! Turn barrier.
//!
//! Every registered party calls [`TurnScheduler::end_turn`] once per turn. The
//! last one to arrive advances the shared [`TurnClock`] and releases the rest.
//! Without a timeout a party that never arrives blocks the others forever;
//! callers that cannot guarantee arrival should configure one.
//!
//! Parties are tracked by id, so a party that leaves while parked takes its
//! arrival with it.

use crate::context::TurnClock;
use crate::error::{Result, SimError};
use crate::network::AgentId;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Runs under the barrier lock right after the clock advances. Returns the
/// parties that join for the new turn.
pub type AdvanceHook = Box<dyn Fn(u64) -> Vec<AgentId> + Send + Sync>;

#[derive(Debug, Default)]
struct BarrierState {
    registered: HashSet<AgentId>,
    arrived: HashSet<AgentId>,
    generation: u64,
}

impl BarrierState {
    fn complete(&self) -> bool {
        !self.registered.is_empty() && self.arrived.len() >= self.registered.len()
    }
}

pub struct TurnScheduler {
    state: Mutex<BarrierState>,
    released: Condvar,
    clock: TurnClock,
    timeout: Option<Duration>,
    on_advance: RwLock<Option<AdvanceHook>>,
}

impl TurnScheduler {
    pub fn new(clock: TurnClock) -> Self {
        Self {
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
            clock,
            timeout: None,
            on_advance: RwLock::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_advance_hook(&self, hook: AdvanceHook) {
        *self.on_advance.write() = Some(hook);
    }

    pub fn turn(&self) -> u64 {
        self.clock.current()
    }

    pub fn registered(&self) -> usize {
        self.state.lock().registered.len()
    }

    pub fn arrived(&self) -> usize {
        self.state.lock().arrived.len()
    }

    pub fn is_registered(&self, id: &AgentId) -> bool {
        self.state.lock().registered.contains(id)
    }

    pub fn has_arrived(&self, id: &AgentId) -> bool {
        self.state.lock().arrived.contains(id)
    }

    /// Adds `id` as a party. False if it already was one.
    pub fn register(&self, id: &AgentId) -> bool {
        let mut state = self.state.lock();
        let added = state.registered.insert(id.clone());
        trace!("Party {} registered ({} total)", id, state.registered.len());
        added
    }

    /// Takes `id` off the barrier, withdrawing its arrival if it had one. A
    /// parked `id` wakes with [`SimError::NotRegistered`]. If everyone left
    /// behind has already arrived, the turn advances now.
    pub fn deregister(&self, id: &AgentId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.registered.remove(id) {
            return Err(SimError::NotRegistered(id.to_string()));
        }
        let was_parked = state.arrived.remove(id);
        debug!("Party {} deregistered ({} left)", id, state.registered.len());

        if state.complete() {
            self.advance(&mut state);
        } else if was_parked {
            self.released.notify_all();
        }
        Ok(())
    }

    /// Counts as the last arrival of `id` for this turn and leaves the barrier.
    pub fn arrive_and_deregister(&self, id: &AgentId) -> Result<()> {
        self.deregister(id)
    }

    /// Blocks until every registered party has arrived, then returns the new turn.
    pub fn end_turn(&self, id: &AgentId) -> Result<u64> {
        self.end_turn_within(id, self.timeout)
    }

    /// [`end_turn`](Self::end_turn) with an explicit timeout. On timeout the
    /// caller's arrival is withdrawn, so it may try again or deregister.
    pub fn end_turn_within(&self, id: &AgentId, timeout: Option<Duration>) -> Result<u64> {
        let mut state = self.state.lock();
        if !state.registered.contains(id) {
            return Err(SimError::NotRegistered(id.to_string()));
        }

        state.arrived.insert(id.clone());
        if state.complete() {
            return Ok(self.advance(&mut state));
        }

        let generation = state.generation;
        let deadline = timeout.map(|t| Instant::now() + t);

        while state.generation == generation {
            if !state.registered.contains(id) {
                debug!("Party {} dropped while waiting at turn {}", id, self.clock.current());
                break;
            }
            match deadline {
                None => self.released.wait(&mut state),
                Some(deadline) => {
                    let timed_out = self.released.wait_until(&mut state, deadline).timed_out();
                    if timed_out && state.generation == generation && state.registered.contains(id) {
                        state.arrived.remove(id);
                        warn!(
                            "Turn {} timed out: {} of {} arrived",
                            self.clock.current(),
                            state.arrived.len(),
                            state.registered.len()
                        );
                        return Err(SimError::TurnTimeout {
                            turn: self.clock.current(),
                            arrived: state.arrived.len(),
                            registered: state.registered.len(),
                        });
                    }
                }
            }
        }

        if !state.registered.contains(id) {
            return Err(SimError::NotRegistered(id.to_string()));
        }
        Ok(self.clock.current())
    }

    fn advance(&self, state: &mut BarrierState) -> u64 {
        state.arrived.clear();
        state.generation += 1;
        let turn = self.clock.advance();

        if let Some(hook) = self.on_advance.read().as_ref() {
            let joined = hook(turn);
            if !joined.is_empty() {
                debug!("{} parties joined at turn {}", joined.len(), turn);
            }
            state.registered.extend(joined);
        }

        trace!("Turn advanced to {}", turn);
        self.released.notify_all();
        turn
    }
}
