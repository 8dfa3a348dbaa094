//! Lockstep command scheduler
//!
//! Commands are buffered by the tick at which they execute. A tick is
//! released only once every participant has a command for it; until then the
//! session stalls instead of guessing.

use log::{trace, warn};
use shared::{Command, PARTICIPANTS};
use std::collections::BTreeMap;

pub struct CommandQueue {
    ticks: BTreeMap<u32, BTreeMap<u8, Command>>,
    next_tick: u32,
}

impl CommandQueue {
    /// Creates a queue with idle commands for the first `input_delay` ticks,
    /// which nobody can issue in time
    pub fn new(input_delay: u32) -> Self {
        let mut queue = Self {
            ticks: BTreeMap::new(),
            next_tick: 0,
        };
        for tick in 0..input_delay {
            for issuer in PARTICIPANTS {
                queue.enqueue(Command::idle(issuer, tick));
            }
        }
        queue
    }

    /// Stores `command` for its (tick, issuer) slot, replacing any earlier one.
    /// Returns false for commands that can no longer execute.
    pub fn enqueue(&mut self, command: Command) -> bool {
        if !PARTICIPANTS.contains(&command.issuer) {
            warn!("Dropping command from unknown issuer {}", command.issuer);
            return false;
        }
        if command.execution_tick < self.next_tick {
            trace!(
                "Dropping stale command for tick {} (next is {})",
                command.execution_tick,
                self.next_tick
            );
            return false;
        }

        self.ticks
            .entry(command.execution_tick)
            .or_default()
            .insert(command.issuer, command);
        true
    }

    /// Releases the commands for `tick` in issuer order once all participants
    /// are present, and forgets the tick
    pub fn try_advance(&mut self, tick: u32) -> Option<Vec<Command>> {
        if tick != self.next_tick {
            return None;
        }

        let ready = self
            .ticks
            .get(&tick)
            .map(|slots| PARTICIPANTS.iter().all(|id| slots.contains_key(id)))
            .unwrap_or(false);
        if !ready {
            return None;
        }

        let slots = self.ticks.remove(&tick)?;
        self.next_tick += 1;
        Some(slots.into_values().collect())
    }

    pub fn next_tick(&self) -> u32 {
        self.next_tick
    }

    pub fn has_command(&self, tick: u32, issuer: u8) -> bool {
        self.ticks
            .get(&tick)
            .map(|slots| slots.contains_key(&issuer))
            .unwrap_or(false)
    }

    /// Number of future ticks holding at least one command
    pub fn buffered_ticks(&self) -> usize {
        self.ticks.len()
    }
}
