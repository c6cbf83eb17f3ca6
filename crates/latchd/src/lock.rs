//! Command/actuator state machine.
//!
//! `Locked --unlock--> Unlocking --pulse elapsed--> Locked`. The pulse is a
//! deadline the scheduler checks, never a sleep. Construction and
//! [`LockController::force_lock`] always leave the actuator de-energized.

use crate::actuator::Actuator;
use crate::command::Command;
use latch_common::LockState;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Locked,
    /// Actuator energized until the deadline.
    Unlocking { until: Instant },
}

/// Result of feeding a command or a clock tick to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Actuator energized; relock is due at the given instant.
    Unlocked { relock_at: Instant },
    /// Actuator de-energized.
    Relocked,
    Unchanged,
}

pub struct LockController<A> {
    actuator: A,
    phase: Phase,
    unlock_count: u64,
    pulse: Duration,
}

impl<A: Actuator> LockController<A> {
    /// Take ownership of the actuator and drive it to the locked state.
    pub fn new(mut actuator: A, pulse: Duration) -> Self {
        if let Err(e) = actuator.de_energize() {
            error!("Failed to de-energize actuator at startup: {}", e);
        }
        Self {
            actuator,
            phase: Phase::Locked,
            unlock_count: 0,
            pulse,
        }
    }

    pub fn lock_state(&self) -> LockState {
        match self.phase {
            Phase::Locked => LockState::Locked,
            Phase::Unlocking { .. } => LockState::Unlocked,
        }
    }

    pub fn unlock_count(&self) -> u64 {
        self.unlock_count
    }

    /// When the running pulse ends, if one is running.
    pub fn relock_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Locked => None,
            Phase::Unlocking { until } => Some(until),
        }
    }

    pub fn handle(&mut self, command: Command, now: Instant) -> Transition {
        match (command, self.phase) {
            (Command::Unlock, Phase::Locked) => {
                if let Err(e) = self.actuator.energize() {
                    error!("Failed to energize actuator: {}", e);
                    self.de_energize();
                    return Transition::Unchanged;
                }
                self.start_pulse(now)
            }
            // Actuator already energized: extend the pulse.
            (Command::Unlock, Phase::Unlocking { .. }) => self.start_pulse(now),
            (Command::Lock, Phase::Unlocking { .. }) => {
                self.relock();
                Transition::Relocked
            }
            (Command::Lock, Phase::Locked) => Transition::Unchanged,
        }
    }

    /// Relock if the pulse deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Transition {
        match self.phase {
            Phase::Unlocking { until } if now >= until => {
                self.relock();
                Transition::Relocked
            }
            _ => Transition::Unchanged,
        }
    }

    /// De-energize unconditionally. Used before restart and shutdown.
    pub fn force_lock(&mut self) {
        if self.phase != Phase::Locked {
            warn!("Forcing lock while pulse is active");
        }
        self.de_energize();
        self.phase = Phase::Locked;
    }

    fn start_pulse(&mut self, now: Instant) -> Transition {
        let relock_at = now + self.pulse;
        self.phase = Phase::Unlocking { until: relock_at };
        self.unlock_count += 1;
        info!(
            "Unlocked (count {}), relocking in {:?}",
            self.unlock_count, self.pulse
        );
        Transition::Unlocked { relock_at }
    }

    fn relock(&mut self) {
        self.de_energize();
        self.phase = Phase::Locked;
        info!("Locked");
    }

    fn de_energize(&mut self) {
        if let Err(e) = self.actuator.de_energize() {
            error!("Failed to de-energize actuator: {}", e);
        }
    }
}
