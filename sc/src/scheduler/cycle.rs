//! Pulse cycle bookkeeping

use std::time::Duration;

use tokio::time::Instant;

use crate::tracker::ModuleId;

/// Shift applied to the module at `position` under `pulse_shift`
pub fn shift_offset(position: usize, increment: Duration) -> Duration {
    let position = u32::try_from(position).unwrap_or(u32::MAX);
    increment.saturating_mul(position)
}

/// Shifts for `count` modules in registration order
pub fn pulse_shift_offsets(count: usize, increment: Duration) -> Vec<Duration> {
    (0..count).map(|position| shift_offset(position, increment)).collect()
}

/// State of the cycle being swept
#[derive(Debug, Clone, PartialEq)]
pub struct PulseCycle {
    /// Starts at 1 so a missing cycle field never matches
    pub number: u64,
    pub targets: Vec<ModuleId>,
    /// Index into `targets` of the module whose ack is awaited
    pub cursor: Option<usize>,
    pub deadline: Option<Instant>,
}

impl Default for PulseCycle {
    fn default() -> Self {
        Self {
            number: 1,
            targets: Vec::new(),
            cursor: None,
            deadline: None,
        }
    }
}

impl PulseCycle {
    pub fn begin(&mut self, targets: Vec<ModuleId>) {
        self.targets = targets;
        self.cursor = None;
        self.deadline = None;
    }

    pub fn await_ack(&mut self, position: usize, deadline: Instant) {
        self.cursor = Some(position);
        self.deadline = Some(deadline);
    }

    pub fn resolve(&mut self) {
        self.cursor = None;
        self.deadline = None;
    }

    /// Close the cycle and move to the next number
    pub fn finish(&mut self) {
        self.resolve();
        self.targets.clear();
        self.number += 1;
    }

    pub fn awaiting(&self) -> Option<ModuleId> {
        self.cursor.and_then(|i| self.targets.get(i).copied())
    }
}
