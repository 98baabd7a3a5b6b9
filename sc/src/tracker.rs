//! Module state tracker
//!
//! Owns one descriptor per module that ever announced itself, in registration
//! order. Only the scheduler loop mutates it; everyone else gets copies.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use wirecodec::TimeStamp;

use crate::error::TrackerError;
use crate::messages::{ExitCode, ModuleState};

/// Handle into the tracker's arena; never leaves the supercomponent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ModuleId(u32);

impl ModuleId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything known about one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    pub name: String,
    pub pid: u32,
    pub frequency: f64,
    pub state: ModuleState,
    pub exit_code: Option<ExitCode>,
    pub last_seen: TimeStamp,
    /// Reported RUNNING at least once
    pub started: bool,
    /// Reported NOT_RUNNING after running, or stopped by the supercomponent
    pub terminated: bool,
    /// Tracked but never pulsed
    pub excluded: bool,
    pub stalls: u32,
    pub pulses: u64,
    pub acks: u64,
}

impl ModuleDescriptor {
    /// Descriptor for a freshly announced module
    pub fn new(name: impl Into<String>, pid: u32, frequency: f64, seen: TimeStamp) -> Self {
        Self {
            id: ModuleId::default(),
            name: name.into(),
            pid,
            frequency,
            state: ModuleState::NotRunning,
            exit_code: None,
            last_seen: seen,
            started: false,
            terminated: false,
            excluded: false,
            stalls: 0,
            pulses: 0,
            acks: 0,
        }
    }

    pub fn excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }

    /// Still part of the session
    pub fn is_active(&self) -> bool {
        !self.terminated
    }

    /// Receives pulses under a pulsed managed level
    pub fn is_pulse_target(&self) -> bool {
        self.is_active() && !self.excluded && self.state == ModuleState::Running
    }
}

/// Result of applying a state report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// State or timestamp changed
    Applied,
    /// Identical to what was stored
    Unchanged,
    /// Older than what was stored; dropped
    Stale,
}

/// Arena of module descriptors indexed by [`ModuleId`]
#[derive(Debug, Default)]
pub struct ModuleTracker {
    modules: Vec<ModuleDescriptor>,
    by_name: HashMap<String, ModuleId>,
    strict_timestamps: bool,
}

impl ModuleTracker {
    pub fn new(strict_timestamps: bool) -> Self {
        debug!(strict_timestamps, "ModuleTracker::new: called");
        Self {
            modules: Vec::new(),
            by_name: HashMap::new(),
            strict_timestamps,
        }
    }

    /// Add a module, or return the existing id if the name is known
    ///
    /// A re-announcement refreshes process id and frequency of a module that
    /// has not terminated; terminated modules stay terminated.
    pub fn register(&mut self, mut descriptor: ModuleDescriptor) -> ModuleId {
        debug!(name = %descriptor.name, "ModuleTracker::register: called");
        if let Some(&id) = self.by_name.get(&descriptor.name) {
            let existing = &mut self.modules[id.index()];
            if existing.is_active() {
                existing.pid = descriptor.pid;
                existing.frequency = descriptor.frequency;
                existing.last_seen = existing.last_seen.max(descriptor.last_seen);
            }
            return id;
        }
        let id = ModuleId::new(self.modules.len() as u32);
        descriptor.id = id;
        self.by_name.insert(descriptor.name.clone(), id);
        self.modules.push(descriptor);
        id
    }

    /// Apply a state report stamped with the sender's `timestamp`
    pub fn update(
        &mut self,
        id: ModuleId,
        state: ModuleState,
        timestamp: TimeStamp,
        exit_code: Option<ExitCode>,
    ) -> Result<UpdateOutcome, TrackerError> {
        debug!(%id, ?state, %timestamp, "ModuleTracker::update: called");
        let strict = self.strict_timestamps;
        let module = self.get_mut(id)?;

        let differs = state != module.state || (exit_code.is_some() && exit_code != module.exit_code);
        if timestamp < module.last_seen || (timestamp == module.last_seen && differs) {
            if strict && differs {
                return Err(TrackerError::InvalidTransition {
                    module: module.name.clone(),
                    from: module.state,
                    to: state,
                    reason: "report is not newer than the stored state",
                });
            }
            if timestamp < module.last_seen {
                return Ok(UpdateOutcome::Stale);
            }
        }

        if state == ModuleState::Running && module.terminated {
            return Err(TrackerError::InvalidTransition {
                module: module.name.clone(),
                from: module.state,
                to: state,
                reason: "module already terminated",
            });
        }

        if !differs && timestamp == module.last_seen {
            return Ok(UpdateOutcome::Unchanged);
        }

        match (module.state, state) {
            (ModuleState::NotRunning, ModuleState::Running) => module.started = true,
            (ModuleState::Running, ModuleState::NotRunning) => module.terminated = true,
            _ => {}
        }
        module.state = state;
        if exit_code.is_some() {
            module.exit_code = exit_code;
        }
        module.last_seen = timestamp;
        Ok(UpdateOutcome::Applied)
    }

    pub fn get(&self, id: ModuleId) -> Option<ModuleDescriptor> {
        self.modules.get(id.index()).cloned()
    }

    pub fn name(&self, id: ModuleId) -> Option<&str> {
        self.modules.get(id.index()).map(|m| m.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    /// Modules that have not terminated, in registration order
    pub fn list_active(&self) -> Vec<ModuleDescriptor> {
        self.modules.iter().filter(|m| m.is_active()).cloned().collect()
    }

    /// Every module ever registered, in registration order
    pub fn snapshot(&self) -> Vec<ModuleDescriptor> {
        self.modules.clone()
    }

    /// Ids to pulse this cycle, in registration order
    pub fn pulse_targets(&self) -> Vec<ModuleId> {
        self.modules
            .iter()
            .filter(|m| m.is_pulse_target())
            .map(|m| m.id)
            .collect()
    }

    /// Count one missed cycle; returns the new stall count
    pub fn mark_stalled(&mut self, id: ModuleId) -> Result<u32, TrackerError> {
        let module = self.get_mut(id)?;
        module.stalls += 1;
        Ok(module.stalls)
    }

    pub fn record_pulse(&mut self, id: ModuleId) -> Result<(), TrackerError> {
        self.get_mut(id)?.pulses += 1;
        Ok(())
    }

    pub fn record_ack(&mut self, id: ModuleId) -> Result<(), TrackerError> {
        self.get_mut(id)?.acks += 1;
        Ok(())
    }

    /// End a module's session without a report from it
    pub fn mark_terminated(&mut self, id: ModuleId, timestamp: TimeStamp) -> Result<(), TrackerError> {
        debug!(%id, "ModuleTracker::mark_terminated: called");
        let module = self.get_mut(id)?;
        module.terminated = true;
        module.state = ModuleState::NotRunning;
        module.last_seen = module.last_seen.max(timestamp);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn get_mut(&mut self, id: ModuleId) -> Result<&mut ModuleDescriptor, TrackerError> {
        self.modules
            .get_mut(id.index())
            .ok_or(TrackerError::UnknownModule(id))
    }
}
