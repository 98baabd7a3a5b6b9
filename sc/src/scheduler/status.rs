//! Scheduler state and diagnostics snapshots

use serde::{Deserialize, Serialize};

use crate::config::ManagedLevel;
use crate::tracker::ModuleDescriptor;

/// Lifecycle of the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Scheduling(ManagedLevel),
    Stopping,
    Stopped,
}

/// Counters kept by the scheduler loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerMetrics {
    pub cycles_completed: u64,
    pub pulses_sent: u64,
    pub acks_received: u64,
    pub stalls: u64,
    pub rejected_acks: u64,
    pub malformed_messages: u64,
    pub send_retries: u64,
    pub invalid_transitions: u64,
}

/// Copy of everything the scheduler knows, published after each change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusSnapshot {
    pub cid: u32,
    pub state: SchedulerState,
    pub managed_level: ManagedLevel,
    /// Number of the cycle in progress, or of the next one between cycles
    pub cycle: u64,
    /// Module whose ack is being waited for
    pub awaiting: Option<String>,
    pub modules: Vec<ModuleDescriptor>,
    pub metrics: SchedulerMetrics,
}

impl StatusSnapshot {
    pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.name == name)
    }
}
