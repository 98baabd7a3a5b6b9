//! Supercomponent - execution management for conference modules
//!
//! A supercomponent tracks every module taking part in a conference and,
//! depending on the configured managed level, paces their execution so that
//! distributed timing becomes deterministic.
//!
//! # Modules
//!
//! - [`config`] - Configuration types and loading
//! - [`messages`] - Control messages on the wire
//! - [`tracker`] - Per-module lifecycle state
//! - [`transport`] - Container transport traits and the in-process conference
//! - [`inbox`] - Inbound queue with deadline waits
//! - [`scheduler`] - The supercomponent's scheduling loop
//! - [`module`] - The loop each module runs
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod inbox;
pub mod messages;
pub mod module;
pub mod scheduler;
pub mod tracker;
pub mod transport;

// Re-export commonly used types
pub use config::{ManagedLevel, ModuleConfig, PulseShiftConfig, PulseTimeAckConfig, SupercomponentConfig};
pub use error::{ModuleError, SupercomponentError, TrackerError, TransportError};
pub use inbox::Inbox;
pub use messages::{
    ControlMessage, ExitCode, ModuleAnnouncement, ModuleConfiguration, ModuleState, ModuleStateReport, ModuleStop,
    Pulse, PulseAck,
};
pub use module::{ModuleRuntime, ModuleStopHandle, Permission};
pub use scheduler::{
    PulseCycle, SchedulerMetrics, SchedulerState, StatusSnapshot, Supercomponent, SupercomponentHandle,
    pulse_shift_offsets,
};
pub use tracker::{ModuleDescriptor, ModuleId, ModuleTracker, UpdateOutcome};
pub use transport::{Conference, ConferenceReceiver, ConferenceSender, ContainerSink, ContainerSource};
