//! Execution-level scheduler
//!
//! Drives module timing according to the configured managed level:
//! - **not_managed:** no pulses, state reports only
//! - **pulse_shift:** one pulse per module per cycle, shifted by position
//! - **pulse_time_ack:** modules run one after another, each acknowledging

mod core;
mod cycle;
mod handle;
mod status;

pub use core::Supercomponent;
pub use cycle::{PulseCycle, pulse_shift_offsets, shift_offset};
pub use handle::SupercomponentHandle;
pub use status::{SchedulerMetrics, SchedulerState, StatusSnapshot};
