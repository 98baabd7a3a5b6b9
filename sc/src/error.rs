//! Supercomponent error types

use std::time::Duration;

use thiserror::Error;
use wirecodec::{DecodeError, EncodeError};

use crate::messages::ModuleState;
use crate::tracker::ModuleId;

/// Errors raised by a container transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("No container available")]
    WouldBlock,

    #[error("Conference {cid} is closed")]
    Closed { cid: u32 },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Encode failed: {0}")]
    Encode(#[from] EncodeError),
}

impl TransportError {
    /// Whether the transport can never deliver again
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed { .. })
    }
}

/// Errors raised by the module state tracker
///
/// The tracker keeps the prior state whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Unknown module {0}")]
    UnknownModule(ModuleId),

    #[error("Invalid transition for {module}: {from:?} -> {to:?} ({reason})")]
    InvalidTransition {
        module: String,
        from: ModuleState,
        to: ModuleState,
        reason: &'static str,
    },
}

/// Errors raised inside the scheduler loop
///
/// None of these end the loop; each is logged and folded into per-module
/// status.
#[derive(Debug, Error)]
pub enum SupercomponentError {
    #[error("Module {module} did not acknowledge cycle {cycle} within {timeout:?}")]
    StallTimeout {
        module: String,
        cycle: u64,
        timeout: Duration,
    },

    #[error("Sending to {module} failed after retry: {source}")]
    TransportSendFailure {
        module: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

impl SupercomponentError {
    /// Whether this error counts as a stall for the module involved
    pub fn is_stall(&self) -> bool {
        matches!(
            self,
            SupercomponentError::StallTimeout { .. } | SupercomponentError::TransportSendFailure { .. }
        )
    }
}

/// Errors raised by the module-side runtime
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("No supercomponent answered within {timeout:?}")]
    NoSupercomponent { timeout: Duration },

    #[error("Connection to the conference was lost")]
    ConnectionLost,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}
