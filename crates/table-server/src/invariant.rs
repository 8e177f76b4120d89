//! Fatal invariant violations.
//!
//! The transport sets a participant's `closed` flag *before* it publishes the
//! disconnect through the closure hub. A hub observer that finds a matching id
//! whose flag is still clear therefore proves that ordering was broken
//! upstream, and the shared collections can no longer be trusted. The process
//! logs the violation together with a captured backtrace and aborts.

use std::backtrace::Backtrace;

use common::types::ParticipantId;
use thiserror::Error;
use tracing::error;

/// A broken internal contract detected by one of the core components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// An id was reported closed while a live entry with that id is not marked closed.
    #[error("{component}: participant {id} reported closed but its closed flag is not set")]
    ClosedFlagNotSet {
        component: &'static str,
        id: ParticipantId,
    },
}

impl InvariantViolation {
    /// Name of the component that detected the violation.
    #[must_use]
    pub fn component(&self) -> &'static str {
        match self {
            InvariantViolation::ClosedFlagNotSet { component, .. } => component,
        }
    }
}

/// Logs `violation` with the current call history and terminates the process.
pub fn abort_on_violation(violation: &InvariantViolation) -> ! {
    let backtrace = Backtrace::force_capture();
    error!(
        target: "table.invariant",
        component = violation.component(),
        violation = %violation,
        backtrace = %backtrace,
        "Invariant violated, aborting"
    );
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let violation = InvariantViolation::ClosedFlagNotSet {
            component: "waiting_room",
            id: ParticipantId(9),
        };
        assert_eq!(violation.component(), "waiting_room");
        assert_eq!(
            violation.to_string(),
            "waiting_room: participant 9 reported closed but its closed flag is not set"
        );
    }
}
