//! Structured logging for mark passes.
//!
//! With the `tracing` feature enabled, passes open a span and each phase
//! logs start/end events. Without it every function here is a no-op.

/// Identifier of one pass of a registry.
///
/// Counts up from 1 for each registry and correlates the events of a pass
/// with its [`MarkReport`](crate::MarkReport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassId(pub u64);

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pass-{}", self.0)
    }
}

/// Phases of a reachability pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhaseLog {
    /// Seed the worklist from roots and kept objects.
    Seed,
    /// Drain the worklist.
    Propagate,
    /// Reclaim unreachable objects.
    Sweep,
}

#[cfg(feature = "tracing")]
mod internal {
    use tracing::{span, Level};

    use super::{PassId, PassPhaseLog};
    use crate::error::ReachError;
    use crate::visit::StaleReferenceSkipped;

    /// Guard for the span of one pass.
    pub struct PassSpan {
        _entered: span::EnteredSpan,
    }

    /// Create a span for a whole pass.
    pub fn trace_pass(kind: &str, pass_id: PassId) -> PassSpan {
        PassSpan {
            _entered: span!(Level::DEBUG, "reach_pass", kind = kind, pass_id = pass_id.0)
                .entered(),
        }
    }

    /// Log the start of a phase.
    pub fn log_phase_start(phase: PassPhaseLog, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_start");
    }

    /// Log the end of a phase.
    pub fn log_phase_end(phase: PassPhaseLog, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }

    /// Log a field skipped by a lenient descriptor build.
    pub fn log_field_skipped(type_name: &str, field: &str, err: &ReachError) {
        tracing::warn!(type_name, field, error = %err, "field_skipped");
    }

    /// Log a reference to a dead or garbage object.
    pub fn log_stale_reference(stale: &StaleReferenceSkipped) {
        tracing::debug!(
            referencer = %stale.referencer,
            field = stale.field,
            target = %stale.target,
            "stale_reference_skipped"
        );
    }
}

#[cfg(not(feature = "tracing"))]
mod internal {
    use super::{PassId, PassPhaseLog};
    use crate::error::ReachError;
    use crate::visit::StaleReferenceSkipped;

    /// Stub guard when tracing is disabled.
    pub struct PassSpan;

    /// Stub function when tracing is disabled.
    pub const fn trace_pass(_kind: &str, _pass_id: PassId) -> PassSpan {
        PassSpan
    }

    /// Stub function when tracing is disabled.
    pub const fn log_phase_start(_phase: PassPhaseLog, _objects: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_phase_end(_phase: PassPhaseLog, _objects: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_field_skipped(_type_name: &str, _field: &str, _err: &ReachError) {}

    /// Stub function when tracing is disabled.
    pub const fn log_stale_reference(_stale: &StaleReferenceSkipped) {}
}

pub use internal::{
    log_field_skipped, log_phase_end, log_phase_start, log_stale_reference, trace_pass,
};
