//! Pass statistics.

use std::time::{Duration, Instant};

use crate::object::ObjectRef;
use crate::tracing::PassId;
use crate::visit::StaleReferenceSkipped;

/// Kind of a completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// A full pass started through [`ObjectRegistry::mark`](crate::ObjectRegistry::mark).
    Full,
    /// A pass run inside a [`ScopedFlagMarker`](crate::ScopedFlagMarker).
    Scoped,
    /// A pass run by `is_referenced` or `referencers`.
    Query,
}

impl PassKind {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Scoped => "scoped",
            Self::Query => "query",
        }
    }
}

/// Statistics of the most recent mark pass.
#[derive(Debug, Clone)]
pub struct MarkReport {
    /// Identifier of the pass within its registry.
    pub pass_id: PassId,
    /// How the pass was started.
    pub kind: PassKind,
    /// Live objects when the pass started.
    pub objects_total: usize,
    /// Objects marked during seeding (roots and kept objects).
    pub objects_seeded: usize,
    /// Objects marked in total.
    pub objects_marked: usize,
    /// Objects popped from the worklist and visited.
    pub objects_visited: usize,
    /// Strong references reported by the visitor.
    pub references_followed: usize,
    /// References that hit an object carrying the excluded flags.
    pub excluded_hits: usize,
    /// References to destroyed or garbage objects that were skipped.
    pub stale_skipped: usize,
    /// The skipped references, when
    /// [`RegistryConfig::record_stale_references`](crate::RegistryConfig::record_stale_references)
    /// is set.
    pub stale: Vec<StaleReferenceSkipped>,
    /// Largest worklist length during the pass.
    pub worklist_high_water: usize,
    /// Phase durations.
    pub timer: PhaseTimer,
}

impl MarkReport {
    pub(crate) fn new(pass_id: PassId, kind: PassKind, objects_total: usize) -> Self {
        Self {
            pass_id,
            kind,
            objects_total,
            objects_seeded: 0,
            objects_marked: 0,
            objects_visited: 0,
            references_followed: 0,
            excluded_hits: 0,
            stale_skipped: 0,
            stale: Vec::new(),
            worklist_high_water: 0,
            timer: PhaseTimer::new(),
        }
    }

    /// Objects the pass left unmarked.
    #[must_use]
    pub const fn objects_unreachable(&self) -> usize {
        self.objects_total.saturating_sub(self.objects_marked)
    }

    /// Total duration of the pass.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.timer.seed + self.timer.propagate
    }
}

/// Result of [`ObjectRegistry::sweep_unreachable`](crate::ObjectRegistry::sweep_unreachable).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Handles of the destroyed objects, in slot order.
    pub destroyed: Vec<ObjectRef>,
    /// Objects left alive.
    pub surviving: usize,
    /// Time spent sweeping.
    pub duration: Duration,
}

impl SweepReport {
    /// Number of destroyed objects.
    #[must_use]
    pub fn objects_reclaimed(&self) -> usize {
        self.destroyed.len()
    }
}

/// Captures phase durations of a pass.
///
/// # Example
///
/// ```
/// use refgraph::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... seed the worklist ...
/// timer.end_seed();
///
/// timer.start();
/// // ... drain it ...
/// timer.end_propagate();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Seed phase time.
    pub seed: Duration,
    /// Propagation phase time.
    pub propagate: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// Create a timer with all durations set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            seed: Duration::ZERO,
            propagate: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the seed phase and record its duration.
    pub fn end_seed(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.seed = start.elapsed();
        }
    }

    /// End the propagation phase and record its duration.
    pub fn end_propagate(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.propagate = start.elapsed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_timer() {
        let mut timer = PhaseTimer::new();
        timer.end_seed();
        assert_eq!(timer.seed, Duration::ZERO);

        timer.start();
        std::thread::sleep(Duration::from_millis(1));
        timer.end_seed();
        assert!(timer.seed >= Duration::from_millis(1));

        timer.start();
        timer.end_propagate();
        assert!(timer.propagate < timer.seed + Duration::from_secs(1));
    }

    #[test]
    fn test_mark_report_counts() {
        let mut report = MarkReport::new(PassId(1), PassKind::Full, 10);
        report.objects_marked = 7;
        assert_eq!(report.objects_unreachable(), 3);
        assert_eq!(report.duration(), Duration::ZERO);
        assert_eq!(PassKind::Query.as_str(), "query");
    }
}
