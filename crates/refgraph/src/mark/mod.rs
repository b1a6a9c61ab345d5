//! The reachability marker.
//!
//! A pass runs in two phases:
//!
//! 1. **Seed**: every root, and every object the [`Keep`] policy keeps, is
//!    marked and pushed on the [`Worklist`].
//! 2. **Propagate**: objects are popped and visited until the worklist is
//!    empty. Each newly found target is marked and pushed, unless it carries
//!    the excluded flags, in which case it is marked but not walked.
//!
//! The worklist is an explicit vector, so arbitrarily deep graphs never
//! recurse on the call stack.

mod bits;
mod worklist;

use std::collections::HashSet;

pub use bits::ReachabilityBits;
pub use worklist::Worklist;

use crate::config::RegistryConfig;
use crate::error::{ReachError, Result};
use crate::metrics::{MarkReport, PassKind};
use crate::object::{ObjectFlags, ObjectRef};
use crate::query::ReferencerLog;
use crate::registry::{ObjectRecord, ObjectRegistry, ObjectTable};
use crate::tracing::{
    log_phase_end, log_phase_start, log_stale_reference, trace_pass, PassId, PassPhaseLog,
};
use crate::visit::{walk_entry, ReferenceSink, StaleReferenceSkipped};

// ============================================================================
// Requests
// ============================================================================

/// Which non-root objects seed a pass.
#[derive(Debug, Clone, Copy, Default)]
pub enum Keep {
    /// Only roots seed the pass.
    #[default]
    Nothing,
    /// Every object that is not garbage and not excluded seeds the pass.
    Everything,
    /// Objects carrying any of these flags seed the pass.
    AnyFlags(ObjectFlags),
    /// Objects accepted by the predicate seed the pass.
    Predicate(fn(&ObjectRecord) -> bool),
}

impl Keep {
    /// Keep objects carrying any of `flags`; no flags keeps everything.
    #[must_use]
    pub fn from_flags(flags: ObjectFlags) -> Self {
        if flags.is_empty() {
            Self::Everything
        } else {
            Self::AnyFlags(flags)
        }
    }

    fn keeps(&self, record: &ObjectRecord) -> bool {
        match self {
            Self::Nothing => false,
            Self::Everything => true,
            Self::AnyFlags(flags) => record.flags().intersects(*flags),
            Self::Predicate(keep) => keep(record),
        }
    }
}

/// Parameters of one mark pass.
#[derive(Debug, Clone, Default)]
pub struct MarkRequest {
    /// Objects treated as roots for this pass only.
    pub extra_roots: Vec<ObjectRef>,
    /// Which non-root objects seed the pass.
    pub keep: Keep,
    /// Objects carrying any of these flags are never seeded nor walked.
    pub exclude: ObjectFlags,
}

impl MarkRequest {
    /// Mark from the root set only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extra root.
    #[must_use]
    pub fn with_root(mut self, root: ObjectRef) -> Self {
        self.extra_roots.push(root);
        self
    }

    /// Add several extra roots.
    #[must_use]
    pub fn with_roots(mut self, roots: impl IntoIterator<Item = ObjectRef>) -> Self {
        self.extra_roots.extend(roots);
        self
    }

    /// Set the keep policy.
    #[must_use]
    pub const fn with_keep(mut self, keep: Keep) -> Self {
        self.keep = keep;
        self
    }

    /// Set the excluded flags.
    #[must_use]
    pub const fn with_exclude(mut self, exclude: ObjectFlags) -> Self {
        self.exclude = exclude;
        self
    }
}

// ============================================================================
// Pass state
// ============================================================================

/// Where the registry stands between and during passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassPhase {
    /// No pass or flag scope is active.
    #[default]
    Idle,
    /// A pass is running, or panicked and left the bits unusable.
    Marking,
    /// A [`ScopedFlagMarker`](crate::ScopedFlagMarker) holds saved flags.
    FlagsSaved,
}

pub(crate) struct PassState {
    pub(crate) bits: ReachabilityBits,
    pub(crate) phase: PassPhase,
    pub(crate) last_report: Option<MarkReport>,
    /// Set by a completed full pass, cleared by any change of the graph.
    pub(crate) sweepable: bool,
    next_pass: u64,
}

impl PassState {
    pub(crate) const fn new() -> Self {
        Self {
            bits: ReachabilityBits::new(),
            phase: PassPhase::Idle,
            last_report: None,
            sweepable: false,
            next_pass: 1,
        }
    }

    pub(crate) const fn invalidate(&mut self) {
        self.sweepable = false;
    }

    /// Drop the reachable bit of a destroyed object.
    pub(crate) fn forget(&mut self, id: ObjectRef) {
        self.bits.clear(id.slot());
    }

    const fn next_pass_id(&mut self) -> PassId {
        let id = PassId(self.next_pass);
        self.next_pass += 1;
        id
    }
}

// ============================================================================
// Marking
// ============================================================================

/// Run one pass over `objects`, leaving the phase at `resume` on success.
///
/// Roots are validated before any bit is written. A panic in a keep
/// predicate leaves the phase at [`PassPhase::Marking`].
pub(crate) fn run_pass(
    objects: &ObjectTable,
    config: &RegistryConfig,
    state: &mut PassState,
    request: &MarkRequest,
    kind: PassKind,
    resume: PassPhase,
    mut recorder: Option<&mut ReferencerLog>,
) -> Result<MarkReport> {
    if let Some(&dead) = request.extra_roots.iter().find(|&&root| !objects.is_live(root)) {
        return Err(ReachError::StaleObject(dead));
    }
    let extra_roots: HashSet<ObjectRef> = request.extra_roots.iter().copied().collect();
    let is_root = |record: &ObjectRecord| {
        record.flags().contains(ObjectFlags::ROOT_SET) || extra_roots.contains(&record.id())
    };

    for record in objects.records().filter(|&record| is_root(record)) {
        if record.flags().contains(ObjectFlags::GARBAGE) {
            return Err(ReachError::RootedGarbage(record.id()));
        }
        if record.flags().intersects(request.exclude) {
            return Err(ReachError::ExcludedRoot(record.id()));
        }
    }

    let pass_id = state.next_pass_id();
    let _span = trace_pass(kind.as_str(), pass_id);
    let mut report = MarkReport::new(pass_id, kind, objects.len());

    state.phase = PassPhase::Marking;
    state.bits.reset(objects.capacity());
    let mut worklist = Worklist::with_capacity(config.initial_worklist_capacity);

    // Seed
    report.timer.start();
    log_phase_start(PassPhaseLog::Seed, objects.len());
    let skip = request.exclude | ObjectFlags::GARBAGE;
    for record in objects.records() {
        let seed = is_root(record)
            || (!record.flags().intersects(skip) && request.keep.keeps(record));
        if seed && state.bits.set(record.id().slot()) {
            worklist.push(record.id());
            report.objects_seeded += 1;
        }
    }
    log_phase_end(PassPhaseLog::Seed, report.objects_seeded);
    report.timer.end_seed();

    // Propagate
    report.timer.start();
    log_phase_start(PassPhaseLog::Propagate, worklist.len());
    while let Some(id) = worklist.pop() {
        let Some(entry) = objects.entry(id) else {
            continue;
        };
        report.objects_visited += 1;
        let mut sink = MarkSink {
            objects,
            config,
            bits: &mut state.bits,
            worklist: &mut worklist,
            exclude: request.exclude,
            referencer: id,
            report: &mut report,
            recorder: recorder.as_deref_mut(),
        };
        walk_entry(objects, entry, config.outer_keeps_alive, &mut sink);
    }
    report.objects_marked = state.bits.count();
    report.worklist_high_water = worklist.high_water();
    log_phase_end(PassPhaseLog::Propagate, report.objects_marked);
    report.timer.end_propagate();

    state.phase = resume;
    state.last_report = Some(report.clone());
    Ok(report)
}

struct MarkSink<'p> {
    objects: &'p ObjectTable,
    config: &'p RegistryConfig,
    bits: &'p mut ReachabilityBits,
    worklist: &'p mut Worklist,
    exclude: ObjectFlags,
    referencer: ObjectRef,
    report: &'p mut MarkReport,
    recorder: Option<&'p mut ReferencerLog>,
}

impl ReferenceSink for MarkSink<'_> {
    fn reference(&mut self, target: ObjectRef, field: &'static str) {
        self.report.references_followed += 1;
        let excluded = self
            .objects
            .record(target)
            .is_some_and(|record| record.flags().intersects(self.exclude));

        if excluded {
            // Marked so the caller sees it was reached, but never walked.
            self.report.excluded_hits += 1;
            if let Some(recorder) = self.recorder.as_deref_mut() {
                recorder.record(self.referencer, field);
            }
            self.bits.set(target.slot());
        } else if self.bits.set(target.slot()) {
            self.worklist.push(target);
        }
    }

    fn stale(&mut self, skipped: &StaleReferenceSkipped) {
        self.report.stale_skipped += 1;
        if self.config.log_stale_references {
            log_stale_reference(skipped);
        }
        if self.config.record_stale_references {
            self.report.stale.push(*skipped);
        }
    }
}

impl ObjectRegistry {
    /// Run a full mark pass.
    ///
    /// Roots are the objects flagged [`ObjectFlags::ROOT_SET`] plus
    /// `request.extra_roots`. A completed pass with an empty
    /// `request.exclude` can be swept with
    /// [`sweep_unreachable`](Self::sweep_unreachable).
    ///
    /// # Errors
    ///
    /// - [`ReachError::InvalidPassState`] if a flag scope is open or a
    ///   previous pass panicked.
    /// - [`ReachError::StaleObject`] if an extra root is not live.
    /// - [`ReachError::RootedGarbage`] if a root is flagged as garbage.
    /// - [`ReachError::ExcludedRoot`] if a root carries `request.exclude`.
    pub fn mark(&mut self, request: &MarkRequest) -> Result<MarkReport> {
        if self.pass.phase != PassPhase::Idle {
            return Err(ReachError::InvalidPassState {
                phase: self.pass.phase,
            });
        }
        let report = run_pass(
            &self.objects,
            &self.config,
            &mut self.pass,
            request,
            PassKind::Full,
            PassPhase::Idle,
            None,
        )?;
        // Excluded objects are marked but not walked: what they hold was
        // never seen, so the bits cannot drive a sweep.
        self.pass.sweepable = request.exclude.is_empty();
        Ok(report)
    }

    /// Whether `id` is live and was marked by the last pass.
    #[must_use]
    pub fn is_reachable(&self, id: ObjectRef) -> bool {
        self.objects.is_live(id) && self.pass.bits.get(id.slot())
    }

    /// Live objects marked by the last pass, in slot order.
    #[must_use]
    pub fn reachable_objects(&self) -> Vec<ObjectRef> {
        self.pass
            .bits
            .iter_set()
            .filter_map(|slot| self.objects.handle_at(slot))
            .collect()
    }

    /// Statistics of the last completed pass.
    #[must_use]
    pub const fn last_report(&self) -> Option<&MarkReport> {
        self.pass.last_report.as_ref()
    }

    /// The current pass phase.
    #[must_use]
    pub const fn pass_phase(&self) -> PassPhase {
        self.pass.phase
    }
}
