//! `is_referenced` and the flag scope it runs in.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::error::{ReachError, Result};
use crate::mark::{run_pass, Keep, MarkRequest, PassPhase};
use crate::metrics::{MarkReport, PassKind};
use crate::object::{ObjectFlags, ObjectRef};
use crate::registry::ObjectRegistry;

// ============================================================================
// ScopedFlagMarker
// ============================================================================

/// Saves the flags of every object and restores them when dropped.
///
/// While the marker is alive the registry is in [`PassPhase::FlagsSaved`]:
/// flags may be edited freely through the marker, and passes run with
/// [`ScopedFlagMarker::mark`]. Restoring happens on every exit path,
/// unwinding included. Objects destroyed inside the scope are skipped.
///
/// # Example
///
/// ```ignore
/// let mut scope = ScopedFlagMarker::new(&mut registry)?;
/// scope.set_flags(id, ObjectFlags::USER_0)?;
/// scope.mark(&MarkRequest::new().with_exclude(ObjectFlags::USER_0))?;
/// drop(scope); // USER_0 is gone again
/// ```
pub struct ScopedFlagMarker<'r> {
    registry: &'r mut ObjectRegistry,
    saved: Vec<(ObjectRef, ObjectFlags)>,
}

impl<'r> ScopedFlagMarker<'r> {
    /// Snapshot the flags of every live object.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::InvalidPassState`] unless the registry is idle.
    pub fn new(registry: &'r mut ObjectRegistry) -> Result<Self> {
        if registry.pass.phase != PassPhase::Idle {
            return Err(ReachError::InvalidPassState {
                phase: registry.pass.phase,
            });
        }
        let saved = registry
            .objects
            .records()
            .map(|record| (record.id(), record.flags()))
            .collect();
        registry.pass.phase = PassPhase::FlagsSaved;
        Ok(Self { registry, saved })
    }

    /// Number of snapshotted objects.
    #[must_use]
    pub fn saved_len(&self) -> usize {
        self.saved.len()
    }

    /// Run a mark pass inside the scope.
    ///
    /// The pass cannot be swept: the flags it ran with are about to be
    /// restored.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectRegistry::mark`].
    pub fn mark(&mut self, request: &MarkRequest) -> Result<MarkReport> {
        self.run(request, PassKind::Scoped, None)
    }

    fn run(
        &mut self,
        request: &MarkRequest,
        kind: PassKind,
        recorder: Option<&mut ReferencerLog>,
    ) -> Result<MarkReport> {
        let registry = &mut *self.registry;
        if registry.pass.phase != PassPhase::FlagsSaved {
            return Err(ReachError::InvalidPassState {
                phase: registry.pass.phase,
            });
        }
        let report = run_pass(
            &registry.objects,
            &registry.config,
            &mut registry.pass,
            request,
            kind,
            PassPhase::FlagsSaved,
            recorder,
        )?;
        registry.pass.invalidate();
        Ok(report)
    }
}

impl Deref for ScopedFlagMarker<'_> {
    type Target = ObjectRegistry;

    fn deref(&self) -> &ObjectRegistry {
        self.registry
    }
}

impl DerefMut for ScopedFlagMarker<'_> {
    fn deref_mut(&mut self) -> &mut ObjectRegistry {
        self.registry
    }
}

impl Drop for ScopedFlagMarker<'_> {
    fn drop(&mut self) {
        for (id, flags) in self.saved.drain(..) {
            if let Some(record) = self.registry.objects.record_mut(id) {
                record.flags = flags;
            }
        }
        // A pass that panicked leaves `Marking` behind; keep it poisoned.
        if self.registry.pass.phase == PassPhase::FlagsSaved {
            self.registry.pass.phase = PassPhase::Idle;
        }
    }
}

// ============================================================================
// Referencers
// ============================================================================

/// Parameters of [`ObjectRegistry::is_referenced`].
#[derive(Debug, Clone, Copy)]
pub struct ReferenceQuery {
    /// Which objects other than the roots count as referencers.
    pub keep: Keep,
    /// Also exclude the target's sub-objects, and count references to them.
    pub check_subobjects: bool,
}

impl Default for ReferenceQuery {
    /// Every object counts, sub-objects are not checked.
    fn default() -> Self {
        Self {
            keep: Keep::Everything,
            check_subobjects: false,
        }
    }
}

impl ReferenceQuery {
    /// A query keeping objects that carry any of `keep_flags`.
    ///
    /// Empty flags keep every object.
    #[must_use]
    pub fn new(keep_flags: ObjectFlags) -> Self {
        Self {
            keep: Keep::from_flags(keep_flags),
            check_subobjects: false,
        }
    }

    /// Set the keep policy.
    #[must_use]
    pub const fn with_keep(mut self, keep: Keep) -> Self {
        self.keep = keep;
        self
    }

    /// Enable or disable the sub-object check.
    #[must_use]
    pub const fn with_subobjects(mut self, enabled: bool) -> Self {
        self.check_subobjects = enabled;
        self
    }
}

/// One object referencing the queried object or its sub-objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencerInfo {
    /// The referencing object.
    pub referencer: ObjectRef,
    /// How many references it holds.
    pub total_references: usize,
    /// The fields holding them, in discovery order, without duplicates.
    pub fields: Vec<&'static str>,
}

/// Who references an object, split by ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencerReport {
    /// Referencers outside the queried object's ownership tree.
    pub external: Vec<ReferencerInfo>,
    /// Referencers owned by the queried object.
    pub internal: Vec<ReferencerInfo>,
    /// Whether the queried object itself was reached.
    pub target_reachable: bool,
    /// Whether the queried object or a checked sub-object is in the root set.
    pub rooted: bool,
}

impl ReferencerReport {
    /// Whether anything keeps the queried object alive.
    #[must_use]
    pub fn is_referenced(&self) -> bool {
        self.rooted
            || !self.external.is_empty()
            || !self.internal.is_empty()
            || self.target_reachable
    }
}

/// Collects referencer entries during a pass, keyed by referencer.
#[derive(Debug, Default)]
pub(crate) struct ReferencerLog {
    infos: Vec<ReferencerInfo>,
    index: HashMap<ObjectRef, usize>,
}

impl ReferencerLog {
    pub(crate) fn record(&mut self, referencer: ObjectRef, field: &'static str) {
        let slot = *self.index.entry(referencer).or_insert_with(|| {
            self.infos.push(ReferencerInfo {
                referencer,
                total_references: 0,
                fields: Vec::new(),
            });
            self.infos.len() - 1
        });
        let info = &mut self.infos[slot];
        info.total_references += 1;
        if !info.fields.contains(&field) {
            info.fields.push(field);
        }
    }

    fn into_infos(self) -> Vec<ReferencerInfo> {
        self.infos
    }
}

impl ObjectRegistry {
    /// Whether anything outside `target` still references it.
    ///
    /// Every object the query keeps is marked while `target` (and, with
    /// [`ReferenceQuery::check_subobjects`], its sub-objects) is excluded.
    /// The target is referenced if the pass reached it, or, when
    /// sub-objects are checked, if any object outside the excluded set
    /// points into it. A rooted target is always referenced.
    ///
    /// All flags are restored before returning. The pass cannot be swept.
    ///
    /// # Errors
    ///
    /// - [`ReachError::StaleObject`] if `target` is not live.
    /// - [`ReachError::GarbageObject`] if `target` is flagged as garbage.
    /// - [`ReachError::InvalidPassState`] unless the registry is idle.
    pub fn is_referenced(&mut self, target: ObjectRef, query: &ReferenceQuery) -> Result<bool> {
        let report = self.query_referencers(target, query, query.check_subobjects)?;
        Ok(report.is_referenced())
    }

    /// Like [`is_referenced`](Self::is_referenced), returning who the
    /// referencers are.
    ///
    /// Referencers owned by `target` land in
    /// [`ReferencerReport::internal`], the others in
    /// [`ReferencerReport::external`].
    ///
    /// # Errors
    ///
    /// Same as [`is_referenced`](Self::is_referenced).
    pub fn referencers(
        &mut self,
        target: ObjectRef,
        query: &ReferenceQuery,
    ) -> Result<ReferencerReport> {
        self.query_referencers(target, query, true)
    }

    fn query_referencers(
        &mut self,
        target: ObjectRef,
        query: &ReferenceQuery,
        detailed: bool,
    ) -> Result<ReferencerReport> {
        let flags = self.flags(target)?;
        if flags.contains(ObjectFlags::GARBAGE) {
            return Err(ReachError::GarbageObject(target));
        }
        if self.pass.phase != PassPhase::Idle {
            return Err(ReachError::InvalidPassState {
                phase: self.pass.phase,
            });
        }

        let mut tagged = vec![target];
        if query.check_subobjects {
            tagged.extend(self.subobjects_of(target)?);
        }
        let rooted = tagged.iter().any(|&id| {
            self.objects
                .record(id)
                .is_some_and(|record| record.flags().contains(ObjectFlags::ROOT_SET))
        });
        if rooted {
            return Ok(ReferencerReport {
                target_reachable: true,
                rooted: true,
                ..ReferencerReport::default()
            });
        }

        let mut log = ReferencerLog::default();
        let target_reachable = {
            let mut scope = ScopedFlagMarker::new(self)?;
            scope.clear_flags_everywhere(ObjectFlags::TAG_EXCLUDED);
            for &id in &tagged {
                scope.set_flags(id, ObjectFlags::TAG_EXCLUDED)?;
            }

            let request = MarkRequest::new()
                .with_keep(query.keep)
                .with_exclude(ObjectFlags::TAG_EXCLUDED);
            scope.run(&request, PassKind::Query, detailed.then_some(&mut log))?;
            scope.is_reachable(target)
        };

        let mut report = ReferencerReport {
            target_reachable,
            ..ReferencerReport::default()
        };
        for info in log.into_infos() {
            if info.referencer == target {
                continue;
            }
            if self.is_in(info.referencer, target) {
                report.internal.push(info);
            } else {
                report.external.push(info);
            }
        }
        Ok(report)
    }
}
