//! The reference visitor.
//!
//! Walks the strong fields of one object through its type descriptor and
//! reports every live target to a [`ReferenceSink`]. The visitor never
//! follows references itself; the mark pass does that with its worklist.

use crate::descriptor::FieldKind;
use crate::error::{ReachError, Result};
use crate::field::FieldRef;
use crate::object::{ObjectFlags, ObjectRef};
use crate::registry::{Entry, ObjectRegistry, ObjectTable};

/// Pseudo-field name of the implicit reference from an object to its outer.
pub const OUTER_FIELD: &str = "outer";

/// Receives the outgoing references of a visited object.
///
/// Implemented for every `FnMut(ObjectRef, &'static str)` closure, which is
/// called with the target and the name of the field holding it.
pub trait ReferenceSink {
    /// A live strong reference to `target`, found in `field`.
    fn reference(&mut self, target: ObjectRef, field: &'static str);

    /// A reference that was skipped because its target is gone.
    fn stale(&mut self, skipped: &StaleReferenceSkipped) {
        let _ = skipped;
    }
}

impl<F> ReferenceSink for F
where
    F: FnMut(ObjectRef, &'static str),
{
    #[inline]
    fn reference(&mut self, target: ObjectRef, field: &'static str) {
        self(target, field);
    }
}

/// Why a reference was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The target was destroyed.
    Destroyed,
    /// The target is flagged [`ObjectFlags::GARBAGE`].
    Garbage,
}

/// Diagnostic for a reference to a destroyed or garbage object.
///
/// This is not an error: the reference is simply not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleReferenceSkipped {
    /// The object holding the reference.
    pub referencer: ObjectRef,
    /// The field holding the reference.
    pub field: &'static str,
    /// The skipped target.
    pub target: ObjectRef,
    /// Why it was skipped.
    pub reason: StaleReason,
}

impl ObjectRegistry {
    /// Report every live strong reference held by `id` to `sink`.
    ///
    /// Weak fields are skipped without reading them. Targets that were
    /// destroyed or are flagged as garbage go to [`ReferenceSink::stale`].
    /// With [`RegistryConfig::outer_keeps_alive`](crate::RegistryConfig::outer_keeps_alive)
    /// the object's outer is reported under [`OUTER_FIELD`].
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut targets = Vec::new();
    /// registry.visit_references(a, &mut |target: ObjectRef, _field: &'static str| {
    ///     targets.push(target);
    /// })?;
    /// ```
    pub fn visit_references<S>(&self, id: ObjectRef, sink: &mut S) -> Result<()>
    where
        S: ReferenceSink + ?Sized,
    {
        let entry = self.objects.entry(id).ok_or(ReachError::StaleObject(id))?;
        walk_entry(&self.objects, entry, self.config.outer_keeps_alive, sink);
        Ok(())
    }

    /// Collect the live strong references held by `id`, with field names.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn outgoing_references(&self, id: ObjectRef) -> Result<Vec<(ObjectRef, &'static str)>> {
        let mut out = Vec::new();
        self.visit_references(id, &mut |target: ObjectRef, field: &'static str| {
            out.push((target, field));
        })?;
        Ok(out)
    }
}

/// Walk one live entry.
pub(crate) fn walk_entry<S>(
    objects: &ObjectTable,
    entry: &Entry,
    outer_keeps_alive: bool,
    sink: &mut S,
) where
    S: ReferenceSink + ?Sized,
{
    let record = &entry.record;
    let mut walk = Walk {
        objects,
        referencer: record.id(),
        field: "",
        sink,
    };

    for field in record.descriptor().strong_fields() {
        walk.field = field.name();
        walk.value(field.kind(), field.read(&*entry.value));
    }

    if outer_keeps_alive {
        if let Some(outer) = record.outer() {
            walk.field = OUTER_FIELD;
            walk.emit(outer);
        }
    }
}

struct Walk<'w, S: ?Sized> {
    objects: &'w ObjectTable,
    referencer: ObjectRef,
    field: &'static str,
    sink: &'w mut S,
}

impl<S: ReferenceSink + ?Sized> Walk<'_, S> {
    fn value(&mut self, kind: &FieldKind, view: FieldRef<'_>) {
        match (kind, view) {
            (FieldKind::DirectStrong, FieldRef::Object(Some(target))) => self.emit(target),
            (
                FieldKind::Array(elem) | FieldKind::Set(elem) | FieldKind::Optional(elem),
                FieldRef::Elements(items),
            ) if elem.holds_strong() => {
                for item in items {
                    self.value(elem, item);
                }
            }
            (FieldKind::Map { key, value }, FieldRef::Entries(entries)) => {
                let key = key.as_deref().filter(|k| k.holds_strong());
                let value = value.as_deref().filter(|v| v.holds_strong());
                if key.is_none() && value.is_none() {
                    return;
                }
                for (k, v) in entries {
                    if let Some(kind) = key {
                        self.value(kind, k);
                    }
                    if let Some(kind) = value {
                        self.value(kind, v);
                    }
                }
            }
            (FieldKind::NestedStruct(descriptor), FieldRef::Struct(inner)) => {
                for field in descriptor.strong_fields() {
                    self.value(field.kind(), field.read(inner));
                }
            }
            _ => {}
        }
    }

    fn emit(&mut self, target: ObjectRef) {
        let reason = match self.objects.record(target) {
            Some(record) if !record.flags().contains(ObjectFlags::GARBAGE) => {
                self.sink.reference(target, self.field);
                return;
            }
            Some(_) => StaleReason::Garbage,
            None => StaleReason::Destroyed,
        };
        self.sink.stale(&StaleReferenceSkipped {
            referencer: self.referencer,
            field: self.field,
            target,
            reason,
        });
    }
}
