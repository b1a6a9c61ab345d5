//! The object registry: live objects, their flags and their outers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::RegistryConfig;
use crate::descriptor::{Reflect, TypeDescriptor, TypeTable};
use crate::error::{ReachError, Result};
use crate::mark::{Keep, MarkRequest, PassPhase, PassState};
use crate::metrics::SweepReport;
use crate::object::{ObjectFlags, ObjectRef, WeakObjectRef};
use crate::tracing::{log_phase_end, log_phase_start, PassPhaseLog};

// ============================================================================
// Records
// ============================================================================

/// Bookkeeping of one live object.
#[derive(Clone)]
pub struct ObjectRecord {
    id: ObjectRef,
    descriptor: Arc<TypeDescriptor>,
    pub(crate) flags: ObjectFlags,
    outer: Option<ObjectRef>,
    name: String,
}

impl ObjectRecord {
    /// The object's handle.
    #[must_use]
    pub const fn id(&self) -> ObjectRef {
        self.id
    }

    /// The descriptor of the object's type.
    #[must_use]
    pub const fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    /// The name of the object's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.descriptor.type_name()
    }

    /// Current flags.
    #[must_use]
    pub const fn flags(&self) -> ObjectFlags {
        self.flags
    }

    /// The owning object, if any. May be stale once the outer is destroyed.
    #[must_use]
    pub const fn outer(&self) -> Option<ObjectRef> {
        self.outer
    }

    /// The object's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ObjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRecord")
            .field("id", &self.id)
            .field("type", &self.descriptor.type_name())
            .field("flags", &self.flags)
            .field("outer", &self.outer)
            .field("name", &self.name)
            .finish()
    }
}

/// Optional parameters of [`ObjectRegistry::spawn_with`].
#[derive(Debug, Clone, Default)]
pub struct SpawnParams {
    /// Object name. Defaults to `<TypeName>_<index>`.
    pub name: Option<String>,
    /// Owning object. Must be live.
    pub outer: Option<ObjectRef>,
    /// Initial flags.
    pub flags: ObjectFlags,
}

impl SpawnParams {
    /// Parameters with no name, no outer and no flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the object name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the owning object.
    #[must_use]
    pub const fn with_outer(mut self, outer: ObjectRef) -> Self {
        self.outer = Some(outer);
        self
    }

    /// Set the initial flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: ObjectFlags) -> Self {
        self.flags = flags;
        self
    }
}

// ============================================================================
// Object table
// ============================================================================

pub(crate) struct Entry {
    pub(crate) record: ObjectRecord,
    pub(crate) value: Box<dyn Any>,
}

struct Slot {
    serial: u32,
    entry: Option<Entry>,
}

/// Slot storage with serial-checked handles and an outer to inners index.
#[derive(Default)]
pub(crate) struct ObjectTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    inners: HashMap<u32, Vec<ObjectRef>>,
}

impl ObjectTable {
    pub(crate) fn entry(&self, id: ObjectRef) -> Option<&Entry> {
        let slot = self.slots.get(id.slot())?;
        if slot.serial == id.serial() {
            slot.entry.as_ref()
        } else {
            None
        }
    }

    fn entry_mut(&mut self, id: ObjectRef) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.serial == id.serial() {
            slot.entry.as_mut()
        } else {
            None
        }
    }

    pub(crate) fn record(&self, id: ObjectRef) -> Option<&ObjectRecord> {
        self.entry(id).map(|entry| &entry.record)
    }

    pub(crate) fn record_mut(&mut self, id: ObjectRef) -> Option<&mut ObjectRecord> {
        self.entry_mut(id).map(|entry| &mut entry.record)
    }

    pub(crate) fn is_live(&self, id: ObjectRef) -> bool {
        self.entry(id).is_some()
    }

    pub(crate) const fn len(&self) -> usize {
        self.live
    }

    /// Number of slots, live or free.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|entry| &entry.record))
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut ObjectRecord> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.entry.as_mut().map(|entry| &mut entry.record))
    }

    /// The live handle stored at `slot`.
    pub(crate) fn handle_at(&self, slot: usize) -> Option<ObjectRef> {
        self.slots
            .get(slot)
            .and_then(|s| s.entry.as_ref())
            .map(|entry| entry.record.id)
    }

    fn next_id(&self) -> ObjectRef {
        if let Some(&index) = self.free.last() {
            return ObjectRef::new(index, self.slots[index as usize].serial);
        }
        let Ok(index) = u32::try_from(self.slots.len()) else {
            panic!("object registry is full");
        };
        ObjectRef::new(index, 1)
    }

    fn insert(&mut self, entry: Entry) {
        let id = entry.record.id;
        if let Some(outer) = entry.record.outer {
            self.inners.entry(outer.index()).or_default().push(id);
        }
        if self.free.last() == Some(&id.index()) {
            self.free.pop();
            self.slots[id.slot()].entry = Some(entry);
        } else {
            self.slots.push(Slot {
                serial: id.serial(),
                entry: Some(entry),
            });
        }
        self.live += 1;
    }

    fn remove(&mut self, id: ObjectRef) -> Option<Entry> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.serial != id.serial() {
            return None;
        }
        let entry = slot.entry.take()?;
        // Serial 0 is never handed out.
        slot.serial = slot.serial.wrapping_add(1).max(1);
        self.free.push(id.index());
        self.live -= 1;

        if let Some(outer) = entry.record.outer {
            if let Some(siblings) = self.inners.get_mut(&outer.index()) {
                siblings.retain(|&inner| inner != id);
                if siblings.is_empty() {
                    self.inners.remove(&outer.index());
                }
            }
        }
        self.inners.remove(&id.index());
        Some(entry)
    }

    /// Direct inners of a live object.
    pub(crate) fn inners_of(&self, id: ObjectRef) -> impl Iterator<Item = ObjectRef> + '_ {
        self.inners
            .get(&id.index())
            .into_iter()
            .flatten()
            .copied()
            .filter(|&inner| self.is_live(inner))
    }
}

// ============================================================================
// ObjectRegistry
// ============================================================================

/// Owner of all objects taking part in reachability analysis.
///
/// Objects are plain Rust values implementing [`Reflect`]. Each gets an
/// [`ObjectRecord`] with its flags, outer and type descriptor, and is
/// addressed through a stable [`ObjectRef`].
///
/// # Example
///
/// ```ignore
/// let mut registry = ObjectRegistry::new();
/// let a = registry.spawn(Node::default())?;
/// registry.add_to_root(a)?;
/// registry.mark(&MarkRequest::new())?;
/// assert!(registry.is_reachable(a));
/// ```
pub struct ObjectRegistry {
    pub(crate) objects: ObjectTable,
    pub(crate) pass: PassState,
    pub(crate) config: RegistryConfig,
    types: Arc<TypeTable>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("objects", &self.objects.len())
            .field("phase", &self.pass.phase)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ObjectRegistry {
    /// Create an empty registry with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with its own type table.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        let types = Arc::new(TypeTable::new(config.build_mode));
        Self::with_type_table(types, config)
    }

    /// Create an empty registry sharing `types` with other registries.
    ///
    /// The table's own build mode wins over `config.build_mode`.
    #[must_use]
    pub fn with_type_table(types: Arc<TypeTable>, config: RegistryConfig) -> Self {
        Self {
            objects: ObjectTable::default(),
            pass: PassState::new(),
            config,
            types,
        }
    }

    /// The type table descriptors are loaded from.
    #[must_use]
    pub const fn type_table(&self) -> &Arc<TypeTable> {
        &self.types
    }

    /// The registry configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Add an object with default parameters.
    ///
    /// # Errors
    ///
    /// See [`spawn_with`](Self::spawn_with).
    pub fn spawn<T: Reflect>(&mut self, value: T) -> Result<ObjectRef> {
        self.spawn_with(value, SpawnParams::default())
    }

    /// Add an object.
    ///
    /// # Errors
    ///
    /// - Descriptor build errors of a strict type table.
    /// - [`ReachError::StaleObject`] if `params.outer` is not live.
    /// - [`ReachError::ConflictingSpawnFlags`] if `params.flags` has both
    ///   `ROOT_SET` and `GARBAGE`. No slot is allocated.
    ///
    /// # Panics
    ///
    /// Panics if the registry already holds `u32::MAX` slots.
    pub fn spawn_with<T: Reflect>(&mut self, value: T, params: SpawnParams) -> Result<ObjectRef> {
        if params.flags.contains(ObjectFlags::LIFECYCLE) {
            return Err(ReachError::ConflictingSpawnFlags(params.flags));
        }
        let descriptor = self.types.descriptor::<T>()?;
        if let Some(outer) = params.outer {
            if !self.objects.is_live(outer) {
                return Err(ReachError::StaleObject(outer));
            }
        }

        let id = self.objects.next_id();

        let name = params
            .name
            .unwrap_or_else(|| format!("{}_{}", descriptor.type_name(), id.index()));
        self.objects.insert(Entry {
            record: ObjectRecord {
                id,
                descriptor,
                flags: params.flags,
                outer: params.outer,
                name,
            },
            value: Box::new(value),
        });
        self.pass.invalidate();
        Ok(id)
    }

    /// Remove an object and drop its value.
    ///
    /// The object's inners keep their now stale outer handle.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn destroy(&mut self, id: ObjectRef) -> Result<()> {
        self.objects.remove(id).ok_or(ReachError::StaleObject(id))?;
        self.pass.forget(id);
        self.pass.invalidate();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    /// Whether `id` refers to a live object.
    #[must_use]
    pub fn contains(&self, id: ObjectRef) -> bool {
        self.objects.is_live(id)
    }

    /// Number of live objects.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the registry holds no object.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.objects.len() == 0
    }

    /// The record of a live object.
    #[must_use]
    pub fn record(&self, id: ObjectRef) -> Option<&ObjectRecord> {
        self.objects.record(id)
    }

    /// Iterate over all live records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.objects.records()
    }

    /// Borrow the value of a live object of type `T`.
    #[must_use]
    pub fn get<T: Reflect>(&self, id: ObjectRef) -> Option<&T> {
        self.objects.entry(id)?.value.downcast_ref::<T>()
    }

    /// Mutably borrow the value of a live object of type `T`.
    ///
    /// Counts as a change of the graph: a later sweep needs a new pass.
    pub fn get_mut<T: Reflect>(&mut self, id: ObjectRef) -> Option<&mut T> {
        let value = self.objects.entry_mut(id)?.value.downcast_mut::<T>();
        if value.is_some() {
            self.pass.invalidate();
        }
        value
    }

    /// Resolve a weak handle to its target if the target is live and not
    /// flagged as garbage.
    #[must_use]
    pub fn resolve_weak(&self, weak: &WeakObjectRef) -> Option<ObjectRef> {
        let target = weak.target();
        self.objects
            .record(target)
            .filter(|record| !record.flags.contains(ObjectFlags::GARBAGE))
            .map(|_| target)
    }

    // ------------------------------------------------------------------
    // Outers
    // ------------------------------------------------------------------

    /// All objects owned by `id`, directly or transitively.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn subobjects_of(&self, id: ObjectRef) -> Result<Vec<ObjectRef>> {
        if !self.objects.is_live(id) {
            return Err(ReachError::StaleObject(id));
        }
        let mut out = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            for inner in self.objects.inners_of(next) {
                out.push(inner);
                pending.push(inner);
            }
        }
        Ok(out)
    }

    /// Whether `outer` appears in the outer chain of `id`.
    #[must_use]
    pub fn is_in(&self, id: ObjectRef, outer: ObjectRef) -> bool {
        let mut current = self.objects.record(id).and_then(ObjectRecord::outer);
        while let Some(candidate) = current {
            if candidate == outer {
                return true;
            }
            current = self.objects.record(candidate).and_then(ObjectRecord::outer);
        }
        false
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    fn record_mut_or_stale(&mut self, id: ObjectRef) -> Result<&mut ObjectRecord> {
        self.objects.record_mut(id).ok_or(ReachError::StaleObject(id))
    }

    /// Current flags of a live object.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn flags(&self, id: ObjectRef) -> Result<ObjectFlags> {
        self.objects
            .record(id)
            .map(ObjectRecord::flags)
            .ok_or(ReachError::StaleObject(id))
    }

    /// Set flags on a live object.
    ///
    /// Like every flag change, this makes the registry unsweepable until the
    /// next full pass.
    ///
    /// [`ObjectFlags::LIFECYCLE`] bits are ignored here; use
    /// [`add_to_root`](Self::add_to_root) and
    /// [`mark_as_garbage`](Self::mark_as_garbage).
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn set_flags(&mut self, id: ObjectRef, flags: ObjectFlags) -> Result<()> {
        self.record_mut_or_stale(id)?.flags |= flags - ObjectFlags::LIFECYCLE;
        self.pass.invalidate();
        Ok(())
    }

    /// Clear flags on a live object. Lifecycle bits are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn clear_flags(&mut self, id: ObjectRef, flags: ObjectFlags) -> Result<()> {
        self.record_mut_or_stale(id)?.flags -= flags - ObjectFlags::LIFECYCLE;
        self.pass.invalidate();
        Ok(())
    }

    /// Clear `flags` on every live object.
    pub fn clear_flags_everywhere(&mut self, flags: ObjectFlags) {
        let flags = flags - ObjectFlags::LIFECYCLE;
        for record in self.objects.records_mut() {
            record.flags -= flags;
        }
        self.pass.invalidate();
    }

    /// Add an object to the root set.
    ///
    /// # Errors
    ///
    /// - [`ReachError::StaleObject`] if `id` is not live.
    /// - [`ReachError::RootedGarbage`] if the object is flagged as garbage.
    pub fn add_to_root(&mut self, id: ObjectRef) -> Result<()> {
        let record = self.record_mut_or_stale(id)?;
        if record.flags.contains(ObjectFlags::GARBAGE) {
            return Err(ReachError::RootedGarbage(id));
        }
        record.flags |= ObjectFlags::ROOT_SET;
        self.pass.invalidate();
        Ok(())
    }

    /// Remove an object from the root set.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn remove_from_root(&mut self, id: ObjectRef) -> Result<()> {
        self.record_mut_or_stale(id)?.flags -= ObjectFlags::ROOT_SET;
        self.pass.invalidate();
        Ok(())
    }

    /// Flag an object as garbage: it is no longer seeded nor followed.
    ///
    /// # Errors
    ///
    /// - [`ReachError::StaleObject`] if `id` is not live.
    /// - [`ReachError::RootedGarbage`] if the object is in the root set.
    pub fn mark_as_garbage(&mut self, id: ObjectRef) -> Result<()> {
        let record = self.record_mut_or_stale(id)?;
        if record.flags.contains(ObjectFlags::ROOT_SET) {
            return Err(ReachError::RootedGarbage(id));
        }
        record.flags |= ObjectFlags::GARBAGE;
        self.pass.invalidate();
        Ok(())
    }

    /// Clear the garbage flag of an object.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::StaleObject`] if `id` is not live.
    pub fn clear_garbage(&mut self, id: ObjectRef) -> Result<()> {
        self.record_mut_or_stale(id)?.flags -= ObjectFlags::GARBAGE;
        self.pass.invalidate();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------

    /// Destroy every object the last completed full pass left unmarked.
    ///
    /// Objects in the root set are never destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::InvalidPassState`] unless a full
    /// [`mark`](Self::mark) pass without excluded flags completed after the
    /// last spawn, destroy, mutable access or flag change.
    pub fn sweep_unreachable(&mut self) -> Result<SweepReport> {
        if self.pass.phase != PassPhase::Idle || !self.pass.sweepable {
            return Err(ReachError::InvalidPassState {
                phase: self.pass.phase,
            });
        }

        let start = Instant::now();
        log_phase_start(PassPhaseLog::Sweep, self.objects.len());

        let doomed: Vec<ObjectRef> = self
            .objects
            .records()
            .filter(|record| !record.flags.contains(ObjectFlags::ROOT_SET))
            .map(ObjectRecord::id)
            .filter(|id| !self.pass.bits.get(id.slot()))
            .collect();
        for &id in &doomed {
            self.objects.remove(id);
            self.pass.forget(id);
        }
        self.pass.invalidate();

        log_phase_end(PassPhaseLog::Sweep, doomed.len());
        Ok(SweepReport {
            destroyed: doomed,
            surviving: self.objects.len(),
            duration: start.elapsed(),
        })
    }

    /// Mark from the roots and the objects carrying any of `keep`, then sweep.
    ///
    /// # Errors
    ///
    /// See [`mark`](Self::mark).
    pub fn collect_garbage(&mut self, keep: ObjectFlags) -> Result<SweepReport> {
        self.mark(&MarkRequest::new().with_keep(Keep::AnyFlags(keep)))?;
        self.sweep_unreachable()
    }
}
