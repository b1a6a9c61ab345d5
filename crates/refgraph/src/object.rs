//! Object handles and object flags.

use std::fmt;

use bitflags::bitflags;

/// A stable handle to an object stored in an [`ObjectRegistry`].
///
/// The handle pairs a slot index with the slot's serial number. A slot may be
/// recycled after its object is destroyed, but the serial number changes on
/// every reuse, so a handle never refers to two different objects. A handle
/// whose object was destroyed is *stale*.
///
/// Storing an `ObjectRef` in a reflected field makes it a strong reference.
///
/// [`ObjectRegistry`]: crate::ObjectRegistry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    index: u32,
    serial: u32,
}

impl ObjectRef {
    pub(crate) const fn new(index: u32, serial: u32) -> Self {
        Self { index, serial }
    }

    /// The slot index of this handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// The serial number of the slot when this handle was created.
    #[inline]
    #[must_use]
    pub const fn serial(self) -> u32 {
        self.serial
    }

    #[inline]
    pub(crate) const fn slot(self) -> usize {
        self.index as usize
    }

    /// Create a weak handle to the same object.
    #[inline]
    #[must_use]
    pub const fn downgrade(self) -> WeakObjectRef {
        WeakObjectRef(self)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.serial)
    }
}

/// A handle that observes an object without keeping it alive.
///
/// Weak fields are recorded in the type descriptor but skipped by the
/// reference visitor. Use [`ObjectRegistry::resolve_weak`] to get the target
/// back while it is still alive.
///
/// [`ObjectRegistry::resolve_weak`]: crate::ObjectRegistry::resolve_weak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakObjectRef(ObjectRef);

impl WeakObjectRef {
    /// The handle this weak reference points at, live or not.
    #[inline]
    #[must_use]
    pub const fn target(self) -> ObjectRef {
        self.0
    }
}

impl From<ObjectRef> for WeakObjectRef {
    fn from(value: ObjectRef) -> Self {
        value.downgrade()
    }
}

bitflags! {
    /// Per-object flags.
    ///
    /// `ROOT_SET` and `GARBAGE` drive the reachability pass directly. The
    /// remaining flags are meaningful to callers as keep or exclude flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        /// Always reachable. Cannot be combined with `GARBAGE`.
        const ROOT_SET = 1 << 0;
        /// Unreachable by decree: never seeded and never followed.
        const GARBAGE = 1 << 1;
        /// Kept alive without being referenced (the usual keep flag).
        const STANDALONE = 1 << 2;
        /// Visible outside of its outer.
        const PUBLIC = 1 << 3;
        /// Not meant to outlive the session.
        const TRANSIENT = 1 << 4;
        /// Participates in undo history.
        const TRANSACTIONAL = 1 << 5;
        /// Bookkeeping tag used by `is_referenced` to exclude objects.
        const TAG_EXCLUDED = 1 << 6;
        /// Free for application use.
        const USER_0 = 1 << 16;
        /// Free for application use.
        const USER_1 = 1 << 17;
        /// Free for application use.
        const USER_2 = 1 << 18;
        /// Free for application use.
        const USER_3 = 1 << 19;
    }
}

impl ObjectFlags {
    /// Flags that only the registry may change through dedicated calls.
    pub const LIFECYCLE: Self = Self::ROOT_SET.union(Self::GARBAGE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        let id = ObjectRef::new(3, 7);
        assert_eq!(id.to_string(), "#3v7");
        assert_eq!(id.index(), 3);
        assert_eq!(id.serial(), 7);
    }

    #[test]
    fn test_weak_round_trip() {
        let id = ObjectRef::new(1, 1);
        assert_eq!(id.downgrade().target(), id);
        assert_eq!(WeakObjectRef::from(id), id.downgrade());
    }

    #[test]
    fn test_lifecycle_flags() {
        assert!(ObjectFlags::LIFECYCLE.contains(ObjectFlags::ROOT_SET));
        assert!(ObjectFlags::LIFECYCLE.contains(ObjectFlags::GARBAGE));
        assert!(!ObjectFlags::LIFECYCLE.intersects(ObjectFlags::STANDALONE));
    }
}
