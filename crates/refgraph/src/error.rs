//! Error types for descriptor builds, mark passes and registry access.

use thiserror::Error;

use crate::mark::PassPhase;
use crate::object::{ObjectFlags, ObjectRef};

/// Errors returned by `refgraph` operations.
///
/// Most variants are contract violations on the caller's side. They are
/// surfaced as values so that the caller decides whether to abort, but the
/// registry never tries to repair the state that caused them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReachError {
    /// A field reported a raw kind the descriptor builder cannot enumerate.
    ///
    /// Only returned in [`BuildMode::Strict`](crate::BuildMode::Strict).
    /// Lenient builds skip the field and log a warning instead.
    #[error("field `{type_name}::{field}` has unknown field kind `{kind}`")]
    UnknownFieldKind {
        /// The type that declares the field.
        type_name: &'static str,
        /// The declared field name.
        field: &'static str,
        /// The name reported by the field's `RawKind::Other`.
        kind: &'static str,
    },

    /// A nested struct field contains its own type.
    #[error("struct `{type_name}` contains itself through field `{field}`")]
    RecursiveStruct {
        /// The struct that is nested in itself.
        type_name: &'static str,
        /// The field where the cycle was detected.
        field: &'static str,
    },

    /// The registry's pass state does not allow the operation.
    ///
    /// Returned when a pass or flag scope is started while a previous one has
    /// not completed (a leaked flag marker or a panicked pass), and when a
    /// sweep is requested without a completed pass to sweep against.
    #[error("operation not allowed in the {phase:?} pass phase")]
    InvalidPassState {
        /// The phase the registry was found in.
        phase: PassPhase,
    },

    /// The handle does not refer to a live object.
    #[error("object handle {0} is stale")]
    StaleObject(ObjectRef),

    /// The object is already flagged as garbage.
    #[error("object {0} is flagged as garbage")]
    GarbageObject(ObjectRef),

    /// A root set object was flagged as garbage.
    #[error("object {0} is part of the root set and cannot be garbage")]
    RootedGarbage(ObjectRef),

    /// A new object was requested with flags that cannot be combined.
    ///
    /// Returned by `spawn_with` before any slot is allocated.
    #[error("an object cannot be spawned with flags {0:?}")]
    ConflictingSpawnFlags(ObjectFlags),

    /// A root set object carries the flags excluded from the pass.
    #[error("object {0} is part of the root set but carries excluded flags")]
    ExcludedRoot(ObjectRef),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReachError> = std::result::Result<T, E>;
