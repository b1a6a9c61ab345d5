//! Non-recursive reachability analysis over a registry of reflected objects.
//!
//! `refgraph` stores plain Rust values in an [`ObjectRegistry`] and answers
//! two questions about the graph their fields form:
//!
//! - **What is reachable?** [`ObjectRegistry::mark`] seeds a worklist from
//!   the root set and the objects a [`Keep`] policy keeps, then follows
//!   strong references until the worklist is empty.
//! - **Is this object still referenced?** [`ObjectRegistry::is_referenced`]
//!   excludes one object (and optionally everything it owns), marks the
//!   rest of the graph and reports whether anything still points at it.
//!
//! Fields are discovered through explicit registration: a type implements
//! [`Reflect`] (usually with `#[derive(Reflect)]`) and lists its fields once.
//! The [`TypeTable`] classifies them into [`FieldKind`]s and caches the
//! resulting [`TypeDescriptor`].
//!
//! # Quick Start
//!
//! ```ignore
//! use refgraph::{MarkRequest, ObjectRef, ObjectRegistry, Reflect, ReferenceQuery};
//!
//! #[derive(Reflect, Default)]
//! struct Node {
//!     label: String,
//!     next: Option<ObjectRef>,
//! }
//!
//! let mut registry = ObjectRegistry::new();
//! let c = registry.spawn(Node::default())?;
//! let b = registry.spawn(Node { next: Some(c), ..Node::default() })?;
//! let a = registry.spawn(Node { next: Some(b), ..Node::default() })?;
//! registry.add_to_root(a)?;
//!
//! registry.mark(&MarkRequest::new())?;
//! assert!(registry.is_reachable(c));
//! assert!(registry.is_referenced(b, &ReferenceQuery::default())?);
//! ```
//!
//! # Weak references
//!
//! A [`WeakObjectRef`] field is described but never followed, so it does
//! not keep its target alive. [`ObjectRegistry::resolve_weak`] returns the
//! target while it is live.
//!
//! # Threading
//!
//! Passes take `&mut ObjectRegistry` and run to completion on the calling
//! thread. A [`TypeTable`] may be shared between registries through an
//! `Arc`.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod descriptor;
mod error;
mod field;
mod object;
mod query;
mod registry;
mod tracing;
mod visit;

/// Mark pass internals: the bitmap and the worklist.
///
/// Public for benchmarks and advanced use. Most users only need
/// [`ObjectRegistry::mark`].
pub mod mark;

/// Pass and sweep statistics.
pub mod metrics;

// Re-export public API
pub use config::{RegistryConfig, DEFAULT_WORKLIST_CAPACITY};
pub use descriptor::{
    BuildMode, FieldDescriptor, FieldKind, RawField, Reflect, StructInfo, TypeBuilder,
    TypeDescriptor, TypeTable,
};
pub use error::{ReachError, Result};
pub use field::{Field, FieldRef, RawKind};
pub use mark::{Keep, MarkRequest, PassPhase};
pub use metrics::{MarkReport, PassKind, SweepReport};
pub use object::{ObjectFlags, ObjectRef, WeakObjectRef};
pub use query::{ReferenceQuery, ReferencerInfo, ReferencerReport, ScopedFlagMarker};
pub use registry::{ObjectRecord, ObjectRegistry, SpawnParams};
pub use tracing::PassId;
pub use visit::{ReferenceSink, StaleReason, StaleReferenceSkipped, OUTER_FIELD};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use refgraph_derive::Reflect;
