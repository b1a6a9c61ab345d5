//! Type descriptors: the reflected, reference-bearing fields of a type.
//!
//! A [`TypeDescriptor`] is built once per Rust type from the fields that the
//! type registers through [`Reflect::describe`], then cached in a
//! [`TypeTable`]. Each registered field is classified from its [`RawKind`]
//! into a [`FieldKind`]. Fields that cannot hold object references are
//! dropped from the descriptor, so the reference visitor only ever walks
//! fields that matter.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ReachError, Result};
use crate::field::{Field, FieldRef, RawKind};

// ============================================================================
// Registration
// ============================================================================

/// A type whose fields can be walked by the reference visitor.
///
/// Prefer `#[derive(Reflect)]`. A manual implementation registers every
/// field that may hold an object reference:
///
/// ```ignore
/// impl Reflect for Actor {
///     fn type_name() -> &'static str {
///         "Actor"
///     }
///
///     fn describe(builder: &mut TypeBuilder<Self>) {
///         builder
///             .field("owner", |this: &Self| &this.owner)
///             .field("children", |this: &Self| &this.children);
///     }
/// }
/// ```
pub trait Reflect: Any {
    /// A human readable name used in diagnostics.
    fn type_name() -> &'static str
    where
        Self: Sized;

    /// Register the fields of this type.
    fn describe(builder: &mut TypeBuilder<Self>)
    where
        Self: Sized;
}

/// Collects field registrations for `T`.
pub struct TypeBuilder<T> {
    fields: Vec<RawField>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Reflect> TypeBuilder<T> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Register a field read through `get`.
    ///
    /// The order of registration is the order of the descriptor.
    pub fn field<F, G>(&mut self, name: &'static str, get: G) -> &mut Self
    where
        F: Field,
        G: for<'a> Fn(&'a T) -> &'a F + Send + Sync + 'static,
    {
        self.fields.push(RawField {
            name,
            raw: F::raw_kind(),
            accessor: Arc::new(TypedAccessor {
                get,
                _marker: PhantomData,
            }),
        });
        self
    }
}

/// A registered field before classification.
#[derive(Clone)]
pub struct RawField {
    name: &'static str,
    raw: RawKind,
    accessor: Arc<dyn ErasedAccessor>,
}

impl RawField {
    /// The registered field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The unclassified kind of the field.
    #[must_use]
    pub const fn raw_kind(&self) -> &RawKind {
        &self.raw
    }
}

impl fmt::Debug for RawField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawField")
            .field("name", &self.name)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

/// Identity and field list of a reflected struct, used for nested fields.
#[derive(Clone, Copy)]
pub struct StructInfo {
    type_id: TypeId,
    type_name: &'static str,
    fields: fn() -> Vec<RawField>,
}

impl StructInfo {
    /// Describe `T`.
    #[must_use]
    pub fn of<T: Reflect>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: T::type_name(),
            fields: collect_fields::<T>,
        }
    }

    /// The described type's name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for StructInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructInfo")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn collect_fields<T: Reflect>() -> Vec<RawField> {
    let mut builder = TypeBuilder::<T>::new();
    T::describe(&mut builder);
    builder.fields
}

trait ErasedAccessor: Send + Sync {
    fn view<'a>(&self, owner: &'a dyn Any) -> FieldRef<'a>;
}

struct TypedAccessor<T, F, G> {
    get: G,
    _marker: PhantomData<fn(&T) -> &F>,
}

impl<T, F, G> ErasedAccessor for TypedAccessor<T, F, G>
where
    T: 'static,
    F: Field,
    G: for<'a> Fn(&'a T) -> &'a F + Send + Sync,
{
    fn view<'a>(&self, owner: &'a dyn Any) -> FieldRef<'a> {
        owner
            .downcast_ref::<T>()
            .map_or(FieldRef::Empty, |this| (self.get)(this).view())
    }
}

// ============================================================================
// Classified descriptors
// ============================================================================

/// The classified kind of a reference-bearing field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// A single strong handle.
    DirectStrong,
    /// A single weak handle.
    DirectWeak,
    /// A sequence of elements of the given kind.
    Array(Box<FieldKind>),
    /// A set of elements of the given kind.
    Set(Box<FieldKind>),
    /// An optional element of the given kind.
    Optional(Box<FieldKind>),
    /// A map; `None` marks a side that holds no references.
    Map {
        /// Kind of the keys.
        key: Option<Box<FieldKind>>,
        /// Kind of the values.
        value: Option<Box<FieldKind>>,
    },
    /// A struct stored by value.
    NestedStruct(Arc<TypeDescriptor>),
}

impl FieldKind {
    /// Whether a value of this kind can keep an object alive.
    #[must_use]
    pub fn holds_strong(&self) -> bool {
        match self {
            Self::DirectStrong => true,
            Self::DirectWeak => false,
            Self::Array(elem) | Self::Set(elem) | Self::Optional(elem) => elem.holds_strong(),
            Self::Map { key, value } => {
                key.as_deref().is_some_and(Self::holds_strong)
                    || value.as_deref().is_some_and(Self::holds_strong)
            }
            Self::NestedStruct(descriptor) => descriptor.holds_strong(),
        }
    }
}

/// A classified field of a [`TypeDescriptor`].
#[derive(Clone)]
pub struct FieldDescriptor {
    name: &'static str,
    kind: FieldKind,
    accessor: Arc<dyn ErasedAccessor>,
}

impl FieldDescriptor {
    /// The registered field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The classified kind.
    #[must_use]
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Read the field from an instance of the owning type.
    ///
    /// Returns [`FieldRef::Empty`] if `owner` is not of the owning type.
    #[must_use]
    pub fn read<'a>(&self, owner: &'a dyn Any) -> FieldRef<'a> {
        self.accessor.view(owner)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The reference-bearing fields of one type, in registration order.
#[derive(Debug)]
pub struct TypeDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    fields: Vec<FieldDescriptor>,
    holds_strong: bool,
}

impl TypeDescriptor {
    /// The `TypeId` of the described type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The described type's name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// All classified fields, weak ones included.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether any field can keep an object alive.
    #[must_use]
    pub const fn holds_strong(&self) -> bool {
        self.holds_strong
    }

    /// The fields the reference visitor walks.
    pub fn strong_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.kind.holds_strong())
    }
}

// ============================================================================
// TypeTable
// ============================================================================

/// How the builder treats fields it cannot classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Abort the build and return the error.
    Strict,
    /// Skip the field, log a warning and keep building.
    Lenient,
}

impl Default for BuildMode {
    /// Strict in debug builds, lenient in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

/// Cache of type descriptors keyed by `TypeId`.
///
/// A table may be shared between registries through an `Arc`. Descriptors
/// are immutable once built, so readers never block each other.
#[derive(Debug, Default)]
pub struct TypeTable {
    mode: BuildMode,
    cache: RwLock<HashMap<TypeId, Arc<TypeDescriptor>>>,
}

impl TypeTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(mode: BuildMode) -> Self {
        Self {
            mode,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The build mode of this table.
    #[must_use]
    pub const fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Number of cached descriptors, nested structs included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Whether no descriptor has been built yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Whether a descriptor for `T` is cached.
    #[must_use]
    pub fn contains<T: Reflect>(&self) -> bool {
        self.cache.read().contains_key(&TypeId::of::<T>())
    }

    /// Get the descriptor of `T`, building and caching it on first use.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`ReachError::UnknownFieldKind`] or
    /// [`ReachError::RecursiveStruct`] if a field cannot be classified.
    pub fn descriptor<T: Reflect>(&self) -> Result<Arc<TypeDescriptor>> {
        self.resolve(&StructInfo::of::<T>())
    }

    /// Get the descriptor of the struct described by `info`.
    ///
    /// # Errors
    ///
    /// See [`TypeTable::descriptor`].
    pub fn resolve(&self, info: &StructInfo) -> Result<Arc<TypeDescriptor>> {
        let mut in_progress = Vec::new();
        self.resolve_inner(info, &mut in_progress)
    }

    fn resolve_inner(
        &self,
        info: &StructInfo,
        in_progress: &mut Vec<TypeId>,
    ) -> Result<Arc<TypeDescriptor>> {
        if let Some(cached) = self.cache.read().get(&info.type_id) {
            return Ok(Arc::clone(cached));
        }

        // The lock is not held while building: nested structs resolve
        // through this same table.
        in_progress.push(info.type_id);
        let built = self.build(info, in_progress);
        in_progress.pop();
        let built = Arc::new(built?);

        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(info.type_id).or_insert(built)))
    }

    fn build(&self, info: &StructInfo, in_progress: &mut Vec<TypeId>) -> Result<TypeDescriptor> {
        let mut fields = Vec::new();

        for raw in (info.fields)() {
            match self.classify(info, raw.name, &raw.raw, in_progress) {
                Ok(Some(kind)) => fields.push(FieldDescriptor {
                    name: raw.name,
                    kind,
                    accessor: raw.accessor,
                }),
                Ok(None) => {}
                Err(err) if self.mode == BuildMode::Lenient => {
                    crate::tracing::log_field_skipped(info.type_name, raw.name, &err);
                }
                Err(err) => return Err(err),
            }
        }

        let holds_strong = fields.iter().any(|f| f.kind.holds_strong());
        Ok(TypeDescriptor {
            type_id: info.type_id,
            type_name: info.type_name,
            fields,
            holds_strong,
        })
    }

    fn classify(
        &self,
        owner: &StructInfo,
        field: &'static str,
        raw: &RawKind,
        in_progress: &mut Vec<TypeId>,
    ) -> Result<Option<FieldKind>> {
        let kind = match raw {
            RawKind::Plain => None,
            RawKind::Object => Some(FieldKind::DirectStrong),
            RawKind::WeakObject => Some(FieldKind::DirectWeak),
            RawKind::Array(elem) => self
                .classify(owner, field, elem, in_progress)?
                .map(|k| FieldKind::Array(Box::new(k))),
            RawKind::Set(elem) => self
                .classify(owner, field, elem, in_progress)?
                .map(|k| FieldKind::Set(Box::new(k))),
            RawKind::Optional(elem) => self
                .classify(owner, field, elem, in_progress)?
                .map(|k| FieldKind::Optional(Box::new(k))),
            RawKind::Map(key, value) => {
                let key = self.classify(owner, field, key, in_progress)?;
                let value = self.classify(owner, field, value, in_progress)?;
                if key.is_none() && value.is_none() {
                    None
                } else {
                    Some(FieldKind::Map {
                        key: key.map(Box::new),
                        value: value.map(Box::new),
                    })
                }
            }
            RawKind::Struct(nested) => {
                if in_progress.contains(&nested.type_id) {
                    return Err(ReachError::RecursiveStruct {
                        type_name: nested.type_name,
                        field,
                    });
                }
                let descriptor = self.resolve_inner(nested, in_progress)?;
                if descriptor.fields.is_empty() {
                    None
                } else {
                    Some(FieldKind::NestedStruct(descriptor))
                }
            }
            RawKind::Other(kind) => {
                return Err(ReachError::UnknownFieldKind {
                    type_name: owner.type_name,
                    field,
                    kind,
                })
            }
        };
        Ok(kind)
    }
}
