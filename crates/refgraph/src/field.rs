//! The `Field` trait and its implementations for std types.
//!
//! A `Field` is any Rust type that can appear as a reflected field of an
//! object or of a nested struct. It reports two things:
//!
//! - a [`RawKind`], which the descriptor builder classifies into a
//!   [`FieldKind`](crate::FieldKind) once per owning type, and
//! - a borrowed [`FieldRef`] view of its current value, which the reference
//!   visitor walks under the guidance of that `FieldKind`.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::marker::PhantomData;

use crate::descriptor::StructInfo;
use crate::object::{ObjectRef, WeakObjectRef};

// ============================================================================
// Core types
// ============================================================================

/// A type that can be stored in a reflected field.
///
/// # Examples
///
/// Plain data reports [`RawKind::Plain`] and is left out of descriptors:
///
/// ```ignore
/// impl Field for Meters {
///     fn raw_kind() -> RawKind { RawKind::Plain }
///     fn view(&self) -> FieldRef<'_> { FieldRef::Empty }
/// }
/// ```
///
/// A foreign handle the registry cannot enumerate reports
/// [`RawKind::Other`]. Strict builds reject it, lenient builds skip it.
pub trait Field: 'static {
    /// The shape of this type as seen by the descriptor builder.
    fn raw_kind() -> RawKind
    where
        Self: Sized;

    /// A read-only view of the current value.
    ///
    /// The view must have the shape announced by `raw_kind`.
    fn view(&self) -> FieldRef<'_>;
}

/// The unclassified shape of a field type.
#[derive(Debug, Clone)]
pub enum RawKind {
    /// Holds no object references.
    Plain,
    /// A strong [`ObjectRef`].
    Object,
    /// A [`WeakObjectRef`].
    WeakObject,
    /// A sequence of elements.
    Array(Box<RawKind>),
    /// An unordered collection of unique elements.
    Set(Box<RawKind>),
    /// Zero or one element.
    Optional(Box<RawKind>),
    /// Key/value pairs.
    Map(Box<RawKind>, Box<RawKind>),
    /// A nested reflected struct stored by value.
    Struct(StructInfo),
    /// A shape the builder does not know how to walk.
    Other(&'static str),
}

impl RawKind {
    /// The raw kind of a nested reflected struct.
    #[must_use]
    pub fn structure<T: crate::Reflect>() -> Self {
        Self::Struct(StructInfo::of::<T>())
    }
}

/// A borrowed view of a field value.
pub enum FieldRef<'a> {
    /// Nothing to walk.
    Empty,
    /// A single handle slot, strong or weak depending on the field kind.
    Object(Option<ObjectRef>),
    /// The elements of an array, set or optional.
    Elements(Box<dyn Iterator<Item = FieldRef<'a>> + 'a>),
    /// The entries of a map.
    Entries(Box<dyn Iterator<Item = (FieldRef<'a>, FieldRef<'a>)> + 'a>),
    /// A nested struct, walked through its own descriptor.
    Struct(&'a dyn Any),
}

impl<'a> FieldRef<'a> {
    /// Wrap an element iterator.
    pub fn elements<I>(iter: I) -> Self
    where
        I: Iterator<Item = FieldRef<'a>> + 'a,
    {
        Self::Elements(Box::new(iter))
    }

    /// Wrap an entry iterator.
    pub fn entries<I>(iter: I) -> Self
    where
        I: Iterator<Item = (FieldRef<'a>, FieldRef<'a>)> + 'a,
    {
        Self::Entries(Box::new(iter))
    }
}

impl std::fmt::Debug for FieldRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Object(id) => f.debug_tuple("Object").field(id).finish(),
            Self::Elements(_) => f.write_str("Elements(..)"),
            Self::Entries(_) => f.write_str("Entries(..)"),
            Self::Struct(_) => f.write_str("Struct(..)"),
        }
    }
}

// ============================================================================
// Handles
// ============================================================================

impl Field for ObjectRef {
    #[inline]
    fn raw_kind() -> RawKind {
        RawKind::Object
    }

    #[inline]
    fn view(&self) -> FieldRef<'_> {
        FieldRef::Object(Some(*self))
    }
}

impl Field for WeakObjectRef {
    #[inline]
    fn raw_kind() -> RawKind {
        RawKind::WeakObject
    }

    #[inline]
    fn view(&self) -> FieldRef<'_> {
        FieldRef::Object(Some(self.target()))
    }
}

// ============================================================================
// Plain data
// ============================================================================

macro_rules! impl_field_for_plain {
    ($($t:ty),* $(,)?) => {
        $(
            impl Field for $t {
                #[inline]
                fn raw_kind() -> RawKind {
                    RawKind::Plain
                }

                #[inline]
                fn view(&self) -> FieldRef<'_> {
                    FieldRef::Empty
                }
            }
        )*
    };
}

impl_field_for_plain! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool, char, (),
    String,
    &'static str,
    std::time::Duration,
    std::time::Instant,
    std::time::SystemTime,
    std::path::PathBuf,
    std::ffi::OsString,
    std::ffi::CString,
    std::net::IpAddr,
    std::net::SocketAddr,
}

impl<T: ?Sized + 'static> Field for PhantomData<T> {
    #[inline]
    fn raw_kind() -> RawKind {
        RawKind::Plain
    }

    #[inline]
    fn view(&self) -> FieldRef<'_> {
        FieldRef::Empty
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: Field> Field for Box<T> {
    #[inline]
    fn raw_kind() -> RawKind {
        T::raw_kind()
    }

    #[inline]
    fn view(&self) -> FieldRef<'_> {
        T::view(self)
    }
}

impl<T: Field> Field for Option<T> {
    fn raw_kind() -> RawKind {
        RawKind::Optional(Box::new(T::raw_kind()))
    }

    fn view(&self) -> FieldRef<'_> {
        FieldRef::elements(self.iter().map(T::view))
    }
}

macro_rules! impl_field_for_sequence {
    ($kind:ident: $($container:ty),* $(,)?) => {
        $(
            impl<T: Field> Field for $container {
                fn raw_kind() -> RawKind {
                    RawKind::$kind(Box::new(T::raw_kind()))
                }

                fn view(&self) -> FieldRef<'_> {
                    FieldRef::elements(self.iter().map(T::view))
                }
            }
        )*
    };
}

impl_field_for_sequence!(Array: Vec<T>, VecDeque<T>, LinkedList<T>);
impl_field_for_sequence!(Set: BTreeSet<T>);

impl<T: Field, const N: usize> Field for [T; N] {
    fn raw_kind() -> RawKind {
        RawKind::Array(Box::new(T::raw_kind()))
    }

    fn view(&self) -> FieldRef<'_> {
        FieldRef::elements(self.iter().map(T::view))
    }
}

impl<T: Field, S: 'static> Field for HashSet<T, S> {
    fn raw_kind() -> RawKind {
        RawKind::Set(Box::new(T::raw_kind()))
    }

    fn view(&self) -> FieldRef<'_> {
        FieldRef::elements(self.iter().map(T::view))
    }
}

impl<K: Field, V: Field, S: 'static> Field for HashMap<K, V, S> {
    fn raw_kind() -> RawKind {
        RawKind::Map(Box::new(K::raw_kind()), Box::new(V::raw_kind()))
    }

    fn view(&self) -> FieldRef<'_> {
        FieldRef::entries(self.iter().map(|(k, v)| (k.view(), v.view())))
    }
}

impl<K: Field, V: Field> Field for BTreeMap<K, V> {
    fn raw_kind() -> RawKind {
        RawKind::Map(Box::new(K::raw_kind()), Box::new(V::raw_kind()))
    }

    fn view(&self) -> FieldRef<'_> {
        FieldRef::entries(self.iter().map(|(k, v)| (k.view(), v.view())))
    }
}
