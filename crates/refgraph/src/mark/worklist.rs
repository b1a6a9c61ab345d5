//! Explicit worklist for the mark pass.

use crate::object::ObjectRef;

/// Growing stack of objects whose references still have to be visited.
///
/// The mark pass drains it in a loop instead of recursing, so graph depth
/// never turns into call stack depth.
#[derive(Debug, Default)]
pub struct Worklist {
    items: Vec<ObjectRef>,
    pushed: usize,
    high_water: usize,
}

impl Worklist {
    /// Create a worklist with room for `capacity` pending objects.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            pushed: 0,
            high_water: 0,
        }
    }

    /// Push an object.
    #[inline]
    pub fn push(&mut self, id: ObjectRef) {
        self.items.push(id);
        self.pushed += 1;
        self.high_water = self.high_water.max(self.items.len());
    }

    /// Pop the most recently pushed object.
    #[inline]
    pub fn pop(&mut self) -> Option<ObjectRef> {
        self.items.pop()
    }

    /// Number of pending objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of pushes since creation.
    #[must_use]
    pub const fn pushed(&self) -> usize {
        self.pushed
    }

    /// Largest number of objects pending at once.
    #[must_use]
    pub const fn high_water(&self) -> usize {
        self.high_water
    }
}
