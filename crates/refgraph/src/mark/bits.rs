//! Reachability bitmap, one bit per registry slot.

/// One reachable bit per registry slot.
///
/// Bits only ever go from clear to set during a pass; [`reset`](Self::reset)
/// clears everything at the start of the next one.
///
/// # Example
///
/// ```
/// use refgraph::mark::ReachabilityBits;
///
/// let mut bits = ReachabilityBits::new();
/// bits.reset(100);
/// assert!(bits.set(42));
/// assert!(!bits.set(42));
/// assert!(bits.get(42));
/// assert_eq!(bits.count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReachabilityBits {
    words: Vec<u64>,
    len: usize,
    count: usize,
}

impl ReachabilityBits {
    /// Create an empty bitmap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
            count: 0,
        }
    }

    /// Clear all bits and resize to `len` slots.
    pub fn reset(&mut self, len: usize) {
        self.words.clear();
        self.words.resize(len.div_ceil(64), 0);
        self.len = len;
        self.count = 0;
    }

    /// Number of slots covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the bitmap covers no slot.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Set the bit of `index`. Returns `true` if it was clear.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize) -> bool {
        assert!(index < self.len, "slot {index} out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        if *word & mask != 0 {
            return false;
        }
        *word |= mask;
        self.count += 1;
        true
    }

    /// Clear the bit of `index`. Out of bounds slots are ignored.
    pub fn clear(&mut self, index: usize) {
        if index >= self.len {
            return;
        }
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        if *word & mask != 0 {
            *word &= !mask;
            self.count -= 1;
        }
    }

    /// Whether the bit of `index` is set. Out of bounds slots are clear.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        index < self.len && (self.words[index / 64] >> (index % 64)) & 1 != 0
    }

    /// Iterate over the indices of set bits in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64)
                .filter(move |bit| (word >> bit) & 1 != 0)
                .map(move |bit| w * 64 + bit)
        })
    }
}
