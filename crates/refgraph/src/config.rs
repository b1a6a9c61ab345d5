//! Registry configuration.

use crate::descriptor::BuildMode;

/// Default capacity reserved for the mark worklist.
pub const DEFAULT_WORKLIST_CAPACITY: usize = 1024;

/// Configuration for an [`ObjectRegistry`](crate::ObjectRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How the registry's own type table treats unclassifiable fields.
    ///
    /// Ignored when the registry is created with a shared table.
    pub build_mode: BuildMode,
    /// Report each object's outer as a strong reference named `"outer"`.
    pub outer_keeps_alive: bool,
    /// Log every skipped stale reference at debug level.
    pub log_stale_references: bool,
    /// Keep the skipped stale references in the [`MarkReport`](crate::MarkReport).
    pub record_stale_references: bool,
    /// Capacity reserved for the worklist at the start of a pass.
    pub initial_worklist_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            build_mode: BuildMode::default(),
            outer_keeps_alive: true,
            log_stale_references: false,
            record_stale_references: false,
            initial_worklist_capacity: DEFAULT_WORKLIST_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Set the build mode of the registry's type table.
    #[must_use]
    pub const fn with_build_mode(mut self, mode: BuildMode) -> Self {
        self.build_mode = mode;
        self
    }

    /// Enable or disable the implicit outer reference.
    #[must_use]
    pub const fn with_outer_keeps_alive(mut self, enabled: bool) -> Self {
        self.outer_keeps_alive = enabled;
        self
    }

    /// Enable or disable debug logging of stale references.
    #[must_use]
    pub const fn with_log_stale_references(mut self, enabled: bool) -> Self {
        self.log_stale_references = enabled;
        self
    }

    /// Enable or disable recording of stale references in mark reports.
    #[must_use]
    pub const fn with_record_stale_references(mut self, enabled: bool) -> Self {
        self.record_stale_references = enabled;
        self
    }

    /// Set the initial worklist capacity.
    #[must_use]
    pub const fn with_initial_worklist_capacity(mut self, capacity: usize) -> Self {
        self.initial_worklist_capacity = capacity;
        self
    }
}
