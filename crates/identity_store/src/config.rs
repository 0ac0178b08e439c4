//! Store configuration.
//!
//! # Invariants
//! - `StoreOptions::default()` rejects unknown field-mask paths.
//! - `max_page_limit` is never zero after normalization.

/// Behavior for field-mask paths missing from a kind's column table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFieldPolicy {
    /// Fail the call with `StoreError::InvalidFieldMask`.
    #[default]
    Reject,
    /// Use the path verbatim as a column name, provided it is a plain SQL
    /// identifier. Lets newer callers name columns this binary has no
    /// table entry for yet.
    PassThrough,
}

/// Upper bound applied to requested page sizes by default.
pub const DEFAULT_MAX_PAGE_LIMIT: u32 = 1000;

/// Options shared by every entity store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub unknown_fields: UnknownFieldPolicy,
    /// Requested limits above this value are clamped to it.
    pub max_page_limit: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            unknown_fields: UnknownFieldPolicy::default(),
            max_page_limit: DEFAULT_MAX_PAGE_LIMIT,
        }
    }
}

impl StoreOptions {
    pub fn with_unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.unknown_fields = policy;
        self
    }

    pub fn with_max_page_limit(mut self, limit: u32) -> Self {
        self.max_page_limit = limit;
        self
    }

    /// Clamps a requested page size. Zero means "not paginated" and is kept.
    pub fn clamp_limit(&self, requested: u32) -> u32 {
        requested.min(self.max_page_limit.max(1))
    }
}
