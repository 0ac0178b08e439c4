//! Request-scoped context handed to every store call.
//!
//! # Responsibility
//! - Carry cancellation, deadline and pagination input into a store call.
//! - Carry the few caller facts entities may derive defaults from.
//!
//! # Invariants
//! - A context never carries results back out; totals are returned by
//!   `find` in `FindResult`.
//! - Clones share one cancellation token.

use crate::store::StoreError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Page window requested for `find`. A zero limit disables pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }
}

/// Who is issuing the request, as far as entity defaults care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Caller {
    #[default]
    User,
    Admin,
}

/// Context for one store call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    pagination: Option<Pagination>,
    include_deleted: bool,
    caller: Caller,
}

impl RequestContext {
    /// Context without deadline, pagination or caller privileges.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_pagination(mut self, limit: u32, offset: u32) -> Self {
        self.pagination = Some(Pagination::new(limit, offset));
        self
    }

    /// Makes soft-deleted entities visible to reads and updates.
    pub fn with_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = caller;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Pagination window, or `None` when the call is unpaginated.
    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination.filter(Pagination::is_enabled)
    }

    pub fn include_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn caller(&self) -> Caller {
        self.caller
    }

    /// Returns the reason this context is done, if it is.
    ///
    /// Explicit cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<StoreError> {
        if self.cancellation.is_cancelled() {
            return Some(StoreError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StoreError::DeadlineExceeded),
            _ => None,
        }
    }

    /// `err()` as a `Result`, for `?` at checkpoints.
    pub fn check(&self) -> Result<(), StoreError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
