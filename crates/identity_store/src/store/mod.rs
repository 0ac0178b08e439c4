//! Generic entity store.
//!
//! # Responsibility
//! - Define the per-kind store contract (`EntityStore`) and its error taxonomy.
//! - Host the pieces every kind shares: field-mask resolution, the optimistic
//!   concurrency guard, row projection and the SQLite implementation.
//!
//! # Invariants
//! - Errors surface unmodified; the store never retries.
//! - `NotFound` and `Conflict` are expected outcomes, everything else aborts
//!   the current call only.

pub mod concurrency;
pub mod field_mask;
pub mod row;
mod sqlite;

use crate::context::RequestContext;
use crate::db::DbError;
use crate::model::{Entity, EntityIdentifiers, ValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use field_mask::FieldMask;
pub use sqlite::{client_store, gateway_store, ClientStore, GatewayStore, SqliteEntityStore};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// No visible row matches the identifiers.
    NotFound { kind: &'static str, id: String },
    /// Caller's `updated_at` token is stale.
    Conflict { kind: &'static str, id: String },
    /// Request was cancelled before any write was issued.
    Canceled,
    /// Request deadline passed before any write was issued.
    DeadlineExceeded,
    /// Field-mask path is unknown to the kind (or not a valid column).
    InvalidFieldMask { kind: &'static str, path: String },
    Validation(ValidationError),
    /// Persisted data cannot be mapped back to an entity.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Underlying SQLite failure, passed through as is.
    Db(DbError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub(crate) fn not_found(kind: &'static str, ids: &impl EntityIdentifiers) -> Self {
        Self::NotFound {
            kind,
            id: describe_ids(ids),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Conflict { kind, id } => {
                write!(f, "{kind} `{id}` was modified concurrently; reload and retry")
            }
            Self::Canceled => write!(f, "request canceled"),
            Self::DeadlineExceeded => write!(f, "request deadline exceeded"),
            Self::InvalidFieldMask { kind, path } => {
                write!(f, "invalid field mask path `{path}` for {kind}")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "entity store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "entity store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "entity store requires column `{column}` in table `{table}`"
            ),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Renders identifiers for errors and logs, e.g. `gtw-1` or `gtw-1 (70B3D57ED0000001)`.
pub fn describe_ids(ids: &impl EntityIdentifiers) -> String {
    match (ids.human_id(), ids.alternate_key()) {
        ("", Some(key)) => key,
        (id, Some(key)) => format!("{id} ({key})"),
        (id, None) => id.to_string(),
    }
}

/// Result of `find`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult<E> {
    /// Matching entities ordered by human-readable identifier.
    pub items: Vec<E>,
    /// Count of all matches ignoring limit/offset. `None` when unpaginated.
    pub total_count: Option<u64>,
}

impl<E> FindResult<E> {
    /// Total number of matches; falls back to the item count when unpaginated.
    pub fn total(&self) -> u64 {
        self.total_count.unwrap_or(self.items.len() as u64)
    }
}

/// Storage contract for one entity kind.
pub trait EntityStore<E: Entity> {
    /// Inserts a new entity and returns it as stored.
    fn create(&self, ctx: &RequestContext, entity: &E) -> StoreResult<E>;

    /// Loads one entity by any identifier it carries.
    fn get(&self, ctx: &RequestContext, ids: &E::Ids, mask: &FieldMask) -> StoreResult<E>;

    /// Loads every entity matching one of `ids`; all entities when `ids` is empty.
    fn find(
        &self,
        ctx: &RequestContext,
        ids: &[E::Ids],
        mask: &FieldMask,
    ) -> StoreResult<FindResult<E>>;

    /// Writes the masked fields of `entity` after the concurrency check.
    fn update(&self, ctx: &RequestContext, entity: &E, mask: &FieldMask) -> StoreResult<E>;

    /// Deletes (or tombstones) exactly one entity.
    fn delete(&self, ctx: &RequestContext, ids: &E::Ids) -> StoreResult<()>;
}
