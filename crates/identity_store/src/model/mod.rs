//! Entity model shared by every stored kind.
//!
//! # Responsibility
//! - Define the common identity/timestamp block (`Model`) every entity embeds.
//! - Define the `Entity` contract the generic store is written against.
//! - Describe each kind statically (`KindDescriptor`): table, identifier
//!   columns, field-path table and deletion policy.
//!
//! # Invariants
//! - Timestamps are UTC with millisecond resolution (`clean_time`).
//! - `created_at`/`updated_at`/`deleted_at` are written by the store only.
//! - The primary key and the human-readable identifier never change after
//!   creation.

pub mod client;
pub mod gateway;
pub mod ids;

use crate::context::RequestContext;
use crate::store::row::ProjectedRow;
use crate::store::StoreResult;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Columns every table carries, in select order.
pub const MODEL_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

/// Tombstone column of soft-delete kinds.
pub const DELETED_AT_COLUMN: &str = "deleted_at";

/// Normalizes a timestamp to UTC with millisecond resolution.
///
/// Anything compared for optimistic concurrency must go through here first,
/// otherwise sub-millisecond noise reads as a concurrent write.
pub fn clean_time<Tz: chrono::TimeZone>(t: DateTime<Tz>) -> DateTime<Utc> {
    t.with_timezone(&Utc).trunc_subsecs(3)
}

/// Current time as stored by the store.
pub fn now() -> DateTime<Utc> {
    clean_time(Utc::now())
}

pub(crate) fn timestamp_to_db(t: DateTime<Utc>) -> i64 {
    clean_time(t).timestamp_millis()
}

pub(crate) fn timestamp_from_db(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Identity and bookkeeping block embedded in every entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Opaque primary key. Nil until the store assigns one on create.
    pub id: Uuid,
    pub created_at: Option<DateTime<Utc>>,
    /// Concurrency token. `None` on an update request disables the check.
    pub updated_at: Option<DateTime<Utc>>,
    /// Tombstone; only ever set for soft-delete kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn primary_key(&self) -> Uuid {
        self.id
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Reads the model block from a (possibly projected) row.
    pub(crate) fn from_row(row: &ProjectedRow<'_, '_>) -> StoreResult<Self> {
        Ok(Self {
            id: row.get_uuid("id")?,
            created_at: row.get_timestamp("created_at")?,
            updated_at: row.get_timestamp("updated_at")?,
            deleted_at: row.get_timestamp(DELETED_AT_COLUMN)?,
        })
    }
}

/// Static description of one entity kind.
#[derive(Debug)]
pub struct KindDescriptor {
    /// Kind name used in errors and logs.
    pub name: &'static str,
    pub table: &'static str,
    /// Column of the human-readable identifier.
    pub id_column: &'static str,
    /// Column of an alternate unique key, if the kind has one.
    pub alternate_key: Option<&'static str>,
    /// Logical field path to physical column.
    pub columns: &'static [(&'static str, &'static str)],
    /// Whether delete tombstones the row instead of removing it.
    pub soft_delete: bool,
}

impl KindDescriptor {
    /// Looks up the column for a logical field path.
    pub fn column_for(&self, path: &str) -> Option<&'static str> {
        self.columns
            .iter()
            .find(|(candidate, _)| *candidate == path)
            .map(|(_, column)| *column)
    }

    /// Columns always selected and never written through a field mask.
    pub fn fixed_columns(&self) -> Vec<&'static str> {
        let mut columns = MODEL_COLUMNS.to_vec();
        if self.soft_delete {
            columns.push(DELETED_AT_COLUMN);
        }
        columns.push(self.id_column);
        columns
    }

    pub fn is_fixed_column(&self, column: &str) -> bool {
        MODEL_COLUMNS.contains(&column)
            || column == self.id_column
            || (self.soft_delete && column == DELETED_AT_COLUMN)
    }
}

/// Identifier set used to address an entity of one kind.
pub trait EntityIdentifiers {
    /// Human-readable identifier; empty when the caller addresses by another key.
    fn human_id(&self) -> &str;

    /// Value of the kind's alternate unique key, if set.
    fn alternate_key(&self) -> Option<String> {
        None
    }
}

/// Contract between a concrete entity and the generic store.
pub trait Entity: Sized + Clone {
    type Ids: EntityIdentifiers + Clone + std::fmt::Debug;

    fn descriptor() -> &'static KindDescriptor;

    fn model(&self) -> &Model;

    fn model_mut(&mut self) -> &mut Model;

    fn ids(&self) -> Self::Ids;

    fn primary_key(&self) -> Uuid {
        self.model().primary_key()
    }

    /// Binds request-derived defaults. Called by create before validation.
    fn set_context(&mut self, _ctx: &RequestContext) {}

    fn validate(&self) -> Result<(), ValidationError>;

    /// Values of every writable attribute column.
    ///
    /// Excludes model columns and the human-readable identifier.
    fn write_columns(&self) -> StoreResult<Vec<(&'static str, Value)>>;

    /// Rebuilds an entity from a row; columns projected out take defaults.
    fn from_row(row: &ProjectedRow<'_, '_>) -> StoreResult<Self>;
}

/// Entity invariant violations caught before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidId { kind: &'static str, value: String },
    InvalidEui(String),
    InvalidRedirectUri(String),
    InvalidAttributeKey(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId { kind, value } => write!(f, "invalid {kind} id `{value}`"),
            Self::InvalidEui(value) => write!(f, "invalid EUI-64 `{value}`"),
            Self::InvalidRedirectUri(value) => write!(f, "invalid redirect URI `{value}`"),
            Self::InvalidAttributeKey(value) => write!(f, "invalid attribute key `{value}`"),
        }
    }
}

impl Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::{clean_time, timestamp_from_db, timestamp_to_db};
    use chrono::{FixedOffset, TimeZone, Timelike, Utc};

    #[test]
    fn clean_time_truncates_to_milliseconds() {
        let raw = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 30, 15)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();
        let cleaned = clean_time(raw);
        assert_eq!(cleaned.nanosecond(), 123_000_000);
    }

    #[test]
    fn clean_time_converts_to_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap();
        let cleaned = clean_time(local);
        assert_eq!(cleaned, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn db_millis_roundtrip_is_stable() {
        let raw = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 30, 15)
            .unwrap()
            .with_nanosecond(987_654_321)
            .unwrap();
        let stored = timestamp_to_db(raw);
        assert_eq!(timestamp_from_db(stored), Some(clean_time(raw)));
    }
}
