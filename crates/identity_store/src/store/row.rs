//! Read access to rows produced by a projected `SELECT`.
//!
//! Columns left out by a field mask are simply absent from the statement;
//! reading one yields the type's default instead of an error.

use crate::model::timestamp_from_db;
use crate::store::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::types::FromSql;
use rusqlite::{Row, Statement};
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub struct ProjectedRow<'a, 'stmt> {
    row: &'a Row<'stmt>,
}

impl<'a, 'stmt> ProjectedRow<'a, 'stmt> {
    pub(crate) fn new(row: &'a Row<'stmt>) -> Self {
        Self { row }
    }

    /// Value of `column`; default when absent or NULL.
    pub fn get<T: FromSql + Default>(&self, column: &str) -> StoreResult<T> {
        Ok(self.get_opt(column)?.unwrap_or_default())
    }

    /// Value of `column`; `None` when absent or NULL.
    pub fn get_opt<T: FromSql>(&self, column: &str) -> StoreResult<Option<T>> {
        match self.index(column) {
            Some(index) => Ok(self.row.get::<_, Option<T>>(index)?),
            None => Ok(None),
        }
    }

    /// JSON-encoded TEXT column.
    pub fn get_json<T: DeserializeOwned + Default>(&self, column: &str) -> StoreResult<T> {
        match self.get_opt::<String>(column)? {
            Some(text) => serde_json::from_str(&text).map_err(|err| {
                StoreError::InvalidData(format!("invalid JSON in column `{column}`: {err}"))
            }),
            None => Ok(T::default()),
        }
    }

    /// Epoch-millisecond INTEGER column.
    pub fn get_timestamp(&self, column: &str) -> StoreResult<Option<DateTime<Utc>>> {
        match self.get_opt::<i64>(column)? {
            Some(millis) => timestamp_from_db(millis).map(Some).ok_or_else(|| {
                StoreError::InvalidData(format!("timestamp {millis} out of range in `{column}`"))
            }),
            None => Ok(None),
        }
    }

    /// UUID TEXT column; nil when absent.
    pub fn get_uuid(&self, column: &str) -> StoreResult<Uuid> {
        match self.get_opt::<String>(column)? {
            Some(text) => Uuid::parse_str(&text).map_err(|_| {
                StoreError::InvalidData(format!("invalid uuid value `{text}` in `{column}`"))
            }),
            None => Ok(Uuid::nil()),
        }
    }

    fn index(&self, column: &str) -> Option<usize> {
        let stmt: &Statement<'stmt> = self.row.as_ref();
        stmt.column_index(column).ok()
    }
}
