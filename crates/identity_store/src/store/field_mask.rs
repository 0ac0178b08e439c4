//! Field-mask resolution.
//!
//! Translates logical field paths into the physical columns a read selects
//! or an update may write.
//!
//! # Invariants
//! - An empty mask means "every column".
//! - A non-empty mask always selects the model columns and the kind's
//!   identifier column first, then the translated paths, without duplicates.
//! - Only names from the kind's column table or the live table schema ever
//!   reach a statement.
//! - Reads and writes resolve a mask identically.

use crate::config::UnknownFieldPolicy;
use crate::model::KindDescriptor;
use crate::store::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// Ordered set of logical attribute paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    /// Mask selecting every field.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Resolves `mask` into columns for `kind`.
///
/// `table_columns` is the column list of the kind's table; pass-through paths
/// must name one of them. Returns `None` for an empty mask (no restriction).
pub fn resolve(
    mask: &FieldMask,
    kind: &KindDescriptor,
    policy: UnknownFieldPolicy,
    table_columns: &[String],
) -> StoreResult<Option<Vec<String>>> {
    if mask.is_empty() {
        return Ok(None);
    }

    let mut columns: Vec<String> = kind
        .fixed_columns()
        .into_iter()
        .map(str::to_string)
        .collect();

    for path in mask.paths() {
        let column = match kind.column_for(path) {
            Some(column) => column.to_string(),
            None => pass_through(kind, path, policy, table_columns)?,
        };
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    Ok(Some(columns))
}

/// Columns of a resolved mask that an update may write.
pub fn writable_columns<'a>(kind: &KindDescriptor, resolved: &'a [String]) -> Vec<&'a str> {
    resolved
        .iter()
        .map(String::as_str)
        .filter(|column| !kind.is_fixed_column(column))
        .collect()
}

fn pass_through(
    kind: &KindDescriptor,
    path: &str,
    policy: UnknownFieldPolicy,
    table_columns: &[String],
) -> StoreResult<String> {
    match policy {
        UnknownFieldPolicy::PassThrough if table_columns.iter().any(|column| column == path) => {
            Ok(path.to_string())
        }
        _ => Err(StoreError::InvalidFieldMask {
            kind: kind.name,
            path: path.to_string(),
        }),
    }
}
