//! SQLite implementation of `EntityStore`, generic over the entity kind.
//!
//! # Responsibility
//! - Turn `KindDescriptor` + `Entity` into SQL for create/get/find/update/delete.
//! - Keep every read-check-write sequence inside one IMMEDIATE transaction.
//!
//! # Invariants
//! - Tombstoned rows are invisible unless the context asks for them.
//! - The concurrency check, the cancellation checkpoint and the write run in
//!   the same transaction; an error at any point rolls everything back.
//! - When the borrowed connection is already inside a transaction, the store
//!   joins it instead of opening its own.

use super::concurrency::{check_fresh, next_updated_at};
use super::field_mask::{resolve, writable_columns, FieldMask};
use super::row::ProjectedRow;
use super::{EntityStore, FindResult, StoreError, StoreResult};
use crate::config::StoreOptions;
use crate::context::RequestContext;
use crate::db::migrations::{current_user_version, latest_version};
use crate::model::client::Client;
use crate::model::gateway::Gateway;
use crate::model::{now, timestamp_to_db, Entity, EntityIdentifiers, KindDescriptor};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Transaction, TransactionBehavior};
use std::marker::PhantomData;
use uuid::Uuid;

pub type ClientStore<'conn> = SqliteEntityStore<'conn, Client>;
pub type GatewayStore<'conn> = SqliteEntityStore<'conn, Gateway>;

/// Client store on the given connection (or transaction).
pub fn client_store(conn: &Connection) -> StoreResult<ClientStore<'_>> {
    SqliteEntityStore::try_new(conn)
}

/// Gateway store on the given connection (or transaction).
pub fn gateway_store(conn: &Connection) -> StoreResult<GatewayStore<'_>> {
    SqliteEntityStore::try_new(conn)
}

/// Stateless store for entity kind `E`; all state lives in the database.
pub struct SqliteEntityStore<'conn, E: Entity> {
    conn: &'conn Connection,
    options: StoreOptions,
    table_columns: Vec<String>,
    _kind: PhantomData<fn() -> E>,
}

impl<'conn, E: Entity> SqliteEntityStore<'conn, E> {
    /// Creates a store with default options from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        Self::with_options(conn, StoreOptions::default())
    }

    pub fn with_options(conn: &'conn Connection, options: StoreOptions) -> StoreResult<Self> {
        let table_columns = ensure_connection_ready(conn, E::descriptor())?;
        Ok(Self {
            conn,
            options,
            table_columns,
            _kind: PhantomData,
        })
    }

    /// Clears the tombstone of a soft-deleted entity.
    ///
    /// `NotFound` when no tombstoned row matches or the kind is never
    /// soft-deleted.
    pub fn restore(&self, ctx: &RequestContext, ids: &E::Ids) -> StoreResult<E> {
        ctx.check()?;
        let kind = E::descriptor();
        if !kind.soft_delete {
            return Err(StoreError::not_found(kind.name, ids));
        }

        let restored = in_transaction(self.conn, TransactionBehavior::Immediate, |conn| {
            let current = load_version(conn, kind, &Lookup::of(ids), Visibility::Deleted)?;
            ctx.check()?;

            let updated_at = next_updated_at(current.updated_at);
            conn.execute(
                &format!(
                    "UPDATE {} SET deleted_at = NULL, updated_at = ?1 WHERE id = ?2;",
                    kind.table
                ),
                params![timestamp_to_db(updated_at), current.id.to_string()],
            )?;
            fetch_by_primary_key::<E>(conn, kind, current.id, None)
        })?;

        debug!(
            "event=entity_restore module=store status=ok kind={} id={}",
            kind.name,
            ids.human_id()
        );
        Ok(restored)
    }

    /// Physically removes a soft-deleted entity.
    pub fn purge(&self, ctx: &RequestContext, ids: &E::Ids) -> StoreResult<()> {
        ctx.check()?;
        let kind = E::descriptor();
        if !kind.soft_delete {
            return Err(StoreError::not_found(kind.name, ids));
        }

        in_transaction(self.conn, TransactionBehavior::Immediate, |conn| {
            let current = load_version(conn, kind, &Lookup::of(ids), Visibility::Deleted)?;
            ctx.check()?;
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1;", kind.table),
                [current.id.to_string()],
            )?;
            Ok(())
        })?;

        debug!(
            "event=entity_purge module=store status=ok kind={} id={}",
            kind.name,
            ids.human_id()
        );
        Ok(())
    }
}

impl<E: Entity> EntityStore<E> for SqliteEntityStore<'_, E> {
    fn create(&self, ctx: &RequestContext, entity: &E) -> StoreResult<E> {
        ctx.check()?;
        let kind = E::descriptor();

        let mut entity = entity.clone();
        entity.set_context(ctx);
        entity.validate()?;

        let stamp = now();
        let model = entity.model_mut();
        if model.id.is_nil() {
            model.id = Uuid::new_v4();
        }
        model.created_at = Some(stamp);
        model.updated_at = Some(stamp);
        model.deleted_at = None;
        let id = model.id;

        let mut columns = vec!["id", "created_at", "updated_at", kind.id_column];
        let mut values = vec![
            Value::Text(id.to_string()),
            Value::Integer(timestamp_to_db(stamp)),
            Value::Integer(timestamp_to_db(stamp)),
            Value::Text(entity.ids().human_id().to_string()),
        ];
        for (column, value) in entity.write_columns()? {
            columns.push(column);
            values.push(value);
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            kind.table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        let created = in_transaction(self.conn, TransactionBehavior::Immediate, |conn| {
            ctx.check()?;
            conn.execute(&sql, params_from_iter(values))?;
            fetch_by_primary_key::<E>(conn, kind, id, None)
        })?;

        debug!(
            "event=entity_create module=store status=ok kind={} id={}",
            kind.name,
            created.ids().human_id()
        );
        Ok(created)
    }

    fn get(&self, ctx: &RequestContext, ids: &E::Ids, mask: &FieldMask) -> StoreResult<E> {
        ctx.check()?;
        let kind = E::descriptor();
        let columns = resolve(mask, kind, self.options.unknown_fields, &self.table_columns)?;

        let Some((clause, binds)) = Lookup::of(ids).clause(kind) else {
            return Err(StoreError::not_found(kind.name, ids));
        };
        let mut filter = Filter::default();
        filter.push(clause, binds);
        filter.restrict(kind, Visibility::for_context(ctx));

        let sql = format!(
            "SELECT {} FROM {}{} LIMIT 1;",
            select_list(columns.as_deref()),
            kind.table,
            filter.where_sql()
        );
        query_entities::<E>(self.conn, &sql, &filter.binds)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(kind.name, ids))
    }

    fn find(
        &self,
        ctx: &RequestContext,
        ids: &[E::Ids],
        mask: &FieldMask,
    ) -> StoreResult<FindResult<E>> {
        ctx.check()?;
        let kind = E::descriptor();
        let columns = resolve(mask, kind, self.options.unknown_fields, &self.table_columns)?;
        let pagination = ctx.pagination();

        let mut filter = Filter::default();
        if !ids.is_empty() {
            let mut alternatives = Vec::new();
            let mut binds = Vec::new();
            for clause in ids.iter().filter_map(|id| Lookup::of(id).clause(kind)) {
                alternatives.push(clause.0);
                binds.extend(clause.1);
            }
            if alternatives.is_empty() {
                return Ok(FindResult {
                    items: Vec::new(),
                    total_count: pagination.map(|_| 0),
                });
            }
            filter.push(format!("({})", alternatives.join(" OR ")), binds);
        }
        filter.restrict(kind, Visibility::for_context(ctx));

        in_transaction(self.conn, TransactionBehavior::Deferred, |conn| {
            let total_count = match pagination {
                Some(_) => Some(count_rows(conn, kind, &filter)?),
                None => None,
            };

            let mut sql = format!(
                "SELECT {} FROM {}{} ORDER BY {} ASC",
                select_list(columns.as_deref()),
                kind.table,
                filter.where_sql(),
                kind.id_column
            );
            let mut binds = filter.binds.clone();
            if let Some(page) = pagination {
                sql.push_str(" LIMIT ? OFFSET ?");
                binds.push(Value::Integer(i64::from(self.options.clamp_limit(page.limit))));
                binds.push(Value::Integer(i64::from(page.offset)));
            }

            let items = query_entities::<E>(conn, &sql, &binds)?;
            Ok(FindResult { items, total_count })
        })
    }

    fn update(&self, ctx: &RequestContext, entity: &E, mask: &FieldMask) -> StoreResult<E> {
        ctx.check()?;
        let kind = E::descriptor();
        let resolved = resolve(mask, kind, self.options.unknown_fields, &self.table_columns)?;
        entity.validate()?;

        let ids = entity.ids();
        let human_id = ids.human_id();
        let all_values = entity.write_columns()?;
        let values: Vec<(&'static str, Value)> = match resolved.as_deref() {
            None => all_values,
            Some(resolved) => {
                let allowed = writable_columns(kind, resolved);
                all_values
                    .into_iter()
                    .filter(|(column, _)| allowed.contains(column))
                    .collect()
            }
        };

        let updated = in_transaction(self.conn, TransactionBehavior::Immediate, |conn| {
            let current = load_version(
                conn,
                kind,
                &Lookup::by_human_id(human_id),
                Visibility::for_context(ctx),
            )?;

            let desired = entity.model().updated_at;
            if let Err(err) = check_fresh(kind, human_id, desired, current.updated_at) {
                warn!(
                    "event=entity_update module=store status=conflict kind={} id={}",
                    kind.name, human_id
                );
                return Err(err);
            }
            ctx.check()?;

            if values.is_empty() {
                debug!(
                    "event=entity_update module=store status=noop kind={} id={}",
                    kind.name, human_id
                );
                return fetch_by_primary_key::<E>(conn, kind, current.id, None);
            }

            let updated_at = next_updated_at(current.updated_at);
            let assignments = values
                .iter()
                .map(|(column, _)| format!("{column} = ?"))
                .chain(std::iter::once("updated_at = ?".to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            let mut binds: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();
            binds.push(Value::Integer(timestamp_to_db(updated_at)));
            binds.push(Value::Text(current.id.to_string()));

            conn.execute(
                &format!("UPDATE {} SET {assignments} WHERE id = ?;", kind.table),
                params_from_iter(binds),
            )?;
            fetch_by_primary_key::<E>(conn, kind, current.id, None)
        })?;

        debug!(
            "event=entity_update module=store status=ok kind={} id={} columns={}",
            kind.name,
            human_id,
            values.len()
        );
        Ok(updated)
    }

    fn delete(&self, ctx: &RequestContext, ids: &E::Ids) -> StoreResult<()> {
        ctx.check()?;
        let kind = E::descriptor();

        in_transaction(self.conn, TransactionBehavior::Immediate, |conn| {
            let current = load_version(conn, kind, &Lookup::of(ids), Visibility::Active)?;
            ctx.check()?;

            if kind.soft_delete {
                let deleted_at = timestamp_to_db(next_updated_at(current.updated_at));
                conn.execute(
                    &format!(
                        "UPDATE {} SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2;",
                        kind.table
                    ),
                    params![deleted_at, current.id.to_string()],
                )?;
            } else {
                conn.execute(
                    &format!("DELETE FROM {} WHERE id = ?1;", kind.table),
                    [current.id.to_string()],
                )?;
            }
            Ok(())
        })?;

        debug!(
            "event=entity_delete module=store status=ok kind={} id={} soft={}",
            kind.name,
            ids.human_id(),
            kind.soft_delete
        );
        Ok(())
    }
}

/// Which rows of a soft-delete kind a statement may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Active,
    All,
    Deleted,
}

impl Visibility {
    fn for_context(ctx: &RequestContext) -> Self {
        if ctx.include_deleted() {
            Self::All
        } else {
            Self::Active
        }
    }
}

/// Identifier values used to address one row.
struct Lookup<'a> {
    human_id: &'a str,
    alternate_key: Option<String>,
}

impl<'a> Lookup<'a> {
    fn of(ids: &'a impl EntityIdentifiers) -> Self {
        Self {
            human_id: ids.human_id(),
            alternate_key: ids.alternate_key(),
        }
    }

    fn by_human_id(human_id: &'a str) -> Self {
        Self {
            human_id,
            alternate_key: None,
        }
    }

    /// `(a = ? AND b = ?)` over every identifier that is set; `None` when none is.
    fn clause(&self, kind: &KindDescriptor) -> Option<(String, Vec<Value>)> {
        let mut parts = Vec::new();
        let mut binds = Vec::new();
        if !self.human_id.is_empty() {
            parts.push(format!("{} = ?", kind.id_column));
            binds.push(Value::Text(self.human_id.to_string()));
        }
        if let (Some(column), Some(key)) = (kind.alternate_key, self.alternate_key.as_ref()) {
            parts.push(format!("{column} = ?"));
            binds.push(Value::Text(key.clone()));
        }
        if parts.is_empty() {
            None
        } else {
            Some((format!("({})", parts.join(" AND ")), binds))
        }
    }
}

impl EntityIdentifiers for Lookup<'_> {
    fn human_id(&self) -> &str {
        self.human_id
    }

    fn alternate_key(&self) -> Option<String> {
        self.alternate_key.clone()
    }
}

#[derive(Debug, Default)]
struct Filter {
    clauses: Vec<String>,
    binds: Vec<Value>,
}

impl Filter {
    fn push(&mut self, clause: String, binds: Vec<Value>) {
        self.clauses.push(clause);
        self.binds.extend(binds);
    }

    fn restrict(&mut self, kind: &KindDescriptor, visibility: Visibility) {
        if !kind.soft_delete {
            return;
        }
        match visibility {
            Visibility::Active => self.clauses.push("deleted_at IS NULL".to_string()),
            Visibility::Deleted => self.clauses.push("deleted_at IS NOT NULL".to_string()),
            Visibility::All => {}
        }
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

struct StoredVersion {
    id: Uuid,
    updated_at: Option<DateTime<Utc>>,
}

/// Locates exactly one row and reads its primary key and concurrency token.
fn load_version(
    conn: &Connection,
    kind: &KindDescriptor,
    lookup: &Lookup<'_>,
    visibility: Visibility,
) -> StoreResult<StoredVersion> {
    let not_found = || StoreError::not_found(kind.name, lookup);
    let Some((clause, binds)) = lookup.clause(kind) else {
        return Err(not_found());
    };
    let mut filter = Filter::default();
    filter.push(clause, binds);
    filter.restrict(kind, visibility);

    let mut stmt = conn.prepare(&format!(
        "SELECT id, updated_at FROM {}{} LIMIT 1;",
        kind.table,
        filter.where_sql()
    ))?;
    let mut rows = stmt.query(params_from_iter(filter.binds.iter()))?;
    match rows.next()? {
        Some(row) => {
            let row = ProjectedRow::new(row);
            Ok(StoredVersion {
                id: row.get_uuid("id")?,
                updated_at: row.get_timestamp("updated_at")?,
            })
        }
        None => Err(not_found()),
    }
}

fn fetch_by_primary_key<E: Entity>(
    conn: &Connection,
    kind: &KindDescriptor,
    id: Uuid,
    columns: Option<&[String]>,
) -> StoreResult<E> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?;",
        select_list(columns),
        kind.table
    );
    query_entities::<E>(conn, &sql, &[Value::Text(id.to_string())])?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound {
            kind: kind.name,
            id: id.to_string(),
        })
}

fn query_entities<E: Entity>(conn: &Connection, sql: &str, binds: &[Value]) -> StoreResult<Vec<E>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(binds.iter()))?;
    let mut entities = Vec::new();
    while let Some(row) = rows.next()? {
        entities.push(E::from_row(&ProjectedRow::new(row))?);
    }
    Ok(entities)
}

fn count_rows(conn: &Connection, kind: &KindDescriptor, filter: &Filter) -> StoreResult<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}{};", kind.table, filter.where_sql()),
        params_from_iter(filter.binds.iter()),
        |row| row.get(0),
    )?;
    u64::try_from(count).map_err(|_| StoreError::InvalidData(format!("negative row count {count}")))
}

fn select_list(columns: Option<&[String]>) -> String {
    match columns {
        Some(columns) => columns.join(", "),
        None => "*".to_string(),
    }
}

/// Runs `body` in a transaction, or inside the caller's when one is open.
fn in_transaction<T>(
    conn: &Connection,
    behavior: TransactionBehavior,
    body: impl FnOnce(&Connection) -> StoreResult<T>,
) -> StoreResult<T> {
    if !conn.is_autocommit() {
        return body(conn);
    }
    let tx = Transaction::new_unchecked(conn, behavior)?;
    let value = body(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Checks schema version and required columns; returns the table's columns.
fn ensure_connection_ready(conn: &Connection, kind: &KindDescriptor) -> StoreResult<Vec<String>> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, kind.table)? {
        return Err(StoreError::MissingRequiredTable(kind.table));
    }

    let table_columns = table_columns(conn, kind.table)?;
    let attribute_columns = kind.columns.iter().map(|(_, column)| *column);
    for column in kind.fixed_columns().into_iter().chain(attribute_columns) {
        if !table_columns.iter().any(|current| current == column) {
            return Err(StoreError::MissingRequiredColumn {
                table: kind.table,
                column,
            });
        }
    }

    Ok(table_columns)
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}
