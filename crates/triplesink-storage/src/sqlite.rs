//! SQLite storage backend for TripleSink.
//!
//! Persists the cursor, the entity/triple graph, the undo journal, and the
//! per-space extension tables to a single SQLite file. SQLite has no
//! schemas, so an extension table is named `"<schema>.<type>"` as one
//! quoted identifier.
//!
//! # Usage
//! ```rust,no_run
//! use triplesink_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./sink.db", 4).await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use triplesink_core::checkpoint::{check_journal_retained, revert_above, CheckpointStore};
use triplesink_core::cursor::Cursor;
use triplesink_core::error::SinkError;
use triplesink_core::ident;
use triplesink_core::store::{SpacePartitioner, TripleStore};
use triplesink_core::types::{
    ColumnDef, ColumnType, CommitBatch, Entity, EntityUpsert, ExtensionTable, JournalOp, Literal,
    Mutation, RollbackReport, Space, Triple, ValueType,
};

use crate::error::{already_exists, classify};
use crate::journal;

/// SQLite-backed graph store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./sink.db"`) or a full
    /// SQLite URL (`"sqlite:./sink.db"`).
    pub async fn open(path: &str, max_connections: u32) -> Result<Self, SinkError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| SinkError::Config(format!("invalid sqlite url {url}: {e}")))?
            .create_if_missing(true)
            // WAL mode: readers do not block the single writer
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(classify)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the
    /// pool holds exactly one connection and never recycles it.
    pub async fn in_memory() -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SinkError::Config(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(classify)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the fixed tables and indexes.
    async fn init_schema(&self) -> Result<(), SinkError> {
        const STATEMENTS: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS cursors (
                id            INTEGER PRIMARY KEY,
                cursor        TEXT    NOT NULL,
                block_number  INTEGER NOT NULL,
                journal_floor INTEGER NOT NULL DEFAULT 0,
                updated_at    INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS entities (
                id          TEXT    PRIMARY KEY,
                name        TEXT,
                description TEXT,
                is_type     BOOLEAN NOT NULL DEFAULT 0,
                value_type  TEXT,
                defined_in  TEXT
            );",
            "CREATE TABLE IF NOT EXISTS triples (
                entity_id    TEXT NOT NULL,
                attribute_id TEXT NOT NULL,
                value_id     TEXT NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_triples_entity_attribute
                ON triples (entity_id, attribute_id);",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_triples_entity_attribute_value
                ON triples (entity_id, attribute_id, value_id);",
            "CREATE INDEX IF NOT EXISTS idx_triples_attribute_value
                ON triples (attribute_id, value_id);",
            "CREATE TABLE IF NOT EXISTS literals (
                value_id   TEXT PRIMARY KEY,
                value_type TEXT NOT NULL,
                value      TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS spaces (
                id          TEXT PRIMARY KEY,
                schema_name TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS extension_tables (
                space_id   TEXT NOT NULL REFERENCES spaces(id),
                type_name  TEXT NOT NULL,
                table_name TEXT NOT NULL,
                PRIMARY KEY (space_id, type_name)
            );",
            "CREATE TABLE IF NOT EXISTS extension_columns (
                space_id    TEXT NOT NULL,
                type_name   TEXT NOT NULL,
                column_name TEXT NOT NULL,
                column_type TEXT NOT NULL,
                PRIMARY KEY (space_id, type_name, column_name)
            );",
            "CREATE TABLE IF NOT EXISTS ingest_journal (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                block_number INTEGER NOT NULL,
                op           TEXT    NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_ingest_journal_block
                ON ingest_journal (block_number);",
        ];

        for statement in STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }
        Ok(())
    }

    /// Apply one mutation outside any batch.
    async fn apply_one(&self, mutation: Mutation) -> Result<Option<JournalOp>, SinkError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        apply(&mut conn, &mutation).await
    }

    async fn schema_name(&self, space_id: &str) -> Result<Option<String>, SinkError> {
        let row = sqlx::query("SELECT schema_name FROM spaces WHERE id = ?")
            .bind(space_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.map(|r| r.get("schema_name")))
    }

    /// Run a DDL statement, treating "already exists" as success.
    async fn execute_ddl(&self, statement: &str) -> Result<(), SinkError> {
        match sqlx::query(statement).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if already_exists(&e) => {
                debug!(error = %e, "structure already exists");
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────

/// Physical name of an extension table.
fn table_ident(schema_name: &str, type_name: &str) -> Result<String, SinkError> {
    ident::validate(schema_name)?;
    ident::validate(type_name)?;
    Ok(ident::quote(&format!("{schema_name}.{type_name}")))
}

async fn read_cursor(conn: &mut SqliteConnection) -> Result<Cursor, SinkError> {
    let row = sqlx::query("SELECT cursor, block_number FROM cursors WHERE id = 0")
        .fetch_optional(&mut *conn)
        .await
        .map_err(classify)?;
    Ok(match row {
        Some(r) => Cursor::new(
            r.get::<String, _>("cursor"),
            r.get::<i64, _>("block_number") as u64,
        ),
        None => Cursor::start(),
    })
}

/// Lowest block whose undo journal entries are all retained.
async fn journal_floor(conn: &mut SqliteConnection) -> Result<u64, SinkError> {
    let row = sqlx::query("SELECT journal_floor FROM cursors WHERE id = 0")
        .fetch_optional(&mut *conn)
        .await
        .map_err(classify)?;
    Ok(row.map_or(0, |r| r.get::<i64, _>("journal_floor") as u64))
}

/// Move the cursor from `expected` to `next`, or fail with the stored cursor.
///
/// The conditional write takes SQLite's write lock, so it must be the first
/// statement of the transaction.
async fn swap_cursor(
    conn: &mut SqliteConnection,
    expected: &Cursor,
    next: &Cursor,
) -> Result<(), SinkError> {
    let mut changed = sqlx::query(
        "UPDATE cursors SET cursor = ?, block_number = ?, updated_at = ?
         WHERE id = 0 AND cursor = ? AND block_number = ?",
    )
    .bind(&next.token)
    .bind(next.block_number as i64)
    .bind(journal::now())
    .bind(&expected.token)
    .bind(expected.block_number as i64)
    .execute(&mut *conn)
    .await
    .map_err(classify)?
    .rows_affected();

    if changed == 0 && expected.is_start() {
        changed = sqlx::query(
            "INSERT INTO cursors (id, cursor, block_number, updated_at)
             VALUES (0, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&next.token)
        .bind(next.block_number as i64)
        .bind(journal::now())
        .execute(&mut *conn)
        .await
        .map_err(classify)?
        .rows_affected();
    }

    if changed == 1 {
        return Ok(());
    }
    Err(SinkError::CursorConflict {
        expected: expected.clone(),
        actual: read_cursor(conn).await?,
    })
}

const ENTITY_COLUMNS: &str = "id, name, description, is_type, value_type, defined_in";

fn entity_from_row(r: &SqliteRow) -> Entity {
    Entity {
        id: r.get("id"),
        name: r.get("name"),
        description: r.get("description"),
        is_type: r.get("is_type"),
        value_type: r.get("value_type"),
        defined_in: r.get("defined_in"),
    }
}

async fn fetch_entity(conn: &mut SqliteConnection, id: &str) -> Result<Option<Entity>, SinkError> {
    let row = sqlx::query(&format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(classify)?;
    Ok(row.as_ref().map(entity_from_row))
}

async fn fetch_literal(
    conn: &mut SqliteConnection,
    value_id: &str,
) -> Result<Option<Literal>, SinkError> {
    let row = sqlx::query("SELECT value_id, value_type, value FROM literals WHERE value_id = ?")
        .bind(value_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(classify)?;
    row.map(|r| {
        let raw: String = r.get("value_type");
        let value_type = ValueType::parse(&raw).ok_or_else(|| {
            SinkError::Query(format!("literal {value_id} has unknown value type '{raw}'"))
        })?;
        Ok(Literal {
            value_id: r.get("value_id"),
            value_type,
            value: r.get("value"),
        })
    })
    .transpose()
}

async fn write_entity(conn: &mut SqliteConnection, entity: &Entity) -> Result<(), SinkError> {
    sqlx::query(
        "INSERT INTO entities (id, name, description, is_type, value_type, defined_in)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, description = excluded.description,
             is_type = excluded.is_type, value_type = excluded.value_type,
             defined_in = excluded.defined_in",
    )
    .bind(&entity.id)
    .bind(&entity.name)
    .bind(&entity.description)
    .bind(entity.is_type)
    .bind(&entity.value_type)
    .bind(&entity.defined_in)
    .execute(&mut *conn)
    .await
    .map_err(classify)?;
    Ok(())
}

async fn write_literal(conn: &mut SqliteConnection, literal: &Literal) -> Result<(), SinkError> {
    sqlx::query(
        "INSERT INTO literals (value_id, value_type, value) VALUES (?, ?, ?)
         ON CONFLICT(value_id) DO UPDATE SET value_type = excluded.value_type, value = excluded.value",
    )
    .bind(&literal.value_id)
    .bind(literal.value_type.as_str())
    .bind(&literal.value)
    .execute(&mut *conn)
    .await
    .map_err(classify)?;
    Ok(())
}

async fn insert_triple(conn: &mut SqliteConnection, triple: &Triple) -> Result<bool, SinkError> {
    let inserted = sqlx::query(
        "INSERT INTO triples (entity_id, attribute_id, value_id) VALUES (?, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(&triple.entity_id)
    .bind(&triple.attribute_id)
    .bind(&triple.value_id)
    .execute(&mut *conn)
    .await
    .map_err(classify)?
    .rows_affected();
    Ok(inserted == 1)
}

async fn remove_triple(conn: &mut SqliteConnection, triple: &Triple) -> Result<bool, SinkError> {
    let removed = sqlx::query(
        "DELETE FROM triples WHERE entity_id = ? AND attribute_id = ? AND value_id = ?",
    )
    .bind(&triple.entity_id)
    .bind(&triple.attribute_id)
    .bind(&triple.value_id)
    .execute(&mut *conn)
    .await
    .map_err(classify)?
    .rows_affected();
    Ok(removed > 0)
}

/// Apply a mutation, returning its journal entry if anything changed.
async fn apply(
    conn: &mut SqliteConnection,
    mutation: &Mutation,
) -> Result<Option<JournalOp>, SinkError> {
    let op = match mutation {
        Mutation::UpsertEntity(upsert) => {
            let previous = fetch_entity(conn, &upsert.id).await?;
            let next = match &previous {
                Some(entity) => entity.merged(upsert),
                None => upsert.to_entity(),
            };
            if previous.as_ref() == Some(&next) {
                return Ok(None);
            }
            write_entity(conn, &next).await?;
            JournalOp::EntityWritten {
                id: upsert.id.clone(),
                previous,
            }
        }
        Mutation::UpsertLiteral(literal) => {
            let previous = fetch_literal(conn, &literal.value_id).await?;
            if previous.as_ref() == Some(literal) {
                return Ok(None);
            }
            write_literal(conn, literal).await?;
            JournalOp::LiteralWritten {
                value_id: literal.value_id.clone(),
                previous,
            }
        }
        Mutation::UpsertTriple(triple) => {
            if !insert_triple(conn, triple).await? {
                return Ok(None);
            }
            JournalOp::TripleInserted {
                triple: triple.clone(),
            }
        }
        Mutation::DeleteTriple(triple) => {
            if !remove_triple(conn, triple).await? {
                return Ok(None);
            }
            JournalOp::TripleDeleted {
                triple: triple.clone(),
            }
        }
        Mutation::InsertExtensionRow(row) => {
            let table = table_ident(&row.schema_name, &row.type_name)?;
            let inserted = sqlx::query(&format!(
                "INSERT INTO {table} (id, entity_id) VALUES (?, ?) ON CONFLICT DO NOTHING"
            ))
            .bind(&row.row_id)
            .bind(&row.entity_id)
            .execute(&mut *conn)
            .await
            .map_err(classify)?
            .rows_affected();
            if inserted == 0 {
                return Ok(None);
            }
            JournalOp::RowInserted { row: row.clone() }
        }
    };
    Ok(Some(op))
}

async fn revert(
    conn: &mut SqliteConnection,
    op: &JournalOp,
    report: &mut RollbackReport,
) -> Result<(), SinkError> {
    match op {
        JournalOp::EntityWritten { id, previous } => match previous {
            Some(entity) => write_entity(conn, entity).await?,
            None => {
                sqlx::query("DELETE FROM entities WHERE id = ?")
                    .bind(id)
                    .execute(&mut *conn)
                    .await
                    .map_err(classify)?;
            }
        },
        JournalOp::LiteralWritten { value_id, previous } => match previous {
            Some(literal) => write_literal(conn, literal).await?,
            None => {
                sqlx::query("DELETE FROM literals WHERE value_id = ?")
                    .bind(value_id)
                    .execute(&mut *conn)
                    .await
                    .map_err(classify)?;
            }
        },
        JournalOp::TripleInserted { triple } => {
            remove_triple(conn, triple).await?;
            report.triples_retracted += 1;
        }
        JournalOp::TripleDeleted { triple } => {
            insert_triple(conn, triple).await?;
            report.triples_restored += 1;
        }
        JournalOp::RowInserted { row } => {
            let table = table_ident(&row.schema_name, &row.type_name)?;
            sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
                .bind(&row.row_id)
                .execute(&mut *conn)
                .await
                .map_err(classify)?;
        }
    }
    report.ops_reverted += 1;
    Ok(())
}

// ─── TripleStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl TripleStore for SqliteStore {
    async fn upsert_entity(&self, upsert: &EntityUpsert) -> Result<(), SinkError> {
        self.apply_one(Mutation::UpsertEntity(upsert.clone())).await?;
        Ok(())
    }

    async fn upsert_triple(&self, triple: &Triple) -> Result<bool, SinkError> {
        let op = self.apply_one(Mutation::UpsertTriple(triple.clone())).await?;
        Ok(op.is_some())
    }

    async fn delete_triple(&self, triple: &Triple) -> Result<bool, SinkError> {
        let op = self.apply_one(Mutation::DeleteTriple(triple.clone())).await?;
        Ok(op.is_some())
    }

    async fn upsert_literal(&self, literal: &Literal) -> Result<(), SinkError> {
        self.apply_one(Mutation::UpsertLiteral(literal.clone())).await?;
        Ok(())
    }

    async fn entity(&self, id: &str) -> Result<Option<Entity>, SinkError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        fetch_entity(&mut conn, id).await
    }

    async fn literal(&self, value_id: &str) -> Result<Option<Literal>, SinkError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        fetch_literal(&mut conn, value_id).await
    }

    async fn triples_by_entity_attribute(
        &self,
        entity_id: &str,
        attribute_id: &str,
    ) -> Result<Vec<String>, SinkError> {
        let rows = sqlx::query(
            "SELECT value_id FROM triples
             WHERE entity_id = ? AND attribute_id = ? ORDER BY value_id",
        )
        .bind(entity_id)
        .bind(attribute_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        Ok(rows.iter().map(|r| r.get("value_id")).collect())
    }

    async fn entities_by_attribute_value(
        &self,
        attribute_id: &str,
        value_id: &str,
    ) -> Result<Vec<String>, SinkError> {
        let rows = sqlx::query(
            "SELECT entity_id FROM triples
             WHERE attribute_id = ? AND value_id = ? ORDER BY entity_id",
        )
        .bind(attribute_id)
        .bind(value_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        Ok(rows.iter().map(|r| r.get("entity_id")).collect())
    }

    async fn entities_with_attribute(&self, attribute_id: &str) -> Result<Vec<String>, SinkError> {
        let rows = sqlx::query(
            "SELECT DISTINCT entity_id FROM triples WHERE attribute_id = ? ORDER BY entity_id",
        )
        .bind(attribute_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        Ok(rows.iter().map(|r| r.get("entity_id")).collect())
    }

    async fn type_entities(&self) -> Result<Vec<Entity>, SinkError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE is_type ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        Ok(rows.iter().map(entity_from_row).collect())
    }

    async fn triple_count(&self) -> Result<u64, SinkError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM triples")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── SpacePartitioner impl ───────────────────────────────────────────────────

#[async_trait]
impl SpacePartitioner for SqliteStore {
    async fn ensure_space(&self, space_id: &str, schema_name: &str) -> Result<(), SinkError> {
        ident::validate(schema_name)?;
        sqlx::query("INSERT INTO spaces (id, schema_name) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
            .bind(space_id)
            .bind(schema_name)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        debug!(space = space_id, schema = schema_name, "space ensured");
        Ok(())
    }

    async fn ensure_extension_table(
        &self,
        space_id: &str,
        type_name: &str,
        columns: &[ColumnDef],
    ) -> Result<(), SinkError> {
        let schema_name = self
            .schema_name(space_id)
            .await?
            .ok_or_else(|| SinkError::Query(format!("space '{space_id}' is not provisioned")))?;
        let table = table_ident(&schema_name, type_name)?;

        self.execute_ddl(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id        TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL UNIQUE REFERENCES entities(id)
            )"
        ))
        .await?;

        let physical = format!("{schema_name}.{type_name}");
        let present: Vec<String> = sqlx::query("SELECT name FROM pragma_table_info(?)")
            .bind(&physical)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?
            .iter()
            .map(|r| r.get("name"))
            .collect();

        for column in columns {
            ident::validate(&column.name)?;
            if !present.contains(&column.name) {
                self.execute_ddl(&format!(
                    "ALTER TABLE {table} ADD COLUMN {} {}",
                    ident::quote(&column.name),
                    column.column_type.sql()
                ))
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO extension_tables (space_id, type_name, table_name) VALUES (?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(space_id)
        .bind(type_name)
        .bind(&physical)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        for column in columns {
            sqlx::query(
                "INSERT INTO extension_columns (space_id, type_name, column_name, column_type)
                 VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(space_id)
            .bind(type_name)
            .bind(&column.name)
            .bind(column.column_type.name())
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        }

        debug!(table = %physical, columns = columns.len(), "extension table ensured");
        Ok(())
    }

    async fn spaces(&self) -> Result<Vec<Space>, SinkError> {
        let rows = sqlx::query("SELECT id, schema_name FROM spaces ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(rows
            .iter()
            .map(|r| Space {
                id: r.get("id"),
                schema_name: r.get("schema_name"),
            })
            .collect())
    }

    async fn extension_tables(&self) -> Result<Vec<ExtensionTable>, SinkError> {
        let tables = sqlx::query(
            "SELECT space_id, type_name FROM extension_tables ORDER BY space_id, type_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut out = Vec::with_capacity(tables.len());
        for t in tables {
            let space_id: String = t.get("space_id");
            let type_name: String = t.get("type_name");
            let rows = sqlx::query(
                "SELECT column_name, column_type FROM extension_columns
                 WHERE space_id = ? AND type_name = ? ORDER BY column_name",
            )
            .bind(&space_id)
            .bind(&type_name)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

            let mut columns = Vec::with_capacity(rows.len());
            for r in rows {
                let raw: String = r.get("column_type");
                let column_type = ColumnType::parse(&raw).ok_or_else(|| {
                    SinkError::Query(format!("unknown column type '{raw}' on {type_name}"))
                })?;
                columns.push(ColumnDef::new(r.get::<String, _>("column_name"), column_type));
            }
            out.push(ExtensionTable {
                space_id,
                type_name,
                columns,
            });
        }
        Ok(out)
    }

    async fn extension_rows(
        &self,
        space_id: &str,
        type_name: &str,
    ) -> Result<Vec<String>, SinkError> {
        let Some(schema_name) = self.schema_name(space_id).await? else {
            return Ok(Vec::new());
        };
        let table = table_ident(&schema_name, type_name)?;
        let rows = sqlx::query(&format!("SELECT id FROM {table} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_cursor(&self) -> Result<Cursor, SinkError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        read_cursor(&mut conn).await
    }

    async fn advance(&self, expected: &Cursor, batch: &CommitBatch) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        swap_cursor(&mut tx, expected, &batch.position).await?;

        let mut journaled = 0usize;
        for segment in &batch.segments {
            for mutation in &segment.mutations {
                if let Some(op) = apply(&mut tx, mutation).await? {
                    sqlx::query("INSERT INTO ingest_journal (block_number, op) VALUES (?, ?)")
                        .bind(segment.block_number as i64)
                        .bind(journal::encode(&op)?)
                        .execute(&mut *tx)
                        .await
                        .map_err(classify)?;
                    journaled += 1;
                }
            }
        }

        tx.commit().await.map_err(classify)?;
        debug!(
            cursor = %batch.position,
            mutations = batch.mutation_count(),
            journaled,
            "batch committed"
        );
        Ok(())
    }

    async fn rewind(
        &self,
        expected: &Cursor,
        target: &Cursor,
    ) -> Result<RollbackReport, SinkError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        swap_cursor(&mut tx, expected, target).await?;

        check_journal_retained(target, journal_floor(&mut tx).await?)?;

        let above = revert_above(target);
        let entries = sqlx::query(
            "SELECT seq, op FROM ingest_journal WHERE block_number > ? ORDER BY seq DESC",
        )
        .bind(above)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?;

        let mut report = RollbackReport {
            from: expected.clone(),
            to: target.clone(),
            ..Default::default()
        };
        for entry in &entries {
            let op = journal::decode(entry.get::<&str, _>("op"))?;
            revert(&mut tx, &op, &mut report).await?;
        }

        sqlx::query("DELETE FROM ingest_journal WHERE block_number > ?")
            .bind(above)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        debug!(from = %expected, to = %target, reverted = report.ops_reverted, "rewound");
        Ok(report)
    }

    async fn prune_journal(&self, block_number: u64) -> Result<u64, SinkError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        let pruned = sqlx::query("DELETE FROM ingest_journal WHERE block_number <= ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(classify)?
            .rows_affected();
        sqlx::query("UPDATE cursors SET journal_floor = MAX(journal_floor, ?) WHERE id = 0")
            .bind(block_number.saturating_add(1) as i64)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(pruned)
    }
}
