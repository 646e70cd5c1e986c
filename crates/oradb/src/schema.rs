//! Live schema introspection and column mutations.
//!
//! SQLite only grows tables through `ALTER TABLE`, and refuses to drop the last column of a
//! table. Removing a table's only column therefore goes through a placeholder column
//! ([`PLACEHOLDER_COLUMN`]) that is dropped again as soon as a real column is added.
//!
//! Nothing here caches column metadata: every call re-reads `PRAGMA table_info`.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::handler::{normalize_tag, TEXT};
use crate::query::quote_ident;
use crate::store::atomically;

/// Column kept in a table whose last real column was removed.
pub const PLACEHOLDER_COLUMN: &str = "__oradb_placeholder";

/// Column definition, e.g. `{"name": "data", "type": "JSON"}` in a JSON table layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Declared type as reported by SQLite (may be empty for untyped columns).
    #[serde(rename = "type", default)]
    pub type_tag: String,
}

impl Column {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == PLACEHOLDER_COLUMN
    }
}

/// Why a schema call left the table untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    TableExists,
    ColumnExists,
    ColumnMissing,
    TypeUnchanged,
    /// The placeholder is the only column left and cannot be removed.
    LastColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum SchemaChange {
    Applied,
    Skipped(SkipReason),
}

impl SchemaChange {
    pub fn is_applied(self) -> bool {
        matches!(self, SchemaChange::Applied)
    }
}

pub(crate) fn require_table(table: &str) -> Result<()> {
    if table.trim().is_empty() {
        return Err(ValidationError::MissingTableName.into());
    }
    Ok(())
}

pub(crate) fn require_column(column: &str) -> Result<()> {
    if column.trim().is_empty() {
        return Err(ValidationError::MissingColumnName.into());
    }
    Ok(())
}

fn skipped(table: &str, column: &str, reason: SkipReason) -> SchemaChange {
    log::debug!("schema change on {table}.{column} skipped: {reason:?}");
    SchemaChange::Skipped(reason)
}

fn type_or_text(type_tag: &str) -> String {
    let tag = normalize_tag(type_tag);
    if tag.is_empty() {
        TEXT.to_string()
    } else {
        tag
    }
}

/// Columns of `table` in declaration order; empty when the table does not exist.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(Column {
            name: row.get(1)?,
            type_tag: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    })?;

    let mut columns = Vec::new();
    for column in rows {
        columns.push(column?);
    }
    Ok(columns)
}

pub(crate) fn find_column(conn: &Connection, table: &str, name: &str) -> Result<Option<Column>> {
    Ok(table_columns(conn, table)?
        .into_iter()
        .find(|column| column.name == name))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut names = Vec::new();
    for name in rows {
        names.push(name?);
    }
    Ok(names)
}

/// Create `table` with `columns` unless it already exists. An existing table is left as
/// is, even when its columns differ.
pub(crate) fn ensure_table(conn: &Connection, table: &str, columns: &[Column]) -> Result<SchemaChange> {
    require_table(table)?;
    if columns.is_empty() {
        return Err(ValidationError::EmptyColumnList.into());
    }
    for column in columns {
        require_column(&column.name)?;
    }

    if table_exists(conn, table)? {
        return Ok(SchemaChange::Skipped(SkipReason::TableExists));
    }

    let definitions: Vec<String> = columns
        .iter()
        .map(|column| format!("{} {}", quote_ident(&column.name), type_or_text(&column.type_tag)))
        .collect();
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            definitions.join(", ")
        ),
        [],
    )?;
    Ok(SchemaChange::Applied)
}

pub(crate) fn drop_table(conn: &Connection, table: &str) -> Result<()> {
    require_table(table)?;
    conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])?;
    Ok(())
}

fn alter_add(conn: &Connection, table: &str, column: &str, type_tag: &str) -> Result<()> {
    conn.execute(
        &format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(column),
            type_or_text(type_tag)
        ),
        [],
    )?;
    Ok(())
}

fn alter_drop(conn: &Connection, table: &str, column: &str) -> Result<()> {
    conn.execute(
        &format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        ),
        [],
    )?;
    Ok(())
}

pub(crate) fn add_column(conn: &Connection, table: &str, name: &str, type_tag: &str) -> Result<SchemaChange> {
    require_table(table)?;
    require_column(name)?;

    let existing = table_columns(conn, table)?;
    if existing.iter().any(|column| column.name == name) {
        return Ok(skipped(table, name, SkipReason::ColumnExists));
    }

    alter_add(conn, table, name, type_tag)?;

    // The new column keeps the table non-empty, so a leftover placeholder can go.
    if name != PLACEHOLDER_COLUMN && existing.iter().any(Column::is_placeholder) {
        alter_drop(conn, table, PLACEHOLDER_COLUMN)?;
    }
    Ok(SchemaChange::Applied)
}

pub(crate) fn remove_column(conn: &Connection, table: &str, name: &str) -> Result<SchemaChange> {
    require_table(table)?;
    require_column(name)?;

    let existing = table_columns(conn, table)?;
    if !existing.iter().any(|column| column.name == name) {
        return Ok(skipped(table, name, SkipReason::ColumnMissing));
    }

    if existing.len() > 1 {
        alter_drop(conn, table, name)?;
        return Ok(SchemaChange::Applied);
    }

    if name == PLACEHOLDER_COLUMN {
        return Ok(skipped(table, name, SkipReason::LastColumn));
    }

    // Only column: add the placeholder first, SQLite rejects zero-column tables.
    atomically(conn, |conn| {
        alter_add(conn, table, PLACEHOLDER_COLUMN, TEXT)?;
        alter_drop(conn, table, name)
    })?;
    Ok(SchemaChange::Applied)
}

pub(crate) fn rename_column(conn: &Connection, table: &str, name: &str, to: &str) -> Result<SchemaChange> {
    require_table(table)?;
    require_column(name)?;
    require_column(to)?;

    if find_column(conn, table, name)?.is_none() {
        return Ok(skipped(table, name, SkipReason::ColumnMissing));
    }

    conn.execute(
        &format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(table),
            quote_ident(name),
            quote_ident(to)
        ),
        [],
    )?;
    Ok(SchemaChange::Applied)
}

/// Change a column's declared type by dropping and re-adding it. Existing values in the
/// column are discarded.
pub(crate) fn retype_column(conn: &Connection, table: &str, name: &str, type_tag: &str) -> Result<SchemaChange> {
    require_table(table)?;
    require_column(name)?;

    let Some(column) = find_column(conn, table, name)? else {
        return Ok(skipped(table, name, SkipReason::ColumnMissing));
    };
    if type_or_text(&column.type_tag) == type_or_text(type_tag) {
        return Ok(skipped(table, name, SkipReason::TypeUnchanged));
    }

    log::warn!(
        "retyping {table}.{name} from {} to {}; existing values are discarded",
        column.type_tag,
        type_or_text(type_tag)
    );
    atomically(conn, |conn| {
        remove_column(conn, table, name)?;
        add_column(conn, table, name, type_tag)
    })?;
    Ok(SchemaChange::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use serde_json::json;

    #[test]
    fn column_layouts_load_from_json() {
        let columns: Vec<Column> = serde_json::from_value(json!([
            {"name": "id", "type": "TEXT"},
            {"name": "data", "type": "json"},
            {"name": "note"},
        ]))
        .unwrap();
        assert_eq!(columns[2], Column::new("note", ""));

        let store = Store::open_in_memory().unwrap();
        ensure_table(store.conn(), "t", &columns).unwrap();
        assert_eq!(
            table_columns(store.conn(), "t").unwrap(),
            vec![
                Column::new("id", "TEXT"),
                Column::new("data", "JSON"),
                Column::new("note", "TEXT"),
            ]
        );
    }

    #[test]
    fn schema_outcomes_serialize_for_reports() {
        assert_eq!(
            serde_json::to_value(SchemaChange::Skipped(SkipReason::LastColumn)).unwrap(),
            json!({"status": "skipped", "reason": "lastColumn"})
        );
        assert_eq!(
            serde_json::to_value(SchemaChange::Applied).unwrap(),
            json!({"status": "applied"})
        );
    }

    #[test]
    fn retype_treats_untyped_columns_as_text() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn();
        conn.execute_batch("CREATE TABLE raw (x); INSERT INTO raw (x) VALUES ('kept');")
            .unwrap();

        assert_eq!(
            retype_column(conn, "raw", "x", "text").unwrap(),
            SchemaChange::Skipped(SkipReason::TypeUnchanged)
        );
        let kept: String = conn.query_row("SELECT x FROM raw", [], |row| row.get(0)).unwrap();
        assert_eq!(kept, "kept");
    }

    #[test]
    fn missing_tables_have_no_columns() {
        let store = Store::open_in_memory().unwrap();
        assert!(table_columns(store.conn(), "nope").unwrap().is_empty());
        assert!(!table_exists(store.conn(), "nope").unwrap());
    }
}
